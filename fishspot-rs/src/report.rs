//! CSV output: one spot file per image and one running count report per batch.
//!
//! Spot file:    <image dir>/spots/<image stem>.csv     index,axis-0,axis-1,...
//! Count report: <image dir>/results/<timestamp>_<folder>_count.csv

use chrono::{DateTime, Local};
use ndarray::{Array2, Axis};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::classify::SpotCountTable;
use crate::error::Result;
use crate::spot::Spot;

pub const COUNT_HEADER: [&str; 5] = [
    "image",
    "cell",
    "spots in cytoplasm",
    "spots in nucleus",
    "spots in cell",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Create `dir` unless it exists. Losing a creation race to another writer is fine.
fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn input_dir(input: &Path) -> &Path {
    match input.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

pub fn spot_file_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    input_dir(input).join("spots").join(format!("{}.csv", stem))
}

/// Write the spot listing. Every line goes out as two writes: the content, then `\n`.
pub fn write_spot_table<W: Write>(out: &mut W, spots: &[Spot]) -> io::Result<()> {
    let dims = spots.first().map(|s| s.ndim()).unwrap_or(0);
    let mut header = String::from("index");
    for axis in 0..dims {
        header.push_str(&format!(",axis-{}", axis));
    }
    out.write_all(header.as_bytes())?;
    out.write_all(b"\n")?;

    for (i, spot) in spots.iter().enumerate() {
        let mut line = (i + 1).to_string();
        for c in spot.coords() {
            line.push_str(&format!(",{}", c));
        }
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

/// Write the spots of `input` to its spot file and return that path.
pub fn write_spot_coordinates(input: &Path, spots: &[Spot]) -> Result<PathBuf> {
    let path = spot_file_path(input);
    if let Some(dir) = path.parent() {
        ensure_dir(dir)?;
    }
    let mut fh = io::BufWriter::new(fs::File::create(&path)?);
    write_spot_table(&mut fh, spots)?;
    fh.flush()?;
    Ok(path)
}

/// Read a spot file back, dropping the index column.
pub fn read_spot_coordinates(path: &Path) -> Result<Vec<Spot>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut spots = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let coords = record
            .iter()
            .skip(1)
            .map(|v| {
                v.trim().parse::<f64>().map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("invalid coordinate {:?} in {}", v, path.display()),
                    )
                })
            })
            .collect::<io::Result<Vec<f64>>>()?;
        spots.push(Spot(coords));
    }
    Ok(spots)
}

pub(crate) fn count_report_path(first_input: &Path, now: DateTime<Local>) -> PathBuf {
    let dir = input_dir(first_input);
    let folder = dir
        .canonicalize()
        .ok()
        .as_deref()
        .and_then(|d| d.file_name())
        .or_else(|| dir.file_name())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join("results")
        .join(format!("{}_{}_count.csv", now.format(TIMESTAMP_FORMAT), folder))
}

/// Create the batch count report (header only) beside the first input and return its path.
/// An existing file is left untouched.
pub fn create_empty_count_report(first_input: &Path) -> Result<PathBuf> {
    create_count_report_at(first_input, Local::now())
}

pub(crate) fn create_count_report_at(first_input: &Path, now: DateTime<Local>) -> Result<PathBuf> {
    let path = count_report_path(first_input, now);
    start_count_report(&path)?;
    Ok(path)
}

/// Write the report header to `path` unless the file already exists.
pub fn start_count_report(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            ensure_dir(dir)?;
        }
    }
    if !path.exists() {
        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record(COUNT_HEADER)?;
        wtr.flush()?;
    }
    Ok(())
}

/// Append one record per table row to an existing report.
pub fn append_count_rows(report: &Path, image: &Path, table: &SpotCountTable) -> Result<()> {
    let file = OpenOptions::new().append(true).open(report)?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    let image = image.display().to_string();
    for row in &table.rows {
        wtr.write_record([
            image.clone(),
            row.cell.to_string(),
            row.outside.to_string(),
            row.inside.to_string(),
            row.total.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// The table as a (cells × 4) matrix: cell, outside, inside, total.
pub fn count_matrix(table: &SpotCountTable) -> Array2<u64> {
    let mut m = Array2::zeros((table.len(), 4));
    for (i, row) in table.rows.iter().enumerate() {
        m[[i, 0]] = row.cell as u64;
        m[[i, 1]] = row.outside;
        m[[i, 2]] = row.inside;
        m[[i, 3]] = row.total;
    }
    m
}

/// Drop rows, then columns, whose entries are all zero. Also returns the kept column
/// and row indices of the input.
pub fn strip_zero_rows_and_columns(data: &Array2<u64>) -> (Array2<u64>, Vec<usize>, Vec<usize>) {
    let rows: Vec<usize> = data
        .outer_iter()
        .enumerate()
        .filter(|(_, r)| r.iter().any(|&v| v != 0))
        .map(|(i, _)| i)
        .collect();
    let kept = data.select(Axis(0), &rows);
    let cols: Vec<usize> = kept
        .axis_iter(Axis(1))
        .enumerate()
        .filter(|(_, c)| c.iter().any(|&v| v != 0))
        .map(|(i, _)| i)
        .collect();
    (kept.select(Axis(1), &cols), cols, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::CountRow;
    use chrono::TimeZone;
    use ndarray::array;

    /// Records the byte chunks handed to each `write` call.
    #[derive(Default)]
    struct Recorder {
        writes: Vec<Vec<u8>>,
    }

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes.push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn table(rows: &[(u32, u64, u64)]) -> SpotCountTable {
        SpotCountTable {
            rows: rows
                .iter()
                .map(|&(cell, outside, inside)| CountRow {
                    cell,
                    outside,
                    inside,
                    total: outside + inside,
                })
                .collect(),
        }
    }

    #[test]
    fn spot_table_writes_content_and_newline_separately() {
        let spots = vec![Spot::from([1.0, 2.0, 3.0]), Spot::from([4.0, 5.0, 6.0])];
        let mut rec = Recorder::default();
        write_spot_table(&mut rec, &spots).unwrap();
        let chunks: Vec<String> = rec
            .writes
            .iter()
            .map(|w| String::from_utf8(w.clone()).unwrap())
            .collect();
        assert_eq!(
            chunks,
            vec![
                "index,axis-0,axis-1,axis-2",
                "\n",
                "1,1,2,3",
                "\n",
                "2,4,5,6",
                "\n"
            ]
        );
    }

    #[test]
    fn spot_file_round_trips_2d_and_3d() {
        let dir = tempfile::tempdir().unwrap();
        for (name, spots) in [
            (
                "plane.tif",
                vec![Spot::from([12.0, 7.0]), Spot::from([0.0, 254.0])],
            ),
            (
                "stack.tif",
                vec![Spot::from([3.0, 12.0, 7.0]), Spot::from([1.0, 2.5, 9.0])],
            ),
        ] {
            let input = dir.path().join(name);
            let path = write_spot_coordinates(&input, &spots).unwrap();
            assert_eq!(path, dir.path().join("spots").join(format!(
                "{}.csv",
                Path::new(name).file_stem().unwrap().to_str().unwrap()
            )));
            assert_eq!(read_spot_coordinates(&path).unwrap(), spots);
        }
    }

    #[test]
    fn empty_spot_file_has_index_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_spot_coordinates(&dir.path().join("a.tif"), &[]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "index\n");
        assert!(read_spot_coordinates(&path).unwrap().is_empty());
    }

    #[test]
    fn count_report_is_named_after_time_and_folder() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("experiment-7");
        fs::create_dir_all(&folder).unwrap();
        let now = Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let path = create_count_report_at(&folder.join("img1.tif"), now).unwrap();
        assert_eq!(
            path,
            folder
                .join("results")
                .join("2024-03-05_14-07-09_experiment-7_count.csv")
        );
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "image,cell,spots in cytoplasm,spots in nucleus,spots in cell\n"
        );
    }

    #[test]
    fn existing_report_is_not_overwritten_and_rows_append() {
        let dir = tempfile::tempdir().unwrap();
        let now = Local.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let first = dir.path().join("a.tif");
        let report = create_count_report_at(&first, now).unwrap();

        append_count_rows(&report, &first, &table(&[(0, 2, 0), (1, 3, 1)])).unwrap();
        let again = create_count_report_at(&first, now).unwrap();
        assert_eq!(again, report);
        append_count_rows(&report, &dir.path().join("b.tif"), &table(&[(0, 0, 0)])).unwrap();

        let text = fs::read_to_string(&report).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], format!("{},0,2,0,2", first.display()));
        assert_eq!(lines[2], format!("{},1,3,1,4", first.display()));
        assert!(lines[3].ends_with("b.tif,0,0,0,0"));
    }

    #[test]
    fn paths_with_commas_are_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let now = Local.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let image = dir.path().join("a,b.tif");
        let report = create_count_report_at(&image, now).unwrap();
        append_count_rows(&report, &image, &table(&[(0, 1, 0)])).unwrap();

        let mut rdr = csv::Reader::from_path(&report).unwrap();
        let rec = rdr.records().next().unwrap().unwrap();
        assert_eq!(&rec[0], image.display().to_string());
        assert_eq!(&rec[4], "1");
    }

    #[test]
    fn strip_removes_all_zero_rows_then_columns() {
        let m = array![[1u64, 0, 3], [0, 0, 0], [2, 0, 4]];
        let (stripped, cols, rows) = strip_zero_rows_and_columns(&m);
        assert_eq!(stripped, array![[1u64, 3], [2, 4]]);
        assert_eq!(cols, vec![0, 2]);
        assert_eq!(rows, vec![0, 2]);
    }

    #[test]
    fn count_matrix_has_four_columns() {
        let m = count_matrix(&table(&[(0, 1, 2), (1, 0, 0)]));
        assert_eq!(m, array![[0u64, 1, 2, 3], [1, 0, 0, 0]]);
    }
}
