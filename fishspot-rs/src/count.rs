//! Count: assign previously detected spots (a spot CSV) to cells and nuclei.

use clap::Args;
use ndarray::s;
use std::io;
use std::path::{Path, PathBuf};

use crate::classify::{self, SpotCountTable};
use crate::loader;
use crate::report;

#[derive(Args, Clone)]
pub struct CountArgs {
    #[arg(long, help = "Spot CSV as written by `detect` or `batch`")]
    pub spots: String,
    #[arg(long, help = "Cell label image")]
    pub cells: Option<String>,
    #[arg(long, help = "Nucleus mask or label image")]
    pub nuclei: Option<String>,
    #[arg(long, help = "Append rows to this count report (created with header if missing)")]
    pub output: Option<String>,
    #[arg(long, help = "Leave out cells without any spot")]
    pub hide_empty: bool,
}

/// Rows whose three count columns are all zero are dropped.
fn without_empty_cells(table: &SpotCountTable) -> SpotCountTable {
    let matrix = report::count_matrix(table);
    let counts = matrix.slice(s![.., 1..]).to_owned();
    let (_, _, rows) = report::strip_zero_rows_and_columns(&counts);
    SpotCountTable {
        rows: rows.into_iter().map(|i| table.rows[i]).collect(),
    }
}

pub fn run(args: CountArgs, progress: impl Fn(f64, &str)) -> Result<(), Box<dyn std::error::Error>> {
    let spots_path = PathBuf::from(&args.spots);
    progress(0.0, &format!("Reading {}", spots_path.display()));
    let spots = report::read_spot_coordinates(&spots_path)?;

    let cells = args
        .cells
        .as_deref()
        .map(|p| loader::read_labels(Path::new(p)))
        .transpose()?;
    let nuclei = args
        .nuclei
        .as_deref()
        .map(|p| loader::read_labels(Path::new(p)))
        .transpose()?;

    progress(0.5, &format!("Classifying {} spots", spots.len()));
    let table = match classify::classify(&spots, cells.as_ref(), nuclei.as_ref())? {
        Some(c) => classify::build_count_table(&c, c.nr_of_cells),
        None => {
            tracing::warn!(file = %spots_path.display(), "spot file is empty");
            SpotCountTable::zeros(cells.as_ref().map(classify::count_distinct_labels).unwrap_or(1))
        }
    };
    let table = if args.hide_empty {
        without_empty_cells(&table)
    } else {
        table
    };

    match &args.output {
        Some(out) => {
            let out = Path::new(out);
            report::start_count_report(out)?;
            report::append_count_rows(out, &spots_path, &table)?;
            tracing::info!(rows = table.len(), report = %out.display(), "appended counts");
        }
        None => {
            let mut wtr = csv::Writer::from_writer(io::stdout());
            wtr.write_record(&report::COUNT_HEADER[1..])?;
            for row in &table.rows {
                wtr.write_record([
                    row.cell.to_string(),
                    row.outside.to_string(),
                    row.inside.to_string(),
                    row.total.to_string(),
                ])?;
            }
            wtr.flush()?;
        }
    }

    progress(1.0, &format!("Counted {} spots", table.total_spots()));
    Ok(())
}
