//! Detect: spots in a single image, optionally counted per cell.
//! Writes <image dir>/spots/<image>.csv and prints the count table to stdout.

use clap::Args;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::app::Session;
use crate::cli::ParamArgs;
use crate::collab::{BackgroundSubtractor, GaussianBackground};
use crate::error::Result;
use crate::loader;
use crate::params::ParameterStore;
use crate::report;
use crate::spot::SpotiflowDetector;
use crate::worker;

#[derive(Args, Clone)]
pub struct DetectArgs {
    #[arg(long, help = "Image to analyse (TIFF plane/stack or any 2-D image format)")]
    pub image: String,
    #[arg(long, help = "Path to spotiflow ONNX model dir (must contain model.onnx)")]
    pub model: String,
    #[arg(long, help = "Force CPU (skip CUDA)")]
    pub cpu: bool,
    #[arg(long, help = "Remove the gaussian background before detection")]
    pub subtract_background: bool,
    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = [100.0, 100.0],
        help = "Voxel size in the radius unit (nm), e.g. \"300,100,100\"; extra leading components are ignored"
    )]
    pub scale: Vec<f64>,
    #[arg(long, help = "Cell label image for per-cell counts")]
    pub cells: Option<String>,
    #[arg(long, help = "Nucleus mask or label image")]
    pub nuclei: Option<String>,
    #[command(flatten)]
    pub params: ParamArgs,
}

/// Background subtraction on its own worker thread; the session comes back with its result set.
fn subtract_on_worker(
    mut session: Session,
    subtractor: impl BackgroundSubtractor + 'static,
) -> Result<Session> {
    let op = worker::spawn_operation("subtract-background", move || {
        session.subtract_background(&subtractor)?;
        Ok(session)
    })?;
    op.wait_with_ticker("Subtracting background", |r| r)
}

pub fn run(
    args: DetectArgs,
    progress: impl Fn(f64, &str),
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(ParameterStore::new(args.params.resolve()?));
    let image_path = PathBuf::from(&args.image);

    progress(0.0, "Loading spotiflow model...");
    let detector = SpotiflowDetector::open(Path::new(&args.model), args.cpu)?;

    let mut session = Session::new(Arc::clone(&store));
    session.set_data(loader::read_image(&image_path)?);

    if args.subtract_background {
        progress(0.2, "Subtracting background");
        session = subtract_on_worker(session, GaussianBackground)?;
    }

    progress(0.4, "Detecting spots");
    let scale = args.scale.clone();
    let op = worker::spawn_operation("detect", move || {
        session.detect_spots(&detector, &scale)?;
        Ok(session)
    })?;
    let mut session = op.wait_with_ticker("Detecting spots", |r| r)?;

    let spots = session.spots().unwrap_or(&[]).to_vec();
    let spot_file = report::write_spot_coordinates(&image_path, &spots)?;
    tracing::info!(
        spots = spots.len(),
        threshold = store.threshold(),
        file = %spot_file.display(),
        "detection done"
    );

    if args.cells.is_some() || args.nuclei.is_some() {
        progress(0.8, "Counting spots per cell");
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
        if session.count_spots(cells.as_ref(), nuclei.as_ref())? {
            if let (Some(table), Some(c)) = (session.spot_count_table(), session.classification()) {
                for (env, n) in c.environment_counts() {
                    tracing::info!(environment = ?env, spots = n, "spot environment");
                }
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
        } else {
            tracing::warn!("no spots detected, nothing to count");
        }
    }

    args.params.save(&store)?;
    progress(
        1.0,
        &format!("Wrote {} spots to {}", spots.len(), spot_file.display()),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Image;
    use ndarray::{ArrayD, IxDyn};
    use parking_lot::Mutex;
    use std::thread;

    struct ThreadRecorder {
        thread: Arc<Mutex<Option<String>>>,
    }

    impl BackgroundSubtractor for ThreadRecorder {
        fn subtract(&self, image: &Image, _sigma: &[f64]) -> Result<Image> {
            *self.thread.lock() = thread::current().name().map(str::to_string);
            Ok(image.mapv(|v| v - 1.0))
        }
    }

    #[test]
    fn background_subtraction_runs_on_a_worker() {
        let mut session = Session::new(Arc::new(ParameterStore::default()));
        session.set_data(ArrayD::from_elem(IxDyn(&[4, 4]), 5.0f32));
        let thread = Arc::new(Mutex::new(None));
        let recorder = ThreadRecorder {
            thread: Arc::clone(&thread),
        };

        let session = subtract_on_worker(session, recorder).unwrap();

        assert_eq!(thread.lock().as_deref(), Some("subtract-background"));
        assert!(session.result().unwrap().iter().all(|&v| v == 4.0));
        assert!(session.data().unwrap().iter().all(|&v| v == 5.0));
    }
}
