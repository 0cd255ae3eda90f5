//! Batch: detect and count over many images, appending every image's counts to one report.
//! Progress is reported per finished image.

use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::{self, ParamArgs};
use crate::collab::{FileLoader, GaussianBackground};
use crate::error::Error;
use crate::params::ParameterStore;
use crate::pipeline::{BatchRequest, BatchRunner, Toolkit};
use crate::spot::SpotiflowDetector;
use crate::worker;

#[derive(Args, Clone)]
pub struct BatchArgs {
    #[arg(long, num_args = 1.., help = "Images to process, in order")]
    pub images: Vec<String>,
    #[arg(long, help = "Process every matching file in this directory (after --images)")]
    pub input_dir: Option<String>,
    #[arg(long, default_value = r"(?i)\.tiff?$", help = "File name regex used with --input-dir")]
    pub pattern: String,
    #[arg(long, num_args = 1.., help = "Cell label images, one per image (\"\" for none)")]
    pub cells: Vec<String>,
    #[arg(long, num_args = 1.., help = "Nucleus masks, one per image (\"\" for none)")]
    pub nuclei: Vec<String>,
    #[arg(long, help = "Path to spotiflow ONNX model dir (must contain model.onnx)")]
    pub model: String,
    #[arg(long, help = "Force CPU (skip CUDA)")]
    pub cpu: bool,
    #[arg(long, help = "Remove the gaussian background before detection")]
    pub subtract_background: bool,
    #[arg(
        long,
        help = "Decompose dense regions after detection (needs a dense-region decomposer; this build ships none, so the run is rejected)"
    )]
    pub decompose: bool,
    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = [100.0, 100.0],
        help = "Voxel size in the radius unit (nm), e.g. \"300,100,100\"; extra leading components are ignored"
    )]
    pub scale: Vec<f64>,
    #[command(flatten)]
    pub params: ParamArgs,
}

fn collect_images(args: &BatchArgs) -> crate::error::Result<Vec<PathBuf>> {
    let mut images: Vec<PathBuf> = args.images.iter().map(PathBuf::from).collect();
    if let Some(dir) = &args.input_dir {
        images.extend(cli::discover_images(Path::new(dir), &args.pattern)?);
    }
    Ok(images)
}

pub fn run(
    args: BatchArgs,
    progress: impl Fn(f64, &str) + Send + Sync + 'static,
) -> Result<(), Box<dyn std::error::Error>> {
    let progress = Arc::new(progress);
    let store = Arc::new(ParameterStore::new(args.params.resolve()?));

    let images = collect_images(&args)?;
    if images.is_empty() {
        tracing::warn!("no images given, nothing to do");
        progress(1.0, "No images");
        return Ok(());
    }

    if args.decompose {
        return Err(Error::MissingCollaborator("dense-region decomposer").into());
    }

    progress(0.0, "Loading spotiflow model...");
    let detector = SpotiflowDetector::open(Path::new(&args.model), args.cpu)?;
    let toolkit = Toolkit {
        loader: Arc::new(FileLoader),
        subtractor: Some(Arc::new(GaussianBackground)),
        detector: Arc::new(detector),
        decomposer: None,
    };

    let request = BatchRequest {
        images,
        cell_labels: cli::optional_paths(&args.cells),
        nuclei_masks: cli::optional_paths(&args.nuclei),
        scale: args.scale.clone(),
        subtract_background: args.subtract_background,
        decompose_dense_regions: args.decompose,
    };

    let runner = Arc::new(BatchRunner::new(Arc::clone(&store), toolkit));
    {
        let progress = Arc::clone(&progress);
        runner.progress().subscribe(move |p| {
            progress(
                p.fraction(),
                &format!("Processed {}/{} images", p.current, p.max),
            );
        });
    }

    let op = {
        let runner = Arc::clone(&runner);
        worker::spawn_operation("batch", move || runner.run(&request))?
    };
    let summary = op.wait()?;

    tracing::info!(
        images = summary.images,
        spots = summary.spots,
        threshold = store.threshold(),
        "batch done"
    );
    args.params.save(&store)?;
    let report = summary
        .report
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    progress(1.0, &format!("Wrote counts to {}", report));
    Ok(())
}
