//! Batch pipeline: replays detection and counting over an ordered list of images.
//!
//! Per image, in this order:
//!   1. load (leading singleton axes squeezed)
//!   2. background subtraction            (if enabled)
//!   3. spot detection                    (may overwrite the shared threshold)
//!   4. dense-region decomposition        (if enabled)
//!   5. spot file
//!   6. cell labels / nucleus mask        (whichever are given)
//!   7. classification → running count report
//!   8. progress i+1 of N
//!
//! A failing image stops the whole batch; there is no per-image recovery.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::classify::{build_count_table, classify, count_distinct_labels, SpotCountTable};
use crate::collab::{BackgroundSubtractor, DenseRegionDecomposer, ImageLoader, SpotDetector};
use crate::error::{Error, Result};
use crate::params::ParameterStore;
use crate::report;
use crate::stages;

/// The collaborators a batch (or session) calls out to.
#[derive(Clone)]
pub struct Toolkit {
    pub loader: Arc<dyn ImageLoader>,
    pub subtractor: Option<Arc<dyn BackgroundSubtractor>>,
    pub detector: Arc<dyn SpotDetector>,
    pub decomposer: Option<Arc<dyn DenseRegionDecomposer>>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    pub images: Vec<PathBuf>,
    /// Per-image cell label maps; `None` or an empty path means "no labels for this image".
    pub cell_labels: Option<Vec<Option<PathBuf>>>,
    pub nuclei_masks: Option<Vec<Option<PathBuf>>>,
    pub scale: Vec<f64>,
    pub subtract_background: bool,
    pub decompose_dense_regions: bool,
}

fn path_at(paths: Option<&Vec<Option<PathBuf>>>, i: usize) -> Option<&Path> {
    paths
        .and_then(|p| p.get(i))
        .and_then(|p| p.as_deref())
        .filter(|p| !p.as_os_str().is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchProgress {
    pub current: usize,
    pub max: usize,
}

impl BatchProgress {
    pub fn fraction(&self) -> f64 {
        if self.max == 0 {
            1.0
        } else {
            self.current as f64 / self.max as f64
        }
    }
}

type ProgressListener = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Progress of the current run plus the observers notified on every update.
#[derive(Default)]
pub struct ProgressTracker {
    state: Mutex<BatchProgress>,
    listeners: Mutex<Vec<ProgressListener>>,
}

impl ProgressTracker {
    pub fn subscribe(&self, listener: impl Fn(BatchProgress) + Send + Sync + 'static) {
        self.listeners.lock().push(Arc::new(listener));
    }

    pub fn get(&self) -> BatchProgress {
        *self.state.lock()
    }

    /// Start over at (0, max).
    pub fn set_max(&self, max: usize) {
        self.update(BatchProgress { current: 0, max });
    }

    pub fn set_current(&self, current: usize) {
        let max = self.state.lock().max;
        self.update(BatchProgress { current, max });
    }

    fn update(&self, progress: BatchProgress) {
        *self.state.lock() = progress;
        // Listeners run without the lock so they may subscribe or read progress.
        let listeners: Vec<ProgressListener> = self.listeners.lock().clone();
        for listener in listeners {
            listener(progress);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Running(usize),
    Completed,
    Failed(usize),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    /// `None` when there was nothing to process.
    pub report: Option<PathBuf>,
    pub images: usize,
    pub spots: usize,
}

pub struct BatchRunner {
    params: Arc<ParameterStore>,
    toolkit: Toolkit,
    progress: ProgressTracker,
    state: Mutex<BatchState>,
}

impl BatchRunner {
    pub fn new(params: Arc<ParameterStore>, toolkit: Toolkit) -> Self {
        Self {
            params,
            toolkit,
            progress: ProgressTracker::default(),
            state: Mutex::new(BatchState::Idle),
        }
    }

    pub fn params(&self) -> &Arc<ParameterStore> {
        &self.params
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn state(&self) -> BatchState {
        *self.state.lock()
    }

    pub fn run(&self, request: &BatchRequest) -> Result<BatchSummary> {
        let total = request.images.len();
        self.progress.set_max(total);
        let Some(first) = request.images.first() else {
            *self.state.lock() = BatchState::Completed;
            tracing::info!("empty batch, nothing to do");
            return Ok(BatchSummary::default());
        };
        self.check_toolkit(request)?;

        let report_path = report::create_empty_count_report(first)?;
        tracing::info!(images = total, report = %report_path.display(), "batch started");

        let mut summary = BatchSummary {
            report: Some(report_path.clone()),
            ..BatchSummary::default()
        };
        for (i, image_path) in request.images.iter().enumerate() {
            *self.state.lock() = BatchState::Running(i);
            match self.process_image(request, i, image_path, &report_path) {
                Ok(spots) => {
                    summary.images += 1;
                    summary.spots += spots;
                }
                Err(e) => {
                    *self.state.lock() = BatchState::Failed(i);
                    tracing::error!(image = %image_path.display(), error = %e, "batch aborted");
                    return Err(e);
                }
            }
            self.progress.set_current(i + 1);
        }
        *self.state.lock() = BatchState::Completed;
        tracing::info!(images = summary.images, spots = summary.spots, "batch finished");
        Ok(summary)
    }

    fn check_toolkit(&self, request: &BatchRequest) -> Result<()> {
        if request.subtract_background && self.toolkit.subtractor.is_none() {
            return Err(Error::MissingCollaborator("background subtractor"));
        }
        if request.decompose_dense_regions && self.toolkit.decomposer.is_none() {
            return Err(Error::MissingCollaborator("dense-region decomposer"));
        }
        Ok(())
    }

    /// Run every stage for one image; returns the number of spots found.
    fn process_image(
        &self,
        request: &BatchRequest,
        i: usize,
        image_path: &Path,
        report_path: &Path,
    ) -> Result<usize> {
        let tk = &self.toolkit;
        let mut image = stages::squeeze_leading(tk.loader.load_image(image_path)?);

        if request.subtract_background {
            let subtractor = tk
                .subtractor
                .as_deref()
                .ok_or(Error::MissingCollaborator("background subtractor"))?;
            image = stages::subtract_background(subtractor, &image, &self.params)?;
        }

        let mut spots = stages::detect_spots(&*tk.detector, &image, &self.params, &request.scale)?;

        if request.decompose_dense_regions {
            let decomposer = tk
                .decomposer
                .as_deref()
                .ok_or(Error::MissingCollaborator("dense-region decomposer"))?;
            spots = stages::decompose_dense_regions(
                decomposer,
                &image,
                &spots,
                &self.params,
                &request.scale,
            )?;
        }

        let spot_file = report::write_spot_coordinates(image_path, &spots)?;

        let cells = path_at(request.cell_labels.as_ref(), i)
            .map(|p| tk.loader.load_labels(p))
            .transpose()?;
        let nuclei = path_at(request.nuclei_masks.as_ref(), i)
            .map(|p| tk.loader.load_labels(p))
            .transpose()?;

        let table = match classify(&spots, cells.as_ref(), nuclei.as_ref())? {
            Some(c) => build_count_table(&c, c.nr_of_cells),
            None => SpotCountTable::zeros(cells.as_ref().map(count_distinct_labels).unwrap_or(1)),
        };
        report::append_count_rows(report_path, image_path, &table)?;

        tracing::info!(
            image = %image_path.display(),
            spots = spots.len(),
            cells = table.len(),
            spot_file = %spot_file.display(),
            "image processed"
        );
        Ok(spots.len())
    }
}
