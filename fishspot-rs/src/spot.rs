//! Spot coordinates, and the spotiflow-rs backed detector used by the CLI.

use parking_lot::Mutex;
use spotiflow_rs::{PredictParams, SpotiflowSession};
use std::path::Path;

use crate::collab::{Detection, DetectionRequest, SpotDetector};
use crate::error::{Error, Result};
use crate::loader::Image;

/// A detected point in image-index space: (y, x) or (z, y, x).
#[derive(Debug, Clone, PartialEq)]
pub struct Spot(pub Vec<f64>);

impl Spot {
    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    pub fn coords(&self) -> &[f64] {
        &self.0
    }
}

impl From<Vec<f64>> for Spot {
    fn from(coords: Vec<f64>) -> Self {
        Spot(coords)
    }
}

impl<const N: usize> From<[f64; N]> for Spot {
    fn from(coords: [f64; N]) -> Self {
        Spot(coords.to_vec())
    }
}

/// What spotiflow can take from a `DetectionRequest`.
///
/// A fixed threshold is used as the probability threshold, so only values in (0, 1] apply.
/// With `remove_duplicates` the lateral spot radius, converted to pixels with the lateral
/// voxel size, becomes the minimum distance between spots.
#[derive(Debug, Clone, PartialEq)]
pub struct SpotiflowSettings {
    pub prob_thresh: Option<f32>,
    pub min_distance: usize,
}

impl SpotiflowSettings {
    pub fn from_request(request: &DetectionRequest) -> Self {
        let prob_thresh = match request.threshold {
            Some(t) if t > 0.0 && t <= 1.0 => Some(t as f32),
            Some(t) => {
                tracing::warn!(
                    threshold = t,
                    "spotiflow needs a probability threshold in (0, 1]; using the model default"
                );
                None
            }
            None => None,
        };

        let min_distance = if request.remove_duplicates {
            match (request.spot_radius.last(), request.voxel_size.last()) {
                (Some(&radius), Some(&voxel)) if voxel > 0.0 => {
                    ((radius / voxel).round() as usize).max(1)
                }
                _ => {
                    tracing::warn!(
                        radius = ?request.spot_radius,
                        voxel_size = ?request.voxel_size,
                        "cannot convert the spot radius to pixels; keeping spots 1 px apart"
                    );
                    1
                }
            }
        } else {
            1
        };

        if request.voxel_size.len() > 2 || request.spot_radius.len() > 2 {
            tracing::warn!("spotiflow detects in 2-D; the axial radius and voxel size are ignored");
        }

        Self {
            prob_thresh,
            min_distance,
        }
    }

    pub fn predict_params(&self) -> PredictParams {
        PredictParams {
            tile: None,
            prob_thresh: self.prob_thresh,
            min_distance: self.min_distance,
            ..Default::default()
        }
    }
}

/// Spotiflow ONNX model wrapper. Works on 2-D images only and does not report a
/// threshold, so a stored threshold is left as it is.
pub struct SpotiflowDetector {
    session: Mutex<SpotiflowSession>,
}

impl SpotiflowDetector {
    /// `model_dir` must contain `model.onnx`.
    pub fn open(model_dir: &Path, cpu: bool) -> Result<Self> {
        let model_path = model_dir.join("model.onnx");
        if !model_path.exists() {
            return Err(Error::ModelNotFound(model_path));
        }
        let session = SpotiflowSession::new(&model_path, cpu)
            .map_err(|e| Error::Collaborator(format!("spotiflow: {}", e)))?;
        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl SpotDetector for SpotiflowDetector {
    fn detect(&self, image: &Image, request: &DetectionRequest) -> Result<Detection> {
        if image.ndim() != 2 {
            return Err(Error::UnsupportedRank(image.ndim()));
        }
        let (h, w) = (image.shape()[0], image.shape()[1]);
        let img_f32: Vec<f32> = image.iter().copied().collect();

        let settings = SpotiflowSettings::from_request(request);
        let (spots, _heatmaps, _flows) = self
            .session
            .lock()
            .predict(&img_f32, h, w, settings.predict_params())
            .map_err(|e| Error::Collaborator(format!("spotiflow: {}", e)))?;

        tracing::debug!(
            spots = spots.len(),
            prob_thresh = ?settings.prob_thresh,
            min_distance = settings.min_distance,
            "spotiflow prediction done"
        );
        Ok(Detection {
            spots: spots
                .into_iter()
                .map(|(y, x)| Spot(vec![y as f64, x as f64]))
                .collect(),
            threshold: None,
        })
    }
}
