//! Contracts for the numerical collaborators the pipeline drives, plus the adapters
//! the CLI wires in. None of the detection algorithms live here.

use image::{ImageBuffer, Luma};
use ndarray::{stack, Array2, ArrayView2, Axis, Ix2};
use std::path::Path;

use crate::error::{Error, Result};
use crate::loader::{self, Image, LabelImage};
use crate::spot::Spot;

pub trait ImageLoader: Send + Sync {
    fn load_image(&self, path: &Path) -> Result<Image>;
    fn load_labels(&self, path: &Path) -> Result<LabelImage>;
}

/// Returns a denoised image of the same shape as the input.
pub trait BackgroundSubtractor: Send + Sync {
    fn subtract(&self, image: &Image, sigma: &[f64]) -> Result<Image>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRequest {
    pub voxel_size: Vec<f64>,
    pub spot_radius: Vec<f64>,
    pub remove_duplicates: bool,
    /// When set the detector computes its own threshold and reports it back.
    pub find_threshold: bool,
    /// `None` when `find_threshold` is set.
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub spots: Vec<Spot>,
    pub threshold: Option<f64>,
}

pub trait SpotDetector: Send + Sync {
    fn detect(&self, image: &Image, request: &DetectionRequest) -> Result<Detection>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecompositionRequest {
    pub voxel_size: Vec<f64>,
    pub spot_radius: Vec<f64>,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Decomposition {
    pub spots: Vec<Spot>,
    pub dense_regions: Vec<Vec<f64>>,
    pub reference_spot: Option<Image>,
}

pub trait DenseRegionDecomposer: Send + Sync {
    fn decompose(
        &self,
        image: &Image,
        spots: &[Spot],
        request: &DecompositionRequest,
    ) -> Result<Decomposition>;
}

/// Reads images and labels from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl ImageLoader for FileLoader {
    fn load_image(&self, path: &Path) -> Result<Image> {
        loader::read_image(path)
    }

    fn load_labels(&self, path: &Path) -> Result<LabelImage> {
        loader::read_labels(path)
    }
}

/// Background removal as `image - gaussian_blur(image)`, clamped at zero, done plane by
/// plane with the `image` crate's blur. Only the lateral sigma (last component) is used.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianBackground;

fn subtract_plane(plane: ArrayView2<f32>, sigma: f32) -> Result<Array2<f32>> {
    let (h, w) = plane.dim();
    let raw: Vec<f32> = plane.iter().copied().collect();
    let buf = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(w as u32, h as u32, raw)
        .ok_or_else(|| Error::Collaborator("plane does not fit its dimensions".into()))?;
    let blurred = image::imageops::blur(&buf, sigma);
    let diff: Vec<f32> = buf
        .as_raw()
        .iter()
        .zip(blurred.as_raw().iter())
        .map(|(&v, &b)| (v - b).max(0.0))
        .collect();
    Ok(Array2::from_shape_vec((h, w), diff)?)
}

impl BackgroundSubtractor for GaussianBackground {
    fn subtract(&self, image: &Image, sigma: &[f64]) -> Result<Image> {
        let lateral = *sigma
            .last()
            .ok_or_else(|| Error::Collaborator("empty sigma".into()))? as f32;
        match image.ndim() {
            2 => {
                let plane = image.view().into_dimensionality::<Ix2>()?;
                Ok(subtract_plane(plane, lateral)?.into_dyn())
            }
            3 => {
                let planes = image
                    .outer_iter()
                    .map(|p| subtract_plane(p.into_dimensionality::<Ix2>()?, lateral))
                    .collect::<Result<Vec<_>>>()?;
                let views: Vec<_> = planes.iter().map(|p| p.view()).collect();
                Ok(stack(Axis(0), &views)?.into_dyn())
            }
            n => Err(Error::UnsupportedRank(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn flat_image_has_no_foreground() {
        let image = ArrayD::from_elem(IxDyn(&[16, 16]), 100.0f32);
        let out = GaussianBackground.subtract(&image, &[2.0, 2.0]).unwrap();
        assert_eq!(out.shape(), image.shape());
        assert!(out.iter().all(|&v| v.abs() < 0.05));
    }

    #[test]
    fn bright_spot_survives_and_stack_keeps_shape() {
        let mut image = ArrayD::zeros(IxDyn(&[2, 15, 15]));
        image[[1, 7, 7]] = 1000.0f32;
        let out = GaussianBackground.subtract(&image, &[0.75, 2.3, 2.3]).unwrap();
        assert_eq!(out.shape(), &[2, 15, 15]);
        assert!(out[[1, 7, 7]] > 0.0);
        assert!(out.iter().all(|&v| v >= 0.0));
        assert!(out.index_axis(Axis(0), 0).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn rank_one_is_rejected() {
        let image = ArrayD::zeros(IxDyn(&[8]));
        assert!(matches!(
            GaussianBackground.subtract(&image, &[1.0]),
            Err(Error::UnsupportedRank(1))
        ));
    }
}
