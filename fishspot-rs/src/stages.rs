//! Per-image pipeline steps shared by the interactive session and the batch runner.
//!
//! Everything dimension-dependent (sigma, radii, voxel scale) is derived from the rank of
//! the image actually being processed.

use ndarray::Axis;

use crate::collab::{
    BackgroundSubtractor, DecompositionRequest, DenseRegionDecomposer, DetectionRequest,
    SpotDetector,
};
use crate::error::{Error, Result};
use crate::loader::Image;
use crate::params::ParameterStore;
use crate::spot::Spot;

/// Drop leading length-1 axes (a collapsed scene or z axis) until the image is 2-D.
pub fn squeeze_leading(mut image: Image) -> Image {
    while image.ndim() > 2 && image.shape()[0] == 1 {
        image = image.index_axis_move(Axis(0), 0);
    }
    image
}

/// Keep the trailing `rank` components of a voxel scale.
pub fn align_scale(scale: &[f64], rank: usize) -> Result<Vec<f64>> {
    if scale.len() < rank {
        return Err(Error::MalformedScale {
            scale: scale.to_vec(),
            rank,
        });
    }
    Ok(scale[scale.len() - rank..].to_vec())
}

/// (xy, xy) for planes, (z, xy, xy) for stacks.
pub fn axis_tuple(xy: f64, z: f64, rank: usize) -> Result<Vec<f64>> {
    match rank {
        2 => Ok(vec![xy, xy]),
        3 => Ok(vec![z, xy, xy]),
        n => Err(Error::UnsupportedRank(n)),
    }
}

pub fn subtract_background(
    subtractor: &dyn BackgroundSubtractor,
    image: &Image,
    params: &ParameterStore,
) -> Result<Image> {
    let sigma = axis_tuple(params.sigma_xy(), params.sigma_z(), image.ndim())?;
    tracing::info!(?sigma, "subtracting background");
    subtractor.subtract(image, &sigma)
}

/// Run detection with the current parameters. In find-threshold mode a threshold reported
/// by the detector is written back into the shared store.
pub fn detect_spots(
    detector: &dyn SpotDetector,
    image: &Image,
    params: &ParameterStore,
    scale: &[f64],
) -> Result<Vec<Spot>> {
    let rank = image.ndim();
    let find_threshold = params.find_threshold();
    let request = DetectionRequest {
        voxel_size: align_scale(scale, rank)?,
        spot_radius: axis_tuple(params.radius_xy(), params.radius_z(), rank)?,
        remove_duplicates: params.remove_duplicates(),
        find_threshold,
        threshold: if find_threshold {
            None
        } else {
            Some(params.threshold())
        },
    };
    tracing::info!(
        threshold = ?request.threshold,
        radius = ?request.spot_radius,
        remove_duplicates = request.remove_duplicates,
        find_threshold,
        "detecting spots"
    );
    let detection = detector.detect(image, &request)?;
    if find_threshold {
        match detection.threshold {
            Some(t) => params.set_threshold(t),
            None => tracing::warn!("detector did not report a threshold; keeping the stored one"),
        }
    }
    Ok(detection.spots)
}

pub fn decompose_dense_regions(
    decomposer: &dyn DenseRegionDecomposer,
    image: &Image,
    spots: &[Spot],
    params: &ParameterStore,
    scale: &[f64],
) -> Result<Vec<Spot>> {
    let rank = image.ndim();
    let request = DecompositionRequest {
        voxel_size: align_scale(scale, rank)?,
        spot_radius: axis_tuple(params.decompose_radius_xy(), params.decompose_radius_z(), rank)?,
        alpha: params.alpha(),
        beta: params.beta(),
        gamma: params.gamma(),
    };
    let decomposition = decomposer.decompose(image, spots, &request)?;
    tracing::info!(
        before = spots.len(),
        after = decomposition.spots.len(),
        dense_regions = decomposition.dense_regions.len(),
        "decomposed dense regions"
    );
    Ok(decomposition.spots)
}
