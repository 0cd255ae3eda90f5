use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),
    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("spot {spot:?} lies outside the label array of shape {shape:?}")]
    SpotOutOfBounds { spot: Vec<f64>, shape: Vec<usize> },
    #[error("cannot index a label array of shape {shape:?} with a {spot_dims}-D spot")]
    DimensionMismatch { spot_dims: usize, shape: Vec<usize> },
    #[error("scale {scale:?} has fewer components than the image rank {rank}")]
    MalformedScale { scale: Vec<f64>, rank: usize },
    #[error("unsupported image rank {0} (need 2-D or 3-D)")]
    UnsupportedRank(usize),
    #[error("unsupported pixel format: {0}")]
    UnsupportedPixelFormat(String),
    #[error("{0}")]
    Collaborator(String),
    #[error("no {0} available")]
    MissingCollaborator(&'static str),
    #[error("no image loaded")]
    NoImage,
    #[error("model not found at {}", .0.display())]
    ModelNotFound(PathBuf),
    #[error("worker failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, Error>;
