//! Image and label-map loading. Multi-page TIFFs become (z, y, x) stacks; every other
//! format the `image` crate understands is read as a single grayscale plane.

use ndarray::{ArrayD, IxDyn};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

pub type Image = ArrayD<f32>;
pub type LabelImage = ArrayD<u32>;

fn is_tiff(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("tif") | Some("tiff")
    )
}

/// Decode one TIFF page into f64 samples so both intensity and label callers can narrow.
fn page_values(result: tiff::decoder::DecodingResult) -> Result<Vec<f64>> {
    use tiff::decoder::DecodingResult;
    let values = match result {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
        _ => {
            return Err(Error::UnsupportedPixelFormat(
                "TIFF sample type (need 8/16/32-bit integer or float)".into(),
            ))
        }
    };
    Ok(values)
}

fn read_tiff_stack(path: &Path) -> Result<(Vec<usize>, Vec<f64>)> {
    let file = fs::File::open(path)?;
    let mut decoder = tiff::decoder::Decoder::new(file)?;
    let (width, height) = decoder.dimensions()?;
    let plane = width as usize * height as usize;

    let mut data = Vec::new();
    let mut pages = 0usize;
    loop {
        let (w, h) = decoder.dimensions()?;
        if (w, h) != (width, height) {
            return Err(Error::UnsupportedPixelFormat(format!(
                "TIFF page {} is {}x{}, first page is {}x{}",
                pages, w, h, width, height
            )));
        }
        let values = page_values(decoder.read_image()?)?;
        if values.len() != plane {
            return Err(Error::UnsupportedPixelFormat(
                "multi-channel TIFF pages are not supported".into(),
            ));
        }
        data.extend(values);
        pages += 1;
        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }

    let shape = if pages > 1 {
        vec![pages, height as usize, width as usize]
    } else {
        vec![height as usize, width as usize]
    };
    Ok((shape, data))
}

fn read_plane(path: &Path) -> Result<(Vec<usize>, Vec<f64>)> {
    let img = image::open(path)?.into_luma16();
    let (width, height) = img.dimensions();
    let data = img.into_raw().into_iter().map(f64::from).collect();
    Ok((vec![height as usize, width as usize], data))
}

fn read_any(path: &Path) -> Result<(Vec<usize>, Vec<f64>)> {
    if is_tiff(path) {
        read_tiff_stack(path)
    } else {
        read_plane(path)
    }
}

pub fn read_image(path: &Path) -> Result<Image> {
    let (shape, data) = read_any(path)?;
    let data = data.into_iter().map(|v| v as f32).collect();
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), data)?)
}

/// Labels are non-negative integers; float or signed samples are truncated and clamped at 0.
pub fn read_labels(path: &Path) -> Result<LabelImage> {
    let (shape, data) = read_any(path)?;
    let data = data.into_iter().map(|v| v.max(0.0) as u32).collect();
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), data)?)
}
