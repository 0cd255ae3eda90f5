//! Interactive application model: the current image, the last background-corrected result,
//! the last detected spots and their classification. Parameters live in the shared store so
//! a batch run and the interactive session always see the same values.

use std::sync::Arc;

use crate::classify::{build_count_table, classify, Classification, SpotCountTable};
use crate::collab::{BackgroundSubtractor, DenseRegionDecomposer, SpotDetector};
use crate::error::{Error, Result};
use crate::loader::{Image, LabelImage};
use crate::params::ParameterStore;
use crate::spot::Spot;
use crate::stages;

pub struct Session {
    params: Arc<ParameterStore>,
    data: Option<Image>,
    result: Option<Image>,
    spots: Option<Vec<Spot>>,
    classification: Option<Classification>,
}

impl Session {
    pub fn new(params: Arc<ParameterStore>) -> Self {
        Self {
            params,
            data: None,
            result: None,
            spots: None,
            classification: None,
        }
    }

    pub fn params(&self) -> &Arc<ParameterStore> {
        &self.params
    }

    /// Replace the working image; earlier results no longer apply to it.
    pub fn set_data(&mut self, data: Image) {
        self.data = Some(stages::squeeze_leading(data));
        self.result = None;
        self.spots = None;
        self.classification = None;
    }

    pub fn data(&self) -> Option<&Image> {
        self.data.as_ref()
    }

    pub fn result(&self) -> Option<&Image> {
        self.result.as_ref()
    }

    pub fn spots(&self) -> Option<&[Spot]> {
        self.spots.as_deref()
    }

    pub fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }

    /// Background-corrected image if there is one, otherwise the raw data.
    fn working_image(&self) -> Result<&Image> {
        self.result
            .as_ref()
            .or(self.data.as_ref())
            .ok_or(Error::NoImage)
    }

    pub fn subtract_background(&mut self, subtractor: &dyn BackgroundSubtractor) -> Result<()> {
        let data = self
            .data
            .as_ref()
            .ok_or(Error::NoImage)?;
        self.result = Some(stages::subtract_background(subtractor, data, &self.params)?);
        Ok(())
    }

    pub fn detect_spots(&mut self, detector: &dyn SpotDetector, scale: &[f64]) -> Result<&[Spot]> {
        let spots = stages::detect_spots(detector, self.working_image()?, &self.params, scale)?;
        self.classification = None;
        Ok(self.spots.insert(spots).as_slice())
    }

    pub fn decompose_dense_regions(
        &mut self,
        decomposer: &dyn DenseRegionDecomposer,
        scale: &[f64],
    ) -> Result<&[Spot]> {
        let spots = self.spots.as_deref().unwrap_or(&[]);
        let new_spots = stages::decompose_dense_regions(
            decomposer,
            self.working_image()?,
            spots,
            &self.params,
            scale,
        )?;
        self.classification = None;
        Ok(self.spots.insert(new_spots).as_slice())
    }

    /// Classify the current spots. Returns `false` when there are no spots to classify.
    pub fn count_spots(
        &mut self,
        cytoplasm: Option<&LabelImage>,
        nuclei: Option<&LabelImage>,
    ) -> Result<bool> {
        let spots = self.spots.as_deref().unwrap_or(&[]);
        self.classification = classify(spots, cytoplasm, nuclei)?;
        Ok(self.classification.is_some())
    }

    pub fn spot_count_table(&self) -> Option<SpotCountTable> {
        self.classification
            .as_ref()
            .map(|c| build_count_table(c, c.nr_of_cells))
    }
}
