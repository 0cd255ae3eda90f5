//! Spot → cell assignment and per-cell counting.
//!
//! Each spot is looked up directly in the cytoplasm label map (which cell?) and in the
//! nucleus map (inside a nucleus?). The count table always has one row per distinct label
//! value of the cytoplasm map, so cells without spots show up as zero rows.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::loader::LabelImage;
use crate::spot::Spot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpotEnvironment {
    Background,
    Cytoplasm,
    Nucleus,
}

/// Read the label under `spot`.
///
/// Extra leading spot components are dropped, so a (z, y, x) spot reads a (y, x) map.
/// Extra leading label axes must be collapsed (length 1) and are read at index 0.
/// Coordinates are rounded; anything outside the array is an error.
pub fn label_at(labels: &LabelImage, spot: &Spot) -> Result<u32> {
    let shape = labels.shape();
    let coords = spot.coords();
    let rank = shape.len();

    let mut index = Vec::with_capacity(rank);
    if coords.len() >= rank {
        let aligned = &coords[coords.len() - rank..];
        for (&c, &len) in aligned.iter().zip(shape) {
            index.push(axis_index(c, len).ok_or_else(|| out_of_bounds(spot, shape))?);
        }
    } else {
        let extra = rank - coords.len();
        if shape[..extra].iter().any(|&len| len != 1) {
            return Err(Error::DimensionMismatch {
                spot_dims: coords.len(),
                shape: shape.to_vec(),
            });
        }
        index.resize(extra, 0);
        for (&c, &len) in coords.iter().zip(&shape[extra..]) {
            index.push(axis_index(c, len).ok_or_else(|| out_of_bounds(spot, shape))?);
        }
    }

    labels
        .get(index.as_slice())
        .copied()
        .ok_or_else(|| out_of_bounds(spot, shape))
}

fn axis_index(coord: f64, len: usize) -> Option<usize> {
    let r = coord.round();
    if r.is_finite() && r >= 0.0 && (r as usize) < len {
        Some(r as usize)
    } else {
        None
    }
}

fn out_of_bounds(spot: &Spot, shape: &[usize]) -> Error {
    Error::SpotOutOfBounds {
        spot: spot.0.clone(),
        shape: shape.to_vec(),
    }
}

/// Number of distinct values in a label map, background included.
pub fn count_distinct_labels(labels: &LabelImage) -> usize {
    labels.iter().copied().collect::<HashSet<u32>>().len()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub cell_label_of_spot: Vec<u32>,
    pub nucleus_flag_of_spot: Vec<bool>,
    /// Distinct cytoplasm label values (1 when no cytoplasm map was given).
    pub nr_of_cells: usize,
}

impl Classification {
    pub fn len(&self) -> usize {
        self.cell_label_of_spot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cell_label_of_spot.is_empty()
    }

    pub fn environment_of(&self, i: usize) -> SpotEnvironment {
        if self.nucleus_flag_of_spot[i] {
            SpotEnvironment::Nucleus
        } else if self.cell_label_of_spot[i] == 0 {
            SpotEnvironment::Background
        } else {
            SpotEnvironment::Cytoplasm
        }
    }

    pub fn environment_counts(&self) -> HashMap<SpotEnvironment, usize> {
        let mut counts = HashMap::new();
        for i in 0..self.len() {
            *counts.entry(self.environment_of(i)).or_insert(0) += 1;
        }
        counts
    }
}

/// Classify every spot. `Ok(None)` means there was nothing to classify.
pub fn classify(
    spots: &[Spot],
    cytoplasm: Option<&LabelImage>,
    nuclei: Option<&LabelImage>,
) -> Result<Option<Classification>> {
    if spots.is_empty() {
        return Ok(None);
    }
    let mut cell_label_of_spot = vec![0u32; spots.len()];
    let mut nucleus_flag_of_spot = vec![false; spots.len()];

    for (i, spot) in spots.iter().enumerate() {
        if let Some(labels) = cytoplasm {
            cell_label_of_spot[i] = label_at(labels, spot)?;
        }
        if let Some(mask) = nuclei {
            nucleus_flag_of_spot[i] = label_at(mask, spot)? > 0;
        }
    }

    let nr_of_cells = cytoplasm.map(count_distinct_labels).unwrap_or(1);
    Ok(Some(Classification {
        cell_label_of_spot,
        nucleus_flag_of_spot,
        nr_of_cells,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountRow {
    pub cell: u32,
    pub outside: u64,
    pub inside: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpotCountTable {
    pub rows: Vec<CountRow>,
}

impl SpotCountTable {
    pub fn zeros(nr_of_cells: usize) -> Self {
        Self {
            rows: (0..nr_of_cells)
                .map(|cell| CountRow {
                    cell: cell as u32,
                    outside: 0,
                    inside: 0,
                    total: 0,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total_spots(&self) -> u64 {
        self.rows.iter().map(|r| r.total).sum()
    }
}

/// Spots whose cell label has no row in a table of `nr_of_cells` rows. This happens
/// when label values are not contiguous.
pub fn spots_outside_table(classification: &Classification, nr_of_cells: usize) -> usize {
    classification
        .cell_label_of_spot
        .iter()
        .filter(|&&cell| cell as usize >= nr_of_cells)
        .count()
}

/// One row per cell id `0..nr_of_cells`; pairs without spots count as zero.
pub fn build_count_table(classification: &Classification, nr_of_cells: usize) -> SpotCountTable {
    let dropped = spots_outside_table(classification, nr_of_cells);
    if dropped > 0 {
        tracing::warn!(
            spots = dropped,
            nr_of_cells,
            "spots carry cell labels beyond the table and are not counted; labels are not contiguous"
        );
    }
    let mut counter: HashMap<(u32, bool), u64> = HashMap::new();
    for (&cell, &inside) in classification
        .cell_label_of_spot
        .iter()
        .zip(&classification.nucleus_flag_of_spot)
    {
        *counter.entry((cell, inside)).or_insert(0) += 1;
    }

    let rows = (0..nr_of_cells as u32)
        .map(|cell| {
            let outside = counter.get(&(cell, false)).copied().unwrap_or(0);
            let inside = counter.get(&(cell, true)).copied().unwrap_or(0);
            CountRow {
                cell,
                outside,
                inside,
                total: outside + inside,
            }
        })
        .collect();
    SpotCountTable { rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    fn labels(shape: &[usize], values: Vec<u32>) -> LabelImage {
        ArrayD::from_shape_vec(IxDyn(shape), values).unwrap()
    }

    fn spots(coords: &[[f64; 2]]) -> Vec<Spot> {
        coords.iter().map(|&c| Spot::from(c)).collect()
    }

    #[test]
    fn empty_spots_are_not_classified() {
        let cyto = labels(&[2, 2], vec![0, 1, 1, 0]);
        assert_eq!(classify(&[], Some(&cyto), None).unwrap(), None);
    }

    #[test]
    fn single_background_cell_counts_every_spot_outside() {
        let cyto = ArrayD::zeros(IxDyn(&[255, 255]));
        let nuclei = ArrayD::zeros(IxDyn(&[255, 255]));
        let s = spots(&[
            [10.0, 10.0],
            [20.0, 30.0],
            [100.0, 5.0],
            [254.0, 254.0],
            [0.0, 0.0],
            [128.0, 64.0],
        ]);
        let c = classify(&s, Some(&cyto), Some(&nuclei)).unwrap().unwrap();
        assert_eq!(c.nr_of_cells, 1);
        let table = build_count_table(&c, c.nr_of_cells);
        assert_eq!(
            table.rows,
            vec![CountRow {
                cell: 0,
                outside: 6,
                inside: 0,
                total: 6
            }]
        );
    }

    #[test]
    fn cells_without_spots_still_get_a_row() {
        // cells 0..=3, spots only in cells 1 and 3
        let cyto = labels(&[2, 4], vec![0, 1, 2, 3, 0, 1, 2, 3]);
        let s = spots(&[[0.0, 1.0], [1.0, 1.0], [0.0, 3.0]]);
        let c = classify(&s, Some(&cyto), None).unwrap().unwrap();
        assert_eq!(c.cell_label_of_spot, vec![1, 1, 3]);
        assert_eq!(c.nucleus_flag_of_spot, vec![false; 3]);

        let table = build_count_table(&c, c.nr_of_cells);
        assert_eq!(table.len(), 4);
        assert_eq!(table.rows[2].total, 0);
        assert_eq!(table.rows[1].outside, 2);
        for row in &table.rows {
            assert_eq!(row.inside, 0);
            assert_eq!(row.total, row.outside + row.inside);
        }
        assert_eq!(table.total_spots(), 3);
    }

    #[test]
    fn nucleus_mask_splits_inside_and_outside() {
        let cyto = labels(&[2, 3], vec![1, 1, 1, 2, 2, 2]);
        let nuclei = labels(&[2, 3], vec![0, 255, 0, 0, 0, 9]);
        let s = spots(&[[0.0, 0.0], [0.0, 1.0], [1.0, 2.0], [1.0, 0.0], [0.0, 1.2]]);
        let c = classify(&s, Some(&cyto), Some(&nuclei)).unwrap().unwrap();
        assert_eq!(c.nucleus_flag_of_spot, vec![false, true, true, false, true]);

        // labels {1, 2} → two rows, ids 0 and 1; cell 2 spills out of the table
        let table = build_count_table(&c, c.nr_of_cells);
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.rows[1],
            CountRow {
                cell: 1,
                outside: 1,
                inside: 2,
                total: 3
            }
        );
        assert_eq!(table.rows[0].total, 0);
    }

    #[test]
    fn missing_maps_default_to_background_outside() {
        let s = spots(&[[3.0, 4.0], [5.0, 6.0]]);
        let c = classify(&s, None, None).unwrap().unwrap();
        assert_eq!(c.cell_label_of_spot, vec![0, 0]);
        assert_eq!(c.nucleus_flag_of_spot, vec![false, false]);
        assert_eq!(c.nr_of_cells, 1);
        assert_eq!(build_count_table(&c, 1).rows[0].outside, 2);
    }

    #[test]
    fn out_of_bounds_spot_is_fatal() {
        let cyto = labels(&[2, 2], vec![0, 1, 1, 0]);
        let err = classify(&spots(&[[2.0, 0.0]]), Some(&cyto), None).unwrap_err();
        assert!(matches!(err, Error::SpotOutOfBounds { .. }));
        let err = classify(&spots(&[[-1.0, 0.0]]), Some(&cyto), None).unwrap_err();
        assert!(matches!(err, Error::SpotOutOfBounds { .. }));
    }

    #[test]
    fn three_d_spot_reads_trailing_axes_of_a_plane() {
        let cyto = labels(&[2, 2], vec![0, 4, 5, 6]);
        let spot = Spot::from([7.0, 1.0, 0.0]);
        assert_eq!(label_at(&cyto, &spot).unwrap(), 5);
    }

    #[test]
    fn collapsed_leading_label_axis_is_read_at_zero() {
        let cyto = labels(&[1, 2, 2], vec![0, 4, 5, 6]);
        assert_eq!(label_at(&cyto, &Spot::from([1.0, 1.0])).unwrap(), 6);

        let stack = labels(&[2, 1, 2], vec![0, 4, 5, 6]);
        let err = label_at(&stack, &Spot::from([0.0, 1.0])).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { spot_dims: 2, .. }));
    }

    #[test]
    fn float_coordinates_are_rounded() {
        let cyto = labels(&[2, 2], vec![0, 4, 5, 6]);
        assert_eq!(label_at(&cyto, &Spot::from([0.6, 0.4])).unwrap(), 5);
    }

    #[test]
    fn environments_follow_labels_and_nucleus_flag() {
        let c = Classification {
            cell_label_of_spot: vec![0, 2, 2, 0],
            nucleus_flag_of_spot: vec![false, false, true, true],
            nr_of_cells: 3,
        };
        assert_eq!(c.environment_of(0), SpotEnvironment::Background);
        assert_eq!(c.environment_of(1), SpotEnvironment::Cytoplasm);
        assert_eq!(c.environment_of(2), SpotEnvironment::Nucleus);
        let counts = c.environment_counts();
        assert_eq!(counts[&SpotEnvironment::Nucleus], 2);
        assert_eq!(counts[&SpotEnvironment::Background], 1);
    }

    #[test]
    fn spots_on_non_contiguous_labels_fall_outside_the_table() {
        // labels {0, 1, 5}: three rows, the spot on label 5 has none.
        let cells = labels(&[2, 2], vec![0, 1, 5, 5]);
        let c = classify(&spots(&[[0.0, 1.0], [1.0, 0.0], [1.0, 1.0]]), Some(&cells), None)
            .unwrap()
            .unwrap();
        assert_eq!(c.nr_of_cells, 3);
        assert_eq!(spots_outside_table(&c, c.nr_of_cells), 2);
        let table = build_count_table(&c, c.nr_of_cells);
        assert_eq!(table.len(), 3);
        assert_eq!(table.total_spots(), 1);
    }

    #[test]
    fn zeros_table_has_requested_rows() {
        let t = SpotCountTable::zeros(3);
        assert_eq!(t.len(), 3);
        assert_eq!(t.rows[2].cell, 2);
        assert_eq!(t.total_spots(), 0);
        assert!(!t.is_empty());
        assert!(SpotCountTable::zeros(0).is_empty());
    }
}
