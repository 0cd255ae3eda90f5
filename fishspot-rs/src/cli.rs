//! Arguments shared by the `detect` and `batch` commands.

use clap::Args;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::params::{ParameterStore, Parameters};

#[derive(Args, Clone, Debug, Default)]
pub struct ParamArgs {
    /// JSON file with pipeline parameters (missing keys keep their defaults)
    #[arg(long)]
    pub params: Option<String>,
    #[arg(long)]
    pub sigma_xy: Option<f64>,
    #[arg(long)]
    pub sigma_z: Option<f64>,
    /// Detection threshold, used with --fixed-threshold. The spotiflow detector reads it
    /// as a probability and ignores values outside (0, 1]
    #[arg(long)]
    pub threshold: Option<f64>,
    /// Expected spot radius in the xy plane (same unit as --scale). With duplicate removal
    /// the spotiflow detector keeps spots at least this far apart
    #[arg(long)]
    pub radius_xy: Option<f64>,
    /// Axial spot radius; unused by the 2-D spotiflow detector
    #[arg(long)]
    pub radius_z: Option<f64>,
    #[arg(long)]
    pub decompose_radius_xy: Option<f64>,
    #[arg(long)]
    pub decompose_radius_z: Option<f64>,
    #[arg(long)]
    pub alpha: Option<f64>,
    #[arg(long)]
    pub beta: Option<f64>,
    #[arg(long)]
    pub gamma: Option<f64>,
    #[arg(long)]
    pub no_remove_duplicates: bool,
    /// Use --threshold instead of letting the detector find one
    #[arg(long)]
    pub fixed_threshold: bool,
    /// Write the effective parameters (including a found threshold) here when done
    #[arg(long)]
    pub save_params: Option<String>,
}

impl ParamArgs {
    pub fn resolve(&self) -> Result<Parameters> {
        let mut p = match &self.params {
            Some(path) => Parameters::load(Path::new(path))?,
            None => Parameters::default(),
        };
        let overrides = [
            (self.sigma_xy, &mut p.sigma_xy),
            (self.sigma_z, &mut p.sigma_z),
            (self.threshold, &mut p.threshold),
            (self.radius_xy, &mut p.radius_xy),
            (self.radius_z, &mut p.radius_z),
            (self.decompose_radius_xy, &mut p.decompose_radius_xy),
            (self.decompose_radius_z, &mut p.decompose_radius_z),
            (self.alpha, &mut p.alpha),
            (self.beta, &mut p.beta),
            (self.gamma, &mut p.gamma),
        ];
        for (value, field) in overrides {
            if let Some(v) = value {
                *field = v;
            }
        }
        if self.no_remove_duplicates {
            p.remove_duplicates = false;
        }
        if self.fixed_threshold {
            p.find_threshold = false;
        }
        Ok(p)
    }

    pub fn save(&self, store: &ParameterStore) -> Result<()> {
        if let Some(path) = &self.save_params {
            store.snapshot().save(Path::new(path))?;
            tracing::info!(path = %path, "saved parameters");
        }
        Ok(())
    }
}

/// Files directly inside `dir` whose names match `pattern`, sorted by name.
pub fn discover_images(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let re = Regex::new(pattern)?;
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if re.is_match(&entry.file_name().to_string_lossy()) {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

/// "" in a path list means "none for this image".
pub fn optional_paths(paths: &[String]) -> Option<Vec<Option<PathBuf>>> {
    if paths.is_empty() {
        return None;
    }
    Some(
        paths
            .iter()
            .map(|p| (!p.trim().is_empty()).then(|| PathBuf::from(p)))
            .collect(),
    )
}
