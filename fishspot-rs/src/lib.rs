//! FISH spot detection and per-cell spot counting.
//!
//! `ParameterStore` holds the shared parameters, `Session` runs the steps on one image and
//! `BatchRunner` replays them over many images into one count report. Detection, background
//! removal and dense-region decomposition are pluggable through the traits in [`collab`].

pub mod app;
pub mod batch;
pub mod classify;
pub mod cli;
pub mod collab;
pub mod count;
pub mod detect;
pub mod error;
pub mod loader;
pub mod logging;
pub mod params;
pub mod pipeline;
pub mod report;
pub mod spot;
pub mod stages;
pub mod worker;

pub use app::Session;
pub use error::{Error, Result};
pub use params::{ParameterChange, ParameterStore, Parameters};
pub use pipeline::{BatchRequest, BatchRunner, Toolkit};
