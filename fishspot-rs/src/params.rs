//! Pipeline parameters shared between the interactive session and the batch runner.
//!
//! A single `ParameterStore` is created per session and handed out as `Arc<ParameterStore>`.
//! Every setter updates the state immediately and then notifies all listeners, so a
//! batch run that discovers a threshold (`find_threshold`) leaves that threshold visible
//! to whoever reads the store next.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    pub sigma_xy: f64,
    pub sigma_z: f64,
    pub threshold: f64,
    pub radius_xy: f64,
    pub radius_z: f64,
    pub decompose_radius_xy: f64,
    pub decompose_radius_z: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub remove_duplicates: bool,
    pub find_threshold: bool,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            sigma_xy: 2.3,
            sigma_z: 0.75,
            threshold: 15.0,
            radius_xy: 340.0,
            radius_z: 2500.0,
            decompose_radius_xy: 340.0,
            decompose_radius_z: 2500.0,
            alpha: 0.5,
            beta: 1.0,
            gamma: 5.0,
            remove_duplicates: true,
            find_threshold: true,
        }
    }
}

impl Parameters {
    /// Read parameters from a JSON file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&s)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Notification emitted after a setter ran. Paired values always carry the current
/// other half so observers see a consistent pair.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterChange {
    Sigma { xy: f64, z: f64 },
    Threshold(f64),
    Radius { xy: f64, z: f64 },
    DecomposeRadius { xy: f64, z: f64 },
    Decomposition { alpha: f64, beta: f64, gamma: f64 },
    RemoveDuplicates(bool),
    FindThreshold(bool),
}

/// Returns `false` once it no longer wants notifications.
type Listener = Arc<dyn Fn(&ParameterChange) -> bool + Send + Sync>;

#[derive(Default)]
pub struct ParameterStore {
    state: Mutex<Parameters>,
    listeners: RwLock<Vec<Listener>>,
}

impl ParameterStore {
    pub fn new(params: Parameters) -> Self {
        Self {
            state: Mutex::new(params),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a callback that runs synchronously after every change.
    pub fn subscribe(&self, listener: impl Fn(&ParameterChange) + Send + Sync + 'static) {
        self.listeners.write().push(Arc::new(move |change| {
            listener(change);
            true
        }));
    }

    /// Receive changes over a channel instead of a callback. The sender is dropped from
    /// the listener list once the receiver is gone.
    pub fn channel(&self) -> Receiver<ParameterChange> {
        let (tx, rx): (Sender<ParameterChange>, Receiver<ParameterChange>) =
            crossbeam_channel::unbounded();
        self.listeners
            .write()
            .push(Arc::new(move |change| tx.send(change.clone()).is_ok()));
        rx
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn notify(&self, change: ParameterChange) {
        // No lock is held while listeners run: they may read, set or subscribe.
        let listeners: Vec<Listener> = self.listeners.read().clone();
        let finished: Vec<Listener> = listeners
            .into_iter()
            .filter(|listener| !listener(&change))
            .collect();
        if !finished.is_empty() {
            self.listeners
                .write()
                .retain(|l| !finished.iter().any(|f| Arc::ptr_eq(l, f)));
        }
    }

    pub fn snapshot(&self) -> Parameters {
        self.state.lock().clone()
    }

    /// Apply a whole configuration and emit every logical change.
    pub fn replace(&self, params: Parameters) {
        *self.state.lock() = params.clone();
        self.notify(ParameterChange::Sigma {
            xy: params.sigma_xy,
            z: params.sigma_z,
        });
        self.notify(ParameterChange::Threshold(params.threshold));
        self.notify(ParameterChange::Radius {
            xy: params.radius_xy,
            z: params.radius_z,
        });
        self.notify(ParameterChange::DecomposeRadius {
            xy: params.decompose_radius_xy,
            z: params.decompose_radius_z,
        });
        self.notify(ParameterChange::Decomposition {
            alpha: params.alpha,
            beta: params.beta,
            gamma: params.gamma,
        });
        self.notify(ParameterChange::RemoveDuplicates(params.remove_duplicates));
        self.notify(ParameterChange::FindThreshold(params.find_threshold));
    }

    pub fn sigma_xy(&self) -> f64 {
        self.state.lock().sigma_xy
    }

    pub fn sigma_z(&self) -> f64 {
        self.state.lock().sigma_z
    }

    pub fn set_sigma_xy(&self, sigma_xy: f64) {
        let change = {
            let mut p = self.state.lock();
            p.sigma_xy = sigma_xy;
            ParameterChange::Sigma {
                xy: sigma_xy,
                z: p.sigma_z,
            }
        };
        self.notify(change);
    }

    pub fn set_sigma_z(&self, sigma_z: f64) {
        let change = {
            let mut p = self.state.lock();
            p.sigma_z = sigma_z;
            ParameterChange::Sigma {
                xy: p.sigma_xy,
                z: sigma_z,
            }
        };
        self.notify(change);
    }

    pub fn threshold(&self) -> f64 {
        self.state.lock().threshold
    }

    pub fn set_threshold(&self, threshold: f64) {
        self.state.lock().threshold = threshold;
        self.notify(ParameterChange::Threshold(threshold));
    }

    pub fn radius_xy(&self) -> f64 {
        self.state.lock().radius_xy
    }

    pub fn radius_z(&self) -> f64 {
        self.state.lock().radius_z
    }

    pub fn set_radius_xy(&self, radius: f64) {
        let change = {
            let mut p = self.state.lock();
            p.radius_xy = radius;
            ParameterChange::Radius {
                xy: radius,
                z: p.radius_z,
            }
        };
        self.notify(change);
    }

    pub fn set_radius_z(&self, radius: f64) {
        let change = {
            let mut p = self.state.lock();
            p.radius_z = radius;
            ParameterChange::Radius {
                xy: p.radius_xy,
                z: radius,
            }
        };
        self.notify(change);
    }

    pub fn decompose_radius_xy(&self) -> f64 {
        self.state.lock().decompose_radius_xy
    }

    pub fn decompose_radius_z(&self) -> f64 {
        self.state.lock().decompose_radius_z
    }

    pub fn set_decompose_radius_xy(&self, radius: f64) {
        let change = {
            let mut p = self.state.lock();
            p.decompose_radius_xy = radius;
            ParameterChange::DecomposeRadius {
                xy: radius,
                z: p.decompose_radius_z,
            }
        };
        self.notify(change);
    }

    pub fn set_decompose_radius_z(&self, radius: f64) {
        let change = {
            let mut p = self.state.lock();
            p.decompose_radius_z = radius;
            ParameterChange::DecomposeRadius {
                xy: p.decompose_radius_xy,
                z: radius,
            }
        };
        self.notify(change);
    }

    pub fn alpha(&self) -> f64 {
        self.state.lock().alpha
    }

    pub fn beta(&self) -> f64 {
        self.state.lock().beta
    }

    pub fn gamma(&self) -> f64 {
        self.state.lock().gamma
    }

    fn decomposition_change(p: &Parameters) -> ParameterChange {
        ParameterChange::Decomposition {
            alpha: p.alpha,
            beta: p.beta,
            gamma: p.gamma,
        }
    }

    pub fn set_alpha(&self, alpha: f64) {
        let change = {
            let mut p = self.state.lock();
            p.alpha = alpha;
            Self::decomposition_change(&p)
        };
        self.notify(change);
    }

    pub fn set_beta(&self, beta: f64) {
        let change = {
            let mut p = self.state.lock();
            p.beta = beta;
            Self::decomposition_change(&p)
        };
        self.notify(change);
    }

    pub fn set_gamma(&self, gamma: f64) {
        let change = {
            let mut p = self.state.lock();
            p.gamma = gamma;
            Self::decomposition_change(&p)
        };
        self.notify(change);
    }

    pub fn remove_duplicates(&self) -> bool {
        self.state.lock().remove_duplicates
    }

    pub fn set_remove_duplicates(&self, on: bool) {
        self.state.lock().remove_duplicates = on;
        self.notify(ParameterChange::RemoveDuplicates(on));
    }

    pub fn find_threshold(&self) -> bool {
        self.state.lock().find_threshold
    }

    pub fn set_find_threshold(&self, on: bool) {
        self.state.lock().find_threshold = on;
        self.notify(ParameterChange::FindThreshold(on));
    }
}
