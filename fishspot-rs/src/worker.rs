//! Long-running operations run on their own thread and hand back exactly one result.

use crossbeam_channel::{Receiver, TryRecvError};
use indicatif::{ProgressBar, ProgressStyle};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Error, Result};

pub struct Operation<T> {
    name: String,
    receiver: Receiver<Result<T>>,
    handle: Option<JoinHandle<()>>,
}

/// Start `job` on a named background thread.
pub fn spawn_operation<T, F>(name: &str, job: F) -> Result<Operation<T>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(1);
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let _ = tx.send(job());
        })?;
    tracing::debug!(operation = name, "dispatched");
    Ok(Operation {
        name: name.to_string(),
        receiver: rx,
        handle: Some(handle),
    })
}

impl<T> Operation<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the operation finishes.
    pub fn wait(mut self) -> Result<T> {
        let outcome = self.receiver.recv();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::Worker(format!("{} stopped without a result", self.name))),
        }
    }

    /// The result if the operation has finished, `None` while it is still running.
    pub fn try_result(&mut self) -> Option<Result<T>> {
        match self.receiver.try_recv() {
            Ok(result) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(Error::Worker(format!(
                "{} stopped without a result",
                self.name
            )))),
        }
    }

    /// Wait with a spinner on stderr, then hand the result to `on_complete` on this thread.
    pub fn wait_with_ticker<R>(self, message: &str, on_complete: impl FnOnce(Result<T>) -> R) -> R {
        let ticker = Ticker::start(message);
        let result = self.wait();
        ticker.stop();
        on_complete(result)
    }
}

/// Indeterminate progress spinner, stopped explicitly when its operation completes.
pub struct Ticker {
    bar: ProgressBar,
}

impl Ticker {
    pub fn start(message: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
            bar.set_style(style);
        }
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    pub fn stop(self) {
        self.bar.finish_and_clear();
    }
}
