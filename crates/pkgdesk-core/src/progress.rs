use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use crate::models::ProgressState;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ProgressCounters {
    pub started: u64,
    pub stopped: u64,
}

/// Single process-wide "operation in progress" indicator.
///
/// There is no stacking: a `start` while active replaces title and message, and a
/// single `stop` clears the indicator. Work that runs inside another operation uses
/// [`ProgressReporter::begin_nested`] instead, which borrows the display without
/// taking ownership of the indicator. Cancellation is recorded for observers only;
/// nothing here interrupts engine calls.
pub struct ProgressReporter {
    state: watch::Sender<ProgressState>,
    started: AtomicU64,
    stopped: AtomicU64,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (state, _receiver) = watch::channel(ProgressState::default());
        Self {
            state,
            started: AtomicU64::new(0),
            stopped: AtomicU64::new(0),
        }
    }

    pub fn start(&self, title: &str, message: &str, package: Option<&str>) {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.state.send_modify(|state| {
            if !state.is_active {
                state.cancellation_requested = false;
            }
            state.is_active = true;
            state.title = title.to_string();
            state.message = message.to_string();
            state.package = package.map(str::to_string);
        });
        tracing::debug!(title, message, package, "progress started");
    }

    /// Starts progress and returns a guard that stops it when dropped.
    pub fn begin(&self, title: &str, message: &str, package: Option<&str>) -> ProgressGuard<'_> {
        self.start(title, message, package);
        ProgressGuard {
            reporter: self,
            release: Release::Stop,
        }
    }

    /// Like [`ProgressReporter::begin`], unless progress is already active.
    ///
    /// In that case the indicator stays with the running operation: only the display
    /// changes, no start is counted, and dropping the guard puts the operation's
    /// title and message back instead of stopping.
    pub fn begin_nested(
        &self,
        title: &str,
        message: &str,
        package: Option<&str>,
    ) -> ProgressGuard<'_> {
        let mut outer = None;
        self.state.send_modify(|state| {
            if state.is_active {
                outer = Some(Banner::capture(state));
            } else {
                state.is_active = true;
                state.cancellation_requested = false;
            }
            Banner::new(title, message, package).apply(state);
        });

        match outer {
            Some(outer) => {
                tracing::debug!(title, message, outer = %outer.title, "progress nested");
                ProgressGuard {
                    reporter: self,
                    release: Release::Restore(outer),
                }
            }
            None => {
                self.started.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(title, message, package, "progress started");
                ProgressGuard {
                    reporter: self,
                    release: Release::Stop,
                }
            }
        }
    }

    /// Clears the indicator. Calling it while inactive is a no-op for observers.
    pub fn stop(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        self.state.send_if_modified(|state| {
            if !state.is_active && !state.cancellation_requested {
                return false;
            }
            state.is_active = false;
            state.cancellation_requested = false;
            true
        });
    }

    /// Records a cancellation request; returns `false` when nothing is in progress.
    pub fn request_cancellation(&self) -> bool {
        let mut accepted = false;
        self.state.send_if_modified(|state| {
            if !state.is_active || state.cancellation_requested {
                accepted = state.is_active;
                return false;
            }
            state.cancellation_requested = true;
            accepted = true;
            true
        });
        if accepted {
            tracing::info!("progress cancellation requested");
        }
        accepted
    }

    pub fn is_active(&self) -> bool {
        self.state.borrow().is_active
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.state.borrow().cancellation_requested
    }

    pub fn snapshot(&self) -> ProgressState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ProgressState> {
        self.state.subscribe()
    }

    pub fn counters(&self) -> ProgressCounters {
        ProgressCounters {
            started: self.started.load(Ordering::SeqCst),
            stopped: self.stopped.load(Ordering::SeqCst),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct Banner {
    title: String,
    message: String,
    package: Option<String>,
}

impl Banner {
    fn new(title: &str, message: &str, package: Option<&str>) -> Self {
        Self {
            title: title.to_string(),
            message: message.to_string(),
            package: package.map(str::to_string),
        }
    }

    fn capture(state: &ProgressState) -> Self {
        Self {
            title: state.title.clone(),
            message: state.message.clone(),
            package: state.package.clone(),
        }
    }

    fn apply(self, state: &mut ProgressState) {
        state.title = self.title;
        state.message = self.message;
        state.package = self.package;
    }
}

enum Release {
    Stop,
    Restore(Banner),
}

#[must_use = "dropping the guard ends its progress display immediately"]
pub struct ProgressGuard<'a> {
    reporter: &'a ProgressReporter,
    release: Release,
}

impl ProgressGuard<'_> {
    pub fn update(&self, title: &str, message: &str, package: Option<&str>) {
        self.reporter
            .state
            .send_modify(|state| Banner::new(title, message, package).apply(state));
    }
}

impl Drop for ProgressGuard<'_> {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.release, Release::Stop) {
            Release::Stop => self.reporter.stop(),
            // The outer operation may already have stopped; leave it stopped.
            Release::Restore(outer) => {
                self.reporter.state.send_if_modified(|state| {
                    if !state.is_active {
                        return false;
                    }
                    outer.apply(state);
                    true
                });
            }
        }
    }
}
