use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::gateway::EngineGateway;
use crate::mapping::PackageMapper;
use crate::models::{CoreError, EngineOperation, EnginePackage, PackageRecord};
use crate::orchestration::OrchestrationResult;
use crate::progress::ProgressReporter;

/// Immutable installed-package listing. Replaced wholesale, never edited in place.
pub type InstalledSnapshot = Arc<[PackageRecord]>;

type RefreshOutcome = Result<InstalledSnapshot, CoreError>;

const REFRESH_TITLE: &str = "Package Service";
const REFRESH_MESSAGE: &str = "Retrieving installed packages...";

/// Last known installed-package listing with single-flight refresh.
///
/// At most one engine list call is in flight per cache. Every caller that arrives
/// while a refresh runs, forced or not, waits for that refresh and receives its
/// result, unless the cache was invalidated after that refresh started: such a
/// refresh can no longer answer anyone, so the caller waits it out and issues a new
/// one. The refresh runs in its own task, so a caller giving up never strands the
/// others, and a panicking refresh still settles its waiters.
#[derive(Clone)]
pub struct InstalledPackageCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    gateway: Arc<dyn EngineGateway>,
    mapper: Arc<dyn PackageMapper>,
    progress: Arc<ProgressReporter>,
    state: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    generation: u64,
    slot: CacheSlot,
}

#[derive(Default)]
enum CacheSlot {
    #[default]
    Empty,
    Populated(InstalledSnapshot),
    Refreshing {
        previous: Option<InstalledSnapshot>,
        started_generation: u64,
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Freshness {
    Cached,
    Forced,
    Since(u64),
}

impl InstalledPackageCache {
    pub fn new(
        gateway: Arc<dyn EngineGateway>,
        mapper: Arc<dyn PackageMapper>,
        progress: Arc<ProgressReporter>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                gateway,
                mapper,
                progress,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Returns the installed packages, calling the engine only on a miss or when
    /// `force` is set.
    pub async fn get(&self, force: bool) -> OrchestrationResult<InstalledSnapshot> {
        let freshness = if force {
            Freshness::Forced
        } else {
            Freshness::Cached
        };
        self.acquire(freshness).await
    }

    /// Returns a listing produced by a refresh that started at or after `generation`.
    ///
    /// A refresh already in flight from an older generation is waited out first, then
    /// a new one is issued; the two never overlap.
    pub async fn refresh_since(&self, generation: u64) -> OrchestrationResult<InstalledSnapshot> {
        self.acquire(Freshness::Since(generation)).await
    }

    /// Drops the cached listing so the next `get` calls the engine. Returns the new
    /// generation.
    ///
    /// A refresh in flight keeps answering the waiters that joined before this call, but
    /// its result is not stored.
    pub fn invalidate(&self) -> u64 {
        let mut state = self.inner.lock_state();
        state.generation = state.generation.saturating_add(1);
        if matches!(state.slot, CacheSlot::Populated(_)) {
            state.slot = CacheSlot::Empty;
        } else if let CacheSlot::Refreshing { previous, .. } = &mut state.slot {
            *previous = None;
        }
        tracing::debug!(generation = state.generation, "installed package cache invalidated");
        state.generation
    }

    /// Current listing without waiting or calling the engine.
    pub fn peek(&self) -> Option<InstalledSnapshot> {
        match &self.inner.lock_state().slot {
            CacheSlot::Populated(snapshot) => Some(snapshot.clone()),
            CacheSlot::Refreshing { previous, .. } => previous.clone(),
            CacheSlot::Empty => None,
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self.inner.lock_state().slot, CacheSlot::Refreshing { .. })
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock_state().generation
    }

    async fn acquire(&self, freshness: Freshness) -> OrchestrationResult<InstalledSnapshot> {
        loop {
            let (receiver, stale) = {
                let mut state = self.inner.try_lock_state()?;
                let generation = state.generation;
                let (sender, receiver) = oneshot::channel();

                match &mut state.slot {
                    CacheSlot::Populated(snapshot) if freshness != Freshness::Forced => {
                        tracing::debug!(packages = snapshot.len(), "installed package cache hit");
                        return Ok(snapshot.clone());
                    }
                    CacheSlot::Refreshing {
                        started_generation,
                        waiters,
                        ..
                    } => {
                        waiters.push(sender);
                        let required = match freshness {
                            Freshness::Since(min) => min.max(generation),
                            Freshness::Cached | Freshness::Forced => generation,
                        };
                        let stale = *started_generation < required;
                        tracing::debug!(
                            waiters = waiters.len(),
                            stale,
                            "joining in-flight installed package refresh"
                        );
                        (receiver, stale)
                    }
                    slot => {
                        let previous = match std::mem::take(slot) {
                            CacheSlot::Populated(snapshot) => Some(snapshot),
                            _ => None,
                        };
                        *slot = CacheSlot::Refreshing {
                            previous,
                            started_generation: generation,
                            waiters: vec![sender],
                        };
                        tokio::spawn(run_refresh(self.inner.clone(), generation));
                        (receiver, false)
                    }
                }
            };

            let outcome = receiver.await.map_err(|_| {
                CoreError::internal("installed package refresh ended without a result")
                    .with_operation(EngineOperation::List)
            })?;

            if !stale {
                return outcome;
            }
        }
    }
}

impl CacheInner {
    fn try_lock_state(&self) -> OrchestrationResult<MutexGuard<'_, CacheState>> {
        self.state.lock().map_err(|_| {
            CoreError::internal("installed package cache mutex poisoned")
                .with_operation(EngineOperation::List)
        })
    }

    // Critical sections never panic, so a poisoned guard still holds a consistent state.
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_refresh(inner: Arc<CacheInner>, started_generation: u64) {
    let pending = PendingRefresh {
        inner: inner.clone(),
        started_generation,
        settled: false,
    };

    let outcome = {
        let _progress = inner
            .progress
            .begin_nested(REFRESH_TITLE, REFRESH_MESSAGE, None);
        fetch_installed(&inner).await
    };

    pending.settle(outcome);
}

/// Owns the `Refreshing` slot of one refresh. Dropping it unsettled (a panic or a
/// runtime shutdown) fails the refresh so no waiter is left behind.
struct PendingRefresh {
    inner: Arc<CacheInner>,
    started_generation: u64,
    settled: bool,
}

impl PendingRefresh {
    fn settle(mut self, outcome: RefreshOutcome) {
        self.settled = true;
        settle_refresh(&self.inner, self.started_generation, outcome);
    }
}

impl Drop for PendingRefresh {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let error = CoreError::internal("installed package refresh aborted")
            .with_operation(EngineOperation::List)
            .into_engine_error();
        settle_refresh(&self.inner, self.started_generation, Err(error));
    }
}

fn settle_refresh(inner: &CacheInner, started_generation: u64, outcome: RefreshOutcome) {
    let waiters = {
        let mut state = inner.lock_state();
        let current_generation = state.generation;
        let (previous, waiters) = match std::mem::take(&mut state.slot) {
            CacheSlot::Refreshing {
                previous, waiters, ..
            } => (previous, waiters),
            other => {
                state.slot = other;
                tracing::error!("installed package refresh finished outside refreshing state");
                return;
            }
        };

        state.slot = match (&outcome, current_generation == started_generation) {
            (Ok(snapshot), true) => CacheSlot::Populated(snapshot.clone()),
            (Ok(_), false) => CacheSlot::Empty,
            (Err(_), _) => previous.map_or(CacheSlot::Empty, CacheSlot::Populated),
        };
        waiters
    };

    match &outcome {
        Ok(snapshot) => tracing::info!(
            packages = snapshot.len(),
            waiters = waiters.len(),
            "installed package refresh completed"
        ),
        Err(error) => tracing::error!(
            kind = ?error.kind,
            message = %error.message,
            waiters = waiters.len(),
            "installed package refresh failed"
        ),
    }

    for waiter in waiters {
        let _ = waiter.send(outcome.clone());
    }
}

async fn fetch_installed(inner: &CacheInner) -> RefreshOutcome {
    let gateway = inner.gateway.clone();
    let mapper = inner.mapper.clone();

    tokio::task::spawn_blocking(move || -> RefreshOutcome {
        let packages = gateway.list_installed().map_err(|error| {
            CoreError {
                operation: error.operation.or(Some(EngineOperation::List)),
                ..error
            }
            .into_engine_error()
        })?;
        Ok(map_installed(mapper.as_ref(), &packages))
    })
    .await
    .map_err(|join_error| {
        CoreError::internal(format!("installed package refresh panicked: {join_error}"))
            .with_operation(EngineOperation::List)
            .into_engine_error()
    })?
}

fn map_installed(mapper: &dyn PackageMapper, packages: &[EnginePackage]) -> InstalledSnapshot {
    let mut records = Vec::with_capacity(packages.len());
    for package in packages {
        match mapper.map(package) {
            Ok(mut record) => {
                record.is_installed = true;
                records.push(record);
            }
            Err(error) => tracing::warn!(
                package = %package.id,
                version = %package.version,
                message = %error.message,
                "skipping installed package that could not be mapped"
            ),
        }
    }

    Arc::from(records)
}
