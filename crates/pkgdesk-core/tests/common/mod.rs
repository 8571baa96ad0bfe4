#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use pkgdesk_core::gateway::{EngineGateway, EngineResult};
use pkgdesk_core::mapping::DefaultPackageMapper;
use pkgdesk_core::models::{
    ChangeEvent, CoreError, EngineCommand, EngineOperation, EnginePackage, EngineRunResult,
    PackageId, PackageVersion,
};
use pkgdesk_core::{
    ChangeNotificationBus, InstalledPackageCache, OrchestratorSettings, PackageOrchestrator,
    ProgressReporter,
};

/// Blocks engine calls until opened.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    signal: Condvar,
}

impl Gate {
    pub fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.signal.wait(open).unwrap();
        }
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.signal.notify_all();
    }
}

#[derive(Clone, Debug)]
pub enum RunBehavior {
    /// Apply the command to the fake engine state and exit with `exit_code`.
    Apply { exit_code: i32 },
    /// Apply the command, then report failure; models a partial install.
    ApplyThenFail { exit_code: i32, stderr: String },
    /// Leave state untouched and exit with a failure code.
    Fail { exit_code: i32, stderr: String },
    /// The gateway itself fails.
    Error(CoreError),
}

/// In-memory engine that records every call.
pub struct FakeGateway {
    installed: Mutex<Vec<EnginePackage>>,
    list_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    failing_lists: AtomicUsize,
    list_delay: Mutex<Duration>,
    gate: Mutex<Option<Arc<Gate>>>,
    run_behavior: Mutex<RunBehavior>,
    commands: Mutex<Vec<EngineCommand>>,
    install_resolves_to: Mutex<Option<String>>,
    upgrade_to: Mutex<Option<String>>,
}

impl FakeGateway {
    pub fn with_packages(packages: &[(&str, &str)]) -> Self {
        Self {
            installed: Mutex::new(
                packages
                    .iter()
                    .map(|(id, version)| engine_package(id, version))
                    .collect(),
            ),
            list_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            failing_lists: AtomicUsize::new(0),
            list_delay: Mutex::new(Duration::ZERO),
            gate: Mutex::new(None),
            run_behavior: Mutex::new(RunBehavior::Apply { exit_code: 0 }),
            commands: Mutex::new(Vec::new()),
            install_resolves_to: Mutex::new(None),
            upgrade_to: Mutex::new(None),
        }
    }

    pub fn gate(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    pub fn fail_next_lists(&self, count: usize) {
        self.failing_lists.store(count, Ordering::SeqCst);
    }

    pub fn set_run_behavior(&self, behavior: RunBehavior) {
        *self.run_behavior.lock().unwrap() = behavior;
    }

    pub fn resolve_installs_to(&self, version: &str) {
        *self.install_resolves_to.lock().unwrap() = Some(version.to_string());
    }

    pub fn upgrade_to(&self, version: &str) {
        *self.upgrade_to.lock().unwrap() = Some(version.to_string());
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<EngineCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn run_calls(&self) -> usize {
        self.commands.lock().unwrap().len()
    }

    fn apply(&self, command: &EngineCommand) {
        let Some(package) = command.package() else {
            return;
        };
        let mut installed = self.installed.lock().unwrap();
        match command.operation() {
            EngineOperation::Install => {
                let version = self
                    .install_resolves_to
                    .lock()
                    .unwrap()
                    .clone()
                    .or_else(|| command.version().map(|version| version.to_string()))
                    .unwrap_or_else(|| "1.0.0".to_string());
                installed.retain(|entry| !package.matches(&entry.id));
                installed.push(engine_package(package.as_str(), &version));
            }
            EngineOperation::Uninstall => {
                installed.retain(|entry| {
                    !package.matches(&entry.id)
                        || command
                            .version()
                            .is_some_and(|version| version.as_str() != entry.version)
                });
            }
            EngineOperation::Upgrade => {
                if let Some(version) = self.upgrade_to.lock().unwrap().clone() {
                    for entry in installed.iter_mut() {
                        if package.matches(&entry.id) {
                            entry.version = version.clone();
                        }
                    }
                }
            }
            EngineOperation::List => {}
        }
    }
}

impl EngineGateway for FakeGateway {
    fn list_installed(&self) -> EngineResult<Vec<EnginePackage>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        // The listing reflects engine state when the call started, as a real engine's would.
        let listing = self.installed.lock().unwrap().clone();

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.wait();
        }
        let delay = *self.list_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let should_fail = self
            .failing_lists
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if should_fail {
            return Err(CoreError::new(
                pkgdesk_core::models::CoreErrorKind::ProcessFailure,
                "engine list exited with code 1: database locked",
            )
            .with_operation(EngineOperation::List));
        }

        Ok(listing)
    }

    fn run(&self, command: &EngineCommand) -> EngineResult<EngineRunResult> {
        self.commands.lock().unwrap().push(command.clone());
        let behavior = self.run_behavior.lock().unwrap().clone();

        match behavior {
            RunBehavior::Apply { exit_code } => {
                self.apply(command);
                Ok(run_result(exit_code, ""))
            }
            RunBehavior::ApplyThenFail { exit_code, stderr } => {
                self.apply(command);
                Ok(run_result(exit_code, &stderr))
            }
            RunBehavior::Fail { exit_code, stderr } => Ok(run_result(exit_code, &stderr)),
            RunBehavior::Error(error) => Err(error),
        }
    }
}

pub struct Harness {
    pub gateway: Arc<FakeGateway>,
    pub progress: Arc<ProgressReporter>,
    pub bus: Arc<ChangeNotificationBus>,
    pub events: Arc<Mutex<Vec<ChangeEvent>>>,
    pub orchestrator: PackageOrchestrator,
}

impl Harness {
    pub fn new(gateway: FakeGateway, settings: OrchestratorSettings) -> Self {
        let gateway = Arc::new(gateway);
        let progress = Arc::new(ProgressReporter::new());
        let bus = Arc::new(ChangeNotificationBus::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        {
            let events = events.clone();
            bus.subscribe_fn(move |event| {
                events.lock().unwrap().push(event.clone());
                Ok(())
            });
        }

        let orchestrator = PackageOrchestrator::new(
            gateway.clone(),
            Arc::new(DefaultPackageMapper),
            progress.clone(),
            bus.clone(),
            settings,
        );

        Self {
            gateway,
            progress,
            bus,
            events,
            orchestrator,
        }
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn assert_progress_balanced(&self) {
        let counters = self.progress.counters();
        assert_eq!(
            counters.started, counters.stopped,
            "every progress start must be matched by a stop"
        );
        assert!(!self.progress.is_active());
    }
}

pub fn cache_for(gateway: Arc<FakeGateway>) -> (InstalledPackageCache, Arc<ProgressReporter>) {
    let progress = Arc::new(ProgressReporter::new());
    let cache = InstalledPackageCache::new(gateway, Arc::new(DefaultPackageMapper), progress.clone());
    (cache, progress)
}

pub fn engine_package(id: &str, version: &str) -> EnginePackage {
    EnginePackage {
        id: id.to_string(),
        version: version.to_string(),
        source: None,
    }
}

pub fn id(text: &str) -> PackageId {
    PackageId::new(text).unwrap()
}

pub fn version(text: &str) -> PackageVersion {
    PackageVersion::parse(text).unwrap()
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 2.5s");
}

fn run_result(exit_code: i32, stderr: &str) -> EngineRunResult {
    EngineRunResult {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}
