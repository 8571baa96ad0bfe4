use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lazy_static::lazy_static;
use pkgdesk_core::execution::TokioProcessExecutor;
use pkgdesk_core::gateway::ChocolateyGateway;
use pkgdesk_core::mapping::DefaultPackageMapper;
use pkgdesk_core::models::{ChangeEvent, CoreError, PackageId, PackageVersion, SourceUri};
use pkgdesk_core::{
    ChangeNotificationBus, InstallRequest, OrchestratorSettings, PackageOrchestrator,
    ProgressReporter, SubscriptionId, UninstallRequest, UpdateRequest,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

struct PkgdeskState {
    orchestrator: Arc<PackageOrchestrator>,
    subscription: SubscriptionId,
    events: Arc<Mutex<Vec<ChangeEvent>>>,
    tokio_rt: tokio::runtime::Runtime,
}

lazy_static! {
    static ref STATE: Mutex<Option<PkgdeskState>> = Mutex::new(None);
    static ref LAST_ERROR: Mutex<Option<CoreError>> = Mutex::new(None);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn set_last_error(error: CoreError) {
    tracing::error!(kind = ?error.kind, message = %error.message, "pkgdesk call failed");
    *lock(&LAST_ERROR) = Some(error);
}

fn clear_last_error() {
    *lock(&LAST_ERROR) = None;
}

fn not_initialized() -> CoreError {
    CoreError::invalid_input("pkgdesk_init has not been called")
}

/// Clones what a call needs out of the global state so the lock is not held while the
/// engine runs.
fn session() -> Result<(Arc<PackageOrchestrator>, tokio::runtime::Handle), CoreError> {
    let guard = lock(&STATE);
    let state = guard.as_ref().ok_or_else(not_initialized)?;
    Ok((state.orchestrator.clone(), state.tokio_rt.handle().clone()))
}

/// # Safety
///
/// `value` must be null or a valid NUL-terminated C string.
unsafe fn optional_str<'a>(value: *const c_char, field: &str) -> Result<Option<&'a str>, CoreError> {
    if value.is_null() {
        return Ok(None);
    }
    let text = unsafe { CStr::from_ptr(value) }
        .to_str()
        .map_err(|_| CoreError::invalid_input(format!("{field} is not valid UTF-8")))?;
    Ok(Some(text).filter(|text| !text.trim().is_empty()))
}

/// # Safety
///
/// `value` must be null or a valid NUL-terminated C string.
unsafe fn required_str<'a>(value: *const c_char, field: &str) -> Result<&'a str, CoreError> {
    unsafe { optional_str(value, field) }?
        .ok_or_else(|| CoreError::invalid_input(format!("{field} must not be empty")))
}

fn to_json_ptr<T: Serialize + ?Sized>(value: &T) -> *mut c_char {
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(error) => {
            set_last_error(CoreError::internal(format!("failed to encode JSON: {error}")));
            return std::ptr::null_mut();
        }
    };

    match CString::new(json) {
        Ok(c) => c.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

fn report(result: Result<(), CoreError>) -> bool {
    match result {
        Ok(()) => {
            clear_last_error();
            true
        }
        Err(error) => {
            set_last_error(error);
            false
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Initialize the package core. `engine_path` overrides the engine program; pass null
/// to use `PKGDESK_ENGINE` or the default `choco`.
///
/// # Safety
///
/// `engine_path` must be null or a valid, NUL-terminated UTF-8 C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pkgdesk_init(engine_path: *const c_char) -> bool {
    if lock(&STATE).is_some() {
        return true;
    }

    init_logging();

    let result = (|| -> Result<PkgdeskState, CoreError> {
        let mut settings = OrchestratorSettings::from_env()?;
        if let Some(path) = unsafe { optional_str(engine_path, "engine path") }? {
            settings = settings.with_engine_program(path);
        }

        let tokio_rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                CoreError::internal(format!("failed to create Tokio runtime: {error}"))
            })?;

        let gateway = Arc::new(ChocolateyGateway::new(
            Arc::new(TokioProcessExecutor),
            &settings,
        ));
        let bus = Arc::new(ChangeNotificationBus::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let subscription = {
            let events = events.clone();
            bus.subscribe_fn(move |event| {
                lock(&events).push(event.clone());
                Ok(())
            })
        };

        tracing::info!(
            engine = %settings.engine_program().display(),
            "initializing package core"
        );
        let orchestrator = Arc::new(PackageOrchestrator::new(
            gateway,
            Arc::new(DefaultPackageMapper),
            Arc::new(ProgressReporter::new()),
            bus,
            settings,
        ));

        Ok(PkgdeskState {
            orchestrator,
            subscription,
            events,
            tokio_rt,
        })
    })();

    match result {
        Ok(state) => {
            let mut guard = lock(&STATE);
            if guard.is_none() {
                *guard = Some(state);
            }
            clear_last_error();
            true
        }
        Err(error) => {
            set_last_error(error);
            false
        }
    }
}

/// Drop the package core. Pending engine processes are killed with their runtime.
#[unsafe(no_mangle)]
pub extern "C" fn pkgdesk_shutdown() {
    let Some(state) = lock(&STATE).take() else {
        return;
    };

    state.orchestrator.bus().unsubscribe(state.subscription);
    drop(state.orchestrator);
    state.tokio_rt.shutdown_timeout(Duration::from_secs(5));
    tracing::info!("package core shut down");
}

/// Installed packages as a JSON array, or null on failure (see `pkgdesk_last_error`).
#[unsafe(no_mangle)]
pub extern "C" fn pkgdesk_list_installed(force: bool) -> *mut c_char {
    let result = session().and_then(|(orchestrator, handle)| {
        handle.block_on(orchestrator.installed_packages(force))
    });

    match result {
        Ok(snapshot) => {
            clear_last_error();
            to_json_ptr(&*snapshot)
        }
        Err(error) => {
            set_last_error(error);
            std::ptr::null_mut()
        }
    }
}

/// # Safety
///
/// `id` must be a valid NUL-terminated UTF-8 C string; `version` and `source` must be
/// null or valid NUL-terminated UTF-8 C strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pkgdesk_install(
    id: *const c_char,
    version: *const c_char,
    source: *const c_char,
    force: bool,
) -> bool {
    report((|| -> Result<(), CoreError> {
        let package = PackageId::new(unsafe { required_str(id, "package id") }?)?;
        let mut request = InstallRequest::new(package).with_force(force);
        if let Some(version) = unsafe { optional_str(version, "version") }? {
            request = request.with_version(PackageVersion::parse(version)?);
        }
        if let Some(source) = unsafe { optional_str(source, "source") }? {
            request = request.with_source(SourceUri::new(source)?);
        }

        let (orchestrator, handle) = session()?;
        handle.block_on(orchestrator.install(request))
    })())
}

/// # Safety
///
/// `id` must be a valid NUL-terminated UTF-8 C string; `version` must be null or a
/// valid NUL-terminated UTF-8 C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pkgdesk_uninstall(
    id: *const c_char,
    version: *const c_char,
    force: bool,
) -> bool {
    report((|| -> Result<(), CoreError> {
        let package = PackageId::new(unsafe { required_str(id, "package id") }?)?;
        let version = unsafe { optional_str(version, "version") }?
            .map(PackageVersion::parse)
            .transpose()?;
        let request = UninstallRequest::new(package, version).with_force(force);

        let (orchestrator, handle) = session()?;
        handle.block_on(orchestrator.uninstall(request))
    })())
}

/// # Safety
///
/// `id` must be a valid NUL-terminated UTF-8 C string; `source` must be null or a
/// valid NUL-terminated UTF-8 C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pkgdesk_update(id: *const c_char, source: *const c_char) -> bool {
    report((|| -> Result<(), CoreError> {
        let package = PackageId::new(unsafe { required_str(id, "package id") }?)?;
        let mut request = UpdateRequest::new(package);
        if let Some(source) = unsafe { optional_str(source, "source") }? {
            request = request.with_source(SourceUri::new(source)?);
        }

        let (orchestrator, handle) = session()?;
        handle.block_on(orchestrator.update(request))
    })())
}

/// Current progress state as a JSON object, or null before init.
#[unsafe(no_mangle)]
pub extern "C" fn pkgdesk_progress_state() -> *mut c_char {
    match session() {
        Ok((orchestrator, _)) => to_json_ptr(&orchestrator.progress().snapshot()),
        Err(error) => {
            set_last_error(error);
            std::ptr::null_mut()
        }
    }
}

/// Flags the running operation as cancelled. Returns false when nothing is running.
#[unsafe(no_mangle)]
pub extern "C" fn pkgdesk_request_cancellation() -> bool {
    session()
        .map(|(orchestrator, _)| orchestrator.progress().request_cancellation())
        .unwrap_or(false)
}

/// Change events published since the previous call, oldest first, as a JSON array.
#[unsafe(no_mangle)]
pub extern "C" fn pkgdesk_take_events() -> *mut c_char {
    let events = lock(&STATE)
        .as_ref()
        .map(|state| std::mem::take(&mut *lock(&state.events)));

    match events {
        Some(events) => to_json_ptr(&events),
        None => {
            set_last_error(not_initialized());
            std::ptr::null_mut()
        }
    }
}

/// Error from the most recent failed call as a JSON object, or null if it succeeded.
#[unsafe(no_mangle)]
pub extern "C" fn pkgdesk_last_error() -> *mut c_char {
    let error = lock(&LAST_ERROR).clone();
    match error {
        Some(error) => to_json_ptr(&error),
        None => std::ptr::null_mut(),
    }
}

/// Free a string previously returned by a `pkgdesk_*` function.
///
/// # Safety
///
/// `s` must be a pointer previously returned by a `pkgdesk_*` function, or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pkgdesk_free_string(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    unsafe {
        let _ = CString::from_raw(s);
    }
}
