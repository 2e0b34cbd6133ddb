//! Deadline-bounded device discovery.
//!
//! Native enumeration can block forever inside a driver. [`BoundedLookup`] runs
//! it on a dedicated "Controller Lookup" thread and waits for the result with a
//! timeout. A lookup that times out cancels the worker's token and pulls any
//! exit hooks the enumeration already registered out of the table; when the
//! worker eventually returns it finds the token cancelled and releases
//! everything it enumerated on its own.

use super::hooks::{CaptureSession, CapturedHooks, ExitHooks, HookScavenger};
use crate::config::InputConfig;
use crate::device::{native, Controller, ControllerKind, EnvironmentFactory, ManagedDevice};
use crate::error::{BackendError, DeviceClass, InputError, Result};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const WORKER_NAME: &str = "Controller Lookup";

/// Everything one enumeration produced.
struct Scan {
    outcome: std::result::Result<Vec<Box<dyn Controller>>, BackendError>,
    hooks: CapturedHooks,
}

impl Scan {
    /// Releases every enumerated controller and runs the captured hooks.
    fn discard(self, bound: Duration) {
        if let Ok(controllers) = self.outcome {
            for controller in controllers {
                release_controller(controller);
            }
        }
        self.hooks.run(bound);
    }
}

/// Releases `controllers` and runs `hooks` on the blocking pool. Both can sit in
/// native code or a hook join for a while and must not stall the executor.
async fn clean_up(controllers: Vec<Box<dyn Controller>>, hooks: CapturedHooks, bound: Duration) {
    if controllers.is_empty() && hooks.is_empty() {
        return;
    }
    let scan = Scan {
        outcome: Ok(controllers),
        hooks,
    };
    if let Err(e) = tokio::task::spawn_blocking(move || scan.discard(bound)).await {
        warn!("Lookup cleanup task failed: {}", e);
    }
}

fn release_controller(mut controller: Box<dyn Controller>) {
    if let Some(handle) = controller.take_native() {
        let report = native::release(handle);
        if !report.is_clean() {
            debug!(
                "Releasing '{}' reported {} faults",
                controller.name(),
                report.faults.len()
            );
        }
    }
}

fn enumerate(
    factory: &EnvironmentFactory,
) -> std::result::Result<Vec<Box<dyn Controller>>, BackendError> {
    std::panic::catch_unwind(AssertUnwindSafe(|| {
        let mut environment = factory()?;
        environment.controllers()
    }))
    .unwrap_or_else(|_| Err(BackendError::new("native enumeration panicked")))
}

/// One attached device as seen by [`BoundedLookup::list`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeviceSummary {
    pub name: String,
    pub kind: ControllerKind,
    /// Position among devices of the same reader class, usable with
    /// [`BoundedLookup::find`]. `None` for devices no reader can open.
    pub ordinal: Option<usize>,
}

/// Finds devices by class and ordinal within a deadline.
#[derive(Clone)]
pub struct BoundedLookup {
    factory: EnvironmentFactory,
    scavenger: HookScavenger,
    hook_timeout: Duration,
}

impl BoundedLookup {
    pub fn new(factory: EnvironmentFactory) -> Self {
        Self {
            factory,
            scavenger: HookScavenger::new(ExitHooks::global()),
            hook_timeout: InputConfig::default().hook_join_timeout(),
        }
    }

    pub fn from_config(factory: EnvironmentFactory, config: &InputConfig) -> Self {
        Self::new(factory).with_hook_timeout(config.hook_join_timeout())
    }

    /// Captures hooks from `table` instead of the process-wide one.
    pub fn with_exit_hooks(mut self, table: Arc<ExitHooks>) -> Self {
        self.scavenger = HookScavenger::new(table);
        self
    }

    pub fn with_hook_timeout(mut self, bound: Duration) -> Self {
        self.hook_timeout = bound;
        self
    }

    /// Opens the `ordinal`-th (1-based) device of `class`, counting in native
    /// enumeration order. Devices that are enumerated but not selected are
    /// released before this returns.
    pub async fn find(
        &self,
        class: DeviceClass,
        ordinal: usize,
        deadline: Duration,
    ) -> Result<ManagedDevice> {
        info!("Looking up {} #{} (deadline {:?})", class, ordinal, deadline);
        let Scan { outcome, hooks } = self.scan(class, deadline).await?;

        let controllers = match outcome {
            Ok(controllers) => controllers,
            Err(e) => {
                warn!("Enumeration failed: {}", e);
                clean_up(Vec::new(), hooks, self.hook_timeout).await;
                return Err(InputError::driver(class, e));
            }
        };

        let mut seen = 0;
        let mut selected = None;
        let mut unselected = Vec::new();
        for controller in controllers {
            if selected.is_none() && class.matches(controller.kind()) {
                seen += 1;
                if seen == ordinal {
                    selected = Some(controller);
                    continue;
                }
            }
            unselected.push(controller);
        }

        match selected {
            Some(controller) => {
                info!(
                    "Found {} #{}: '{}' ({} captured hooks)",
                    class,
                    ordinal,
                    controller.name(),
                    hooks.len()
                );
                clean_up(unselected, CapturedHooks::default(), self.hook_timeout).await;
                Ok(ManagedDevice::new(class, controller, hooks, self.hook_timeout))
            }
            None => {
                debug!("{} #{} not present, {} candidates", class, ordinal, seen);
                clean_up(unselected, hooks, self.hook_timeout).await;
                Err(InputError::NotFound { class, ordinal })
            }
        }
    }

    /// Lists every attached device without keeping any of them open.
    pub async fn list(&self, deadline: Duration) -> Result<Vec<DeviceSummary>> {
        let Scan { outcome, hooks } = self.scan(DeviceClass::Any, deadline).await?;

        let controllers = match outcome {
            Ok(controllers) => controllers,
            Err(e) => {
                clean_up(Vec::new(), hooks, self.hook_timeout).await;
                return Err(InputError::driver(DeviceClass::Any, e));
            }
        };

        let mut joysticks = 0;
        let mut keyboards = 0;
        let summaries = controllers
            .iter()
            .map(|controller| {
                let kind = controller.kind();
                let ordinal = if kind.is_joystick() {
                    joysticks += 1;
                    Some(joysticks)
                } else if kind.is_keyboard() {
                    keyboards += 1;
                    Some(keyboards)
                } else {
                    None
                };
                DeviceSummary {
                    name: controller.name().to_string(),
                    kind,
                    ordinal,
                }
            })
            .collect::<Vec<_>>();

        clean_up(controllers, hooks, self.hook_timeout).await;
        Ok(summaries)
    }

    /// [`find`](Self::find) for callers without a runtime. Refused from inside
    /// a tokio runtime, where blocking on a nested one would panic.
    pub fn find_blocking(
        &self,
        class: DeviceClass,
        ordinal: usize,
        deadline: Duration,
    ) -> Result<ManagedDevice> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(InputError::driver(
                class,
                "find_blocking called from inside a tokio runtime, use find",
            ));
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| InputError::driver(class, e))?;
        runtime.block_on(self.find(class, ordinal, deadline))
    }

    async fn scan(&self, class: DeviceClass, deadline: Duration) -> Result<Scan> {
        let (tx, mut rx) = oneshot::channel::<Scan>();
        let token = CancellationToken::new();
        let session = Arc::new(CaptureSession::default());

        {
            let token = token.clone();
            let session = session.clone();
            let scavenger = self.scavenger.clone();
            let factory = self.factory.clone();
            let hook_timeout = self.hook_timeout;

            std::thread::Builder::new()
                .name(WORKER_NAME.into())
                .spawn(move || {
                    let (outcome, hooks) = scavenger.capture_in(&session, || {
                        if token.is_cancelled() {
                            return Err(BackendError::new("lookup cancelled before enumeration"));
                        }
                        enumerate(&factory)
                    });
                    let scan = Scan { outcome, hooks };

                    if token.is_cancelled() {
                        debug!("Lookup was abandoned, releasing late enumeration");
                        scan.discard(hook_timeout);
                    } else if let Err(scan) = tx.send(scan) {
                        debug!("Lookup receiver gone, releasing enumeration");
                        scan.discard(hook_timeout);
                    }
                })
                .map_err(|e| InputError::driver(class, e))?;
        }

        match tokio::time::timeout(deadline, &mut rx).await {
            Ok(Ok(scan)) => Ok(scan),
            Ok(Err(_)) => Err(InputError::driver(class, "lookup worker stopped without a result")),
            Err(_) => {
                token.cancel();
                rx.close();
                let detached = self.scavenger.abandon(&session);
                warn!(
                    "{} lookup timed out after {:?}, detached {} pending exit hooks",
                    class, deadline, detached
                );
                // Finished right at the deadline: nobody else will clean it up.
                if let Ok(Scan { outcome, hooks }) = rx.try_recv() {
                    clean_up(outcome.unwrap_or_default(), hooks, self.hook_timeout).await;
                }
                Err(InputError::Timeout {
                    class,
                    after: deadline,
                })
            }
        }
    }
}

impl std::fmt::Debug for BoundedLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedLookup")
            .field("exit_hooks", self.scavenger.table())
            .field("hook_timeout", &self.hook_timeout)
            .finish_non_exhaustive()
    }
}
