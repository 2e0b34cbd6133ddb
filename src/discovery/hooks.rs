//! Process exit hooks and how enumeration steals them back.
//!
//! Native environments like to register cleanup work to run when the process
//! exits. For devices that are opened and closed many times during one process
//! lifetime this is wrong twice over: the hooks pile up, and they run long after
//! the device they belong to was closed. [`HookScavenger`] wraps an enumeration
//! call, takes every hook that call registered out of the [`ExitHooks`] table,
//! and hands them to the caller as [`CapturedHooks`] so they can run when the
//! device closes instead.
//!
//! # Locking
//!
//! The table has two locks. `table` guards the hook map and is only ever held
//! for a few instructions, so backends can register hooks from inside the
//! enumeration without deadlocking. `gate` is held for the whole
//! read-enumerate-diff-remove sequence, which serialises captures: two lookups
//! running at the same time never see each other's hooks.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cleanup work to run once, on its own thread, at process exit or when the
/// device that caused it closes.
pub struct ShutdownHook {
    name: String,
    task: Box<dyn FnOnce() + Send + 'static>,
    daemon: bool,
}

impl ShutdownHook {
    pub fn new(name: impl Into<String>, task: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name: name.into(),
            task: Box::new(task),
            daemon: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Captured hooks are daemons: they belong to a device, not to process exit.
    pub fn is_daemon(&self) -> bool {
        self.daemon
    }

    fn start(self) -> std::io::Result<RunningHook> {
        let (done_tx, done_rx) = mpsc::channel();
        let task = self.task;

        std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                task();
                let _ = done_tx.send(());
            })?;

        Ok(RunningHook {
            name: self.name,
            done: done_rx,
        })
    }
}

impl fmt::Debug for ShutdownHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHook")
            .field("name", &self.name)
            .field("daemon", &self.daemon)
            .finish_non_exhaustive()
    }
}

struct RunningHook {
    name: String,
    done: mpsc::Receiver<()>,
}

/// What happened when a batch of hooks ran.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HookRunReport {
    pub completed: usize,
    /// Hooks whose thread could not be started or panicked.
    pub failed: Vec<String>,
    /// Hooks still running when their wait ran out. They are left detached.
    pub timed_out: Vec<String>,
}

fn run_hooks(hooks: Vec<ShutdownHook>, bound: Duration) -> HookRunReport {
    let mut report = HookRunReport::default();

    // Start everything first so slow hooks overlap.
    let mut running = Vec::with_capacity(hooks.len());
    for hook in hooks {
        let name = hook.name.clone();
        match hook.start() {
            Ok(handle) => running.push(handle),
            Err(e) => {
                warn!("Failed to start shutdown hook {}: {}", name, e);
                report.failed.push(name);
            }
        }
    }

    for hook in running {
        match hook.done.recv_timeout(bound) {
            Ok(()) => report.completed += 1,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Environment shutdown timed out: hook {} still running after {:?}",
                    hook.name, bound
                );
                report.timed_out.push(hook.name);
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Shutdown hook {} panicked", hook.name);
                report.failed.push(hook.name);
            }
        }
    }

    report
}

/// Handle returned by [`ExitHooks::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(u64);

#[derive(Default)]
struct HookTable {
    next_id: u64,
    hooks: BTreeMap<u64, ShutdownHook>,
}

/// Table of hooks to run when the process exits.
///
/// There is one process-wide table, [`ExitHooks::global`]; tests create their
/// own with [`ExitHooks::new`]. Ids grow monotonically, so "hooks registered
/// since X" is every id at or above X's watermark.
#[derive(Default)]
pub struct ExitHooks {
    table: Mutex<HookTable>,
    gate: Mutex<()>,
}

impl ExitHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> Arc<ExitHooks> {
        static GLOBAL: OnceLock<Arc<ExitHooks>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(ExitHooks::new())).clone()
    }

    pub fn register(&self, hook: ShutdownHook) -> HookId {
        let mut table = self.table.lock();
        let id = table.next_id;
        table.next_id += 1;
        debug!("Registered exit hook {} as {}", hook.name, id);
        table.hooks.insert(id, hook);
        HookId(id)
    }

    pub fn deregister(&self, id: HookId) -> Option<ShutdownHook> {
        self.table.lock().hooks.remove(&id.0)
    }

    pub fn len(&self) -> usize {
        self.table.lock().hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        self.table
            .lock()
            .hooks
            .values()
            .map(|hook| hook.name.clone())
            .collect()
    }

    /// Runs and removes every registered hook. Meant to be called by the host
    /// right before the process exits.
    pub fn run_all(&self, bound: Duration) -> HookRunReport {
        let hooks: Vec<_> = std::mem::take(&mut self.table.lock().hooks)
            .into_values()
            .collect();
        info!("Running {} exit hooks", hooks.len());
        run_hooks(hooks, bound)
    }

    fn watermark(&self) -> u64 {
        self.table.lock().next_id
    }

    fn detach_from(&self, watermark: u64) -> Vec<ShutdownHook> {
        let mut table = self.table.lock();
        table
            .hooks
            .split_off(&watermark)
            .into_values()
            .map(|mut hook| {
                hook.daemon = true;
                hook
            })
            .collect()
    }
}

impl fmt::Debug for ExitHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExitHooks")
            .field("hooks", &self.names())
            .finish()
    }
}

/// Hooks taken out of the exit table. The owner decides when they run.
#[derive(Debug, Default)]
pub struct CapturedHooks {
    hooks: Vec<ShutdownHook>,
}

impl CapturedHooks {
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|hook| hook.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShutdownHook> {
        self.hooks.iter()
    }

    /// Starts all hooks, then waits up to `bound` for each one. Hooks that do
    /// not finish in time are abandoned with a warning.
    pub fn run(self, bound: Duration) -> HookRunReport {
        if self.hooks.is_empty() {
            return HookRunReport::default();
        }
        debug!("Running {} captured hooks", self.hooks.len());
        run_hooks(self.hooks, bound)
    }

    pub(crate) fn absorb(&mut self, other: CapturedHooks) {
        self.hooks.extend(other.hooks);
    }
}

#[derive(Default)]
struct SessionState {
    watermark: Option<u64>,
    orphans: Vec<ShutdownHook>,
}

/// Capture state shared between a lookup worker and the caller waiting on it,
/// so the caller can pull hooks out of the exit table if it gives up early.
#[derive(Default)]
pub(crate) struct CaptureSession {
    state: Mutex<SessionState>,
}

/// Wraps enumeration calls and takes ownership of the exit hooks they register.
#[derive(Clone, Debug)]
pub struct HookScavenger {
    table: Arc<ExitHooks>,
}

impl HookScavenger {
    pub fn new(table: Arc<ExitHooks>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Arc<ExitHooks> {
        &self.table
    }

    /// Runs `body` and returns its result with every hook registered while it ran.
    pub fn capture<T>(&self, body: impl FnOnce() -> T) -> (T, CapturedHooks) {
        self.capture_in(&CaptureSession::default(), body)
    }

    pub(crate) fn capture_in<T>(
        &self,
        session: &CaptureSession,
        body: impl FnOnce() -> T,
    ) -> (T, CapturedHooks) {
        let _gate = self.table.gate.lock();

        let watermark = self.table.watermark();
        session.state.lock().watermark = Some(watermark);

        let value = body();

        let mut state = session.state.lock();
        let mut hooks = std::mem::take(&mut state.orphans);
        hooks.extend(self.table.detach_from(watermark));
        // Later abandons must not touch hooks registered after this capture.
        state.watermark = None;
        if !hooks.is_empty() {
            debug!("Captured {} exit hooks during enumeration", hooks.len());
        }

        (value, CapturedHooks { hooks })
    }

    /// Detaches whatever the session's enumeration has registered so far. Used
    /// by a caller that stopped waiting; the hooks are parked in the session and
    /// handed to the worker if it ever finishes.
    pub(crate) fn abandon(&self, session: &CaptureSession) -> usize {
        let mut state = session.state.lock();
        let Some(watermark) = state.watermark else {
            return 0;
        };
        let mut detached = self.table.detach_from(watermark);
        let count = detached.len();
        state.orphans.append(&mut detached);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn counting_hook(name: &str, counter: &Arc<AtomicUsize>) -> ShutdownHook {
        let counter = counter.clone();
        ShutdownHook::new(name, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn capture_takes_only_hooks_registered_by_the_body() {
        let table = Arc::new(ExitHooks::new());
        let ran = Arc::new(AtomicUsize::new(0));
        table.register(counting_hook("host", &ran));

        let scavenger = HookScavenger::new(table.clone());
        let (value, captured) = scavenger.capture(|| {
            table.register(counting_hook("env-a", &ran));
            table.register(counting_hook("env-b", &ran));
            7
        });

        assert_eq!(value, 7);
        assert_eq!(captured.names(), vec!["env-a", "env-b"]);
        assert!(captured.iter().all(|hook| hook.is_daemon()));
        assert_eq!(table.names(), vec!["host".to_string()]);

        let report = captured.run(Duration::from_secs(1));
        assert_eq!(report.completed, 2);
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn slow_hook_is_abandoned_after_its_bound() {
        let table = Arc::new(ExitHooks::new());
        let scavenger = HookScavenger::new(table.clone());
        let ((), captured) = scavenger.capture(|| {
            table.register(ShutdownHook::new("stuck", || {
                std::thread::sleep(Duration::from_secs(5))
            }));
        });

        let started = Instant::now();
        let report = captured.run(Duration::from_millis(50));

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report.timed_out, vec!["stuck".to_string()]);
        assert_eq!(report.completed, 0);
    }

    #[test]
    fn panicking_hook_is_reported() {
        let table = Arc::new(ExitHooks::new());
        let scavenger = HookScavenger::new(table.clone());
        let ((), captured) = scavenger.capture(|| {
            table.register(ShutdownHook::new("broken", || panic!("hook failed")));
        });

        let report = captured.run(Duration::from_secs(1));
        assert_eq!(report.failed, vec!["broken".to_string()]);
    }

    #[test]
    fn concurrent_captures_keep_their_own_hooks() {
        let table = Arc::new(ExitHooks::new());
        let ran = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|n| {
                let table = table.clone();
                let ran = ran.clone();
                std::thread::spawn(move || {
                    let scavenger = HookScavenger::new(table.clone());
                    let ((), captured) = scavenger.capture(|| {
                        table.register(counting_hook(&format!("w{n}-1"), &ran));
                        std::thread::sleep(Duration::from_millis(5));
                        table.register(counting_hook(&format!("w{n}-2"), &ran));
                    });
                    let names: Vec<String> =
                        captured.names().into_iter().map(str::to_owned).collect();
                    (n, names)
                })
            })
            .collect();

        for worker in workers {
            let (n, names) = worker.join().unwrap();
            assert_eq!(names, vec![format!("w{n}-1"), format!("w{n}-2")]);
        }
        assert!(table.is_empty());
    }

    #[test]
    fn abandon_pulls_hooks_out_while_body_is_still_running() {
        let table = Arc::new(ExitHooks::new());
        let scavenger = HookScavenger::new(table.clone());
        let session = Arc::new(CaptureSession::default());
        let (registered_tx, registered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let worker = {
            let scavenger = scavenger.clone();
            let session = session.clone();
            let table = table.clone();
            std::thread::spawn(move || {
                let ((), captured) = scavenger.capture_in(&session, || {
                    table.register(ShutdownHook::new("early", || {}));
                    registered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    table.register(ShutdownHook::new("late", || {}));
                });
                captured.len()
            })
        };

        registered_rx.recv().unwrap();
        assert_eq!(scavenger.abandon(&session), 1);
        assert!(table.is_empty());

        release_tx.send(()).unwrap();
        assert_eq!(worker.join().unwrap(), 2);
        assert!(table.is_empty());
    }

    #[test]
    fn run_all_drains_the_table() {
        let table = ExitHooks::new();
        let ran = Arc::new(AtomicUsize::new(0));
        table.register(counting_hook("one", &ran));
        let id = table.register(counting_hook("two", &ran));
        assert!(table.deregister(id).is_some());

        let report = table.run_all(Duration::from_secs(1));
        assert_eq!(report.completed, 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(table.is_empty());
    }
}
