//! Hook thread hosting the interception engine
//!
//! The OS delivers keyboard events on the thread that installed the hook, so
//! the engine lives on a dedicated thread for its whole life. Commands from
//! the async side are queued and applied between pump slices.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, trace, warn};

use crate::engine::{EngineCommand, InterceptionEngine, Rate, SuppressionGate};
use crate::events::EngineEvent;
use crate::scenario::ScenarioStore;

use super::backend::{HookError, KeyInjector, KeyboardHook, Verdict};
use super::keys::KeyEvent;

/// How long one pump of the platform event loop may block
const PUMP_INTERVAL: Duration = Duration::from_millis(100);

/// Everything the hook thread needs to build its engine
pub struct EngineSetup {
    pub scenarios: Arc<ScenarioStore>,
    pub rate: Rate,
    pub event_tx: broadcast::Sender<EngineEvent>,
    pub commands: mpsc::UnboundedReceiver<EngineCommand>,
}

/// Routes hook callbacks into the engine
///
/// Events arriving while the gate is closed are our own injections and are
/// passed through before the engine is touched.
pub struct Dispatcher<I> {
    gate: Rc<SuppressionGate>,
    engine: Rc<RefCell<InterceptionEngine<I>>>,
}

impl<I> Clone for Dispatcher<I> {
    fn clone(&self) -> Self {
        Self {
            gate: Rc::clone(&self.gate),
            engine: Rc::clone(&self.engine),
        }
    }
}

impl<I: KeyInjector> Dispatcher<I> {
    pub fn new(gate: Rc<SuppressionGate>, engine: InterceptionEngine<I>) -> Self {
        Self {
            gate,
            engine: Rc::new(RefCell::new(engine)),
        }
    }

    /// Handle one hook callback; every failure path passes the event through
    pub fn dispatch(&self, event: KeyEvent) -> Verdict {
        if !self.gate.is_interception_active() {
            trace!(key = %event.key, "synthetic window open, passing through");
            return Verdict::PassThrough;
        }

        let Ok(mut engine) = self.engine.try_borrow_mut() else {
            warn!(key = %event.key, "engine busy, passing event through");
            return Verdict::PassThrough;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| engine.handle_event(event))) {
            Ok(verdict) => verdict,
            Err(_) => {
                error!(key = %event.key, "engine panicked while handling event, passing through");
                Verdict::PassThrough
            }
        }
    }

    pub fn apply(&self, command: EngineCommand) {
        match self.engine.try_borrow_mut() {
            Ok(mut engine) => {
                engine.apply(command);
                debug!(state = %engine.state(), "engine command applied");
            }
            Err(_) => warn!(?command, "engine busy, command dropped"),
        }
    }

    pub fn teardown(&self) {
        if let Ok(mut engine) = self.engine.try_borrow_mut() {
            engine.teardown();
        }
    }
}

/// Owns the dedicated hook thread
pub struct HookListener {
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl HookListener {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    /// Start the hook thread and wait until the hook is installed
    ///
    /// `open` runs on the hook thread and creates the platform hook and
    /// injector there, since both are tied to the thread that uses them.
    pub fn start<F, H, I>(&self, setup: EngineSetup, open: F) -> Result<(), HookError>
    where
        F: FnOnce() -> Result<(H, I), HookError> + Send + 'static,
        H: KeyboardHook + 'static,
        I: KeyInjector + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HookError::AlreadyRunning);
        }

        let running = Arc::clone(&self.running);
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);

        let spawned = thread::Builder::new()
            .name("keyboard-hook".to_string())
            .spawn(move || {
                info!("hook thread started");
                run_hook_thread(setup, open, &running, ready_tx);
                running.store(false, Ordering::SeqCst);
                info!("hook thread stopped");
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(HookError::ThreadSpawn(e.to_string()));
            }
        };

        let installed = ready_rx.recv().unwrap_or(Err(HookError::ThreadExited));
        if installed.is_err() {
            self.running.store(false, Ordering::SeqCst);
            if handle.join().is_err() {
                error!("hook thread panicked during startup");
            }
            return installed;
        }

        if let Ok(mut slot) = self.thread.lock() {
            *slot = Some(handle);
        }
        Ok(())
    }

    /// Stop the hook thread and wait for it to uninstall the hook
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.thread.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("hook thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for HookListener {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HookListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_hook_thread<F, H, I>(
    setup: EngineSetup,
    open: F,
    running: &AtomicBool,
    ready_tx: std_mpsc::SyncSender<Result<(), HookError>>,
) where
    F: FnOnce() -> Result<(H, I), HookError>,
    H: KeyboardHook,
    I: KeyInjector + 'static,
{
    let EngineSetup {
        scenarios,
        rate,
        event_tx,
        mut commands,
    } = setup;

    let (mut hook, injector) = match open() {
        Ok(parts) => parts,
        Err(e) => {
            error!(?e, "failed to open keyboard backend");
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let gate = Rc::new(SuppressionGate::new());
    let engine = InterceptionEngine::new(scenarios, rate, Rc::clone(&gate), injector, event_tx);
    let dispatcher = Dispatcher::new(gate, engine);

    let handler = dispatcher.clone();
    if let Err(e) = hook.install(Box::new(move |event| handler.dispatch(event))) {
        error!(?e, "failed to install keyboard hook");
        let _ = ready_tx.send(Err(e));
        return;
    }
    info!("keyboard hook installed");
    let _ = ready_tx.send(Ok(()));

    while running.load(Ordering::SeqCst) {
        hook.pump(PUMP_INTERVAL);

        loop {
            match commands.try_recv() {
                Ok(command) => dispatcher.apply(command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("command channel closed");
                    running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
    }

    hook.uninstall();
    info!("keyboard hook uninstalled");
    dispatcher.teardown();
}
