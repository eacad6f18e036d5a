//! Supervision of the exporter process: launch, health window, lifecycle
//! hooks, and signal-driven shutdown.
use std::{
    os::unix::process::CommandExt,
    process::{Command, ExitStatus},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError},
    },
    thread,
    time::Duration,
};

use nix::{
    sys::signal::{SigSet, Signal, SigmaskHow, sigprocmask},
    unistd::Pid,
};
use tracing::{debug, error, info};

use crate::{
    error::SidecarError,
    hooks::{PostStartHooks, PreStopHooks},
    signal::{self, ForwardGate, SignalRelay},
};

/// Time the exporter must survive after launch before it is presumed healthy.
pub const DEFAULT_HEALTH_WINDOW: Duration = Duration::from_secs(3);

/// Supervision events raced by the agent's run loop.
pub enum Event {
    /// The exporter exited, or waiting on it failed.
    Exited(std::io::Result<ExitStatus>),
    /// A termination signal reached the sidecar.
    Signal(Signal),
}

/// Supervisor owning the exporter child process and its lifecycle hooks.
///
/// The lifecycle is: launch the child, race its exit against termination
/// signals and the health window, run post-start hooks once the window
/// elapses, then wait for exit or a relayed signal and run pre-stop hooks
/// exactly once on the way out.
pub struct Agent {
    command: Command,
    service: String,
    post_start: PostStartHooks,
    pre_stop: Arc<PreStopHooks>,
    health_window: Duration,
}

impl Agent {
    /// Creates an agent for a fully built exporter invocation.
    pub fn new(command: Command, service: impl Into<String>) -> Self {
        Self {
            command,
            service: service.into(),
            post_start: PostStartHooks::default(),
            pre_stop: Arc::new(PreStopHooks::default()),
            health_window: DEFAULT_HEALTH_WINDOW,
        }
    }

    /// Overrides the health-assessment window.
    pub fn with_health_window(mut self, window: Duration) -> Self {
        self.health_window = window;
        self
    }

    /// Appends a hook to run once the exporter is presumed healthy.
    pub fn add_post_start_hook<F>(&mut self, hook: F)
    where
        F: FnMut() -> Result<(), SidecarError> + Send + 'static,
    {
        self.post_start.push(hook);
    }

    /// Appends a hook to run ahead of shutdown, at most once.
    pub fn add_pre_stop_hook<F>(&mut self, hook: F) -> Result<(), SidecarError>
    where
        F: FnMut() -> Result<(), SidecarError> + Send + 'static,
    {
        self.pre_stop.push(hook)
    }

    /// Runs the supervision lifecycle to completion.
    ///
    /// Returns `Ok(())` when the exporter exits cleanly or shutdown was
    /// initiated by a relayed signal; otherwise the child's exit error.
    pub fn run(mut self) -> Result<(), SidecarError> {
        // Block the relayed signals before any thread exists so every thread
        // inherits the mask and delivery funnels into the relay's sigwait.
        let mask = signal::forwarded_sigset();
        mask.thread_block()?;

        unsafe {
            self.command.pre_exec(|| {
                // Runs in the forked child: restore a clean signal mask.
                sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None)
                    .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))
            });
        }

        debug!("Launching exporter: {:?}", self.command);
        let program = self.command.get_program().to_string_lossy().into_owned();
        let mut child = self
            .command
            .spawn()
            .map_err(|source| SidecarError::Launch {
                command: program,
                source,
            })?;
        let pid = Pid::from_raw(child.id() as i32);
        info!("Exporter '{}' started with PID {pid}", self.service);

        let reaped = Arc::new(AtomicBool::new(false));
        let gate = Arc::new(ForwardGate::default());
        let (events_tx, events) = mpsc::channel();

        {
            let reaped = Arc::clone(&reaped);
            let events_tx = events_tx.clone();
            thread::spawn(move || {
                let outcome = child.wait();
                reaped.store(true, Ordering::SeqCst);
                let _ = events_tx.send(Event::Exited(outcome));
            });
        }

        SignalRelay::spawn(
            mask,
            pid,
            Arc::clone(&reaped),
            Arc::clone(&gate),
            Arc::clone(&self.pre_stop),
            events_tx,
        );

        // Starting: race child exit, signals, and the health timer.
        match events.recv_timeout(self.health_window) {
            Ok(Event::Exited(outcome)) => {
                return if gate.is_spent() {
                    info!("Graceful shutdown");
                    Ok(())
                } else {
                    debug!("Exporter exited before the health window elapsed");
                    exit_outcome(outcome)
                };
            }
            Ok(Event::Signal(sig)) => {
                info!("Shutdown requested by {sig} before the exporter became healthy");
                // The relay forwarded the signal; do not return while the
                // child may still be shutting down.
                wait_for_exit(&events)?;
                info!("Graceful shutdown");
                return Ok(());
            }
            Err(RecvTimeoutError::Timeout) => {
                info!(
                    "Exporter '{}' survived the health window, presumed healthy",
                    self.service
                );
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(SidecarError::ChannelClosed);
            }
        }

        // Running: registration and friends. A failure here aborts the run
        // and leaves the exporter alive; the caller owns that decision.
        self.post_start.run()?;

        // ShuttingDown: wait for the exporter to exit or a signal to arrive.
        loop {
            match events.recv() {
                Ok(Event::Exited(outcome)) => {
                    if let Err(err) = self.pre_stop.run() {
                        error!("Error occurred while executing pre-stop hooks: {err}");
                    }
                    return if gate.is_spent() {
                        info!("Graceful shutdown");
                        Ok(())
                    } else {
                        exit_outcome(outcome)
                    };
                }
                Ok(Event::Signal(sig)) => {
                    debug!("Waiting for the exporter to exit after {sig}");
                }
                Err(_) => return Err(SidecarError::ChannelClosed),
            }
        }
    }
}

/// Blocks until the waiter thread reports the child's exit.
fn wait_for_exit(events: &Receiver<Event>) -> Result<(), SidecarError> {
    loop {
        match events.recv() {
            Ok(Event::Exited(outcome)) => {
                outcome.map_err(SidecarError::Wait)?;
                return Ok(());
            }
            Ok(Event::Signal(_)) => continue,
            Err(_) => return Err(SidecarError::ChannelClosed),
        }
    }
}

/// Maps the child's exit status onto the run outcome.
fn exit_outcome(outcome: std::io::Result<ExitStatus>) -> Result<(), SidecarError> {
    let status = outcome.map_err(SidecarError::Wait)?;
    if status.success() {
        Ok(())
    } else {
        Err(SidecarError::ChildExited { status })
    }
}
