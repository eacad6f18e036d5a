//! Relay of OS termination signals to the supervised exporter.
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
    },
    thread::{self, JoinHandle},
};

use nix::{
    sys::signal::{self, SigSet, Signal},
    unistd::Pid,
};
use tracing::{error, info};

use crate::{agent::Event, hooks::PreStopHooks};

/// Signals the sidecar intercepts and forwards to the exporter.
pub const FORWARDED_SIGNALS: [Signal; 3] =
    [Signal::SIGINT, Signal::SIGTERM, Signal::SIGQUIT];

/// Builds the signal set the relay subscribes to.
pub fn forwarded_sigset() -> SigSet {
    let mut mask = SigSet::empty();
    for sig in FORWARDED_SIGNALS {
        mask.add(sig);
    }
    mask
}

/// One-shot latch ensuring at most one signal is ever forwarded to the child,
/// no matter how many arrive.
#[derive(Debug, Default)]
pub struct ForwardGate(AtomicBool);

impl ForwardGate {
    /// Returns `true` exactly once; every later call returns `false`.
    pub fn try_acquire(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    /// Whether the gate has already been acquired.
    pub fn is_spent(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Background thread that waits for termination signals and relays them.
///
/// Per signal: run the pre-stop hooks (best-effort), forward the same signal
/// to the child while it is still unreaped, and report the signal to the
/// supervisor. The relay stops once the supervisor has dropped its end of
/// the event channel.
pub struct SignalRelay {
    mask: SigSet,
    child: Pid,
    reaped: Arc<AtomicBool>,
    gate: Arc<ForwardGate>,
    pre_stop: Arc<PreStopHooks>,
    events: Sender<Event>,
}

impl SignalRelay {
    /// Starts the relay thread.
    ///
    /// The signals in `mask` must already be blocked in every thread of the
    /// process, otherwise delivery may bypass the `sigwait` loop. The shared
    /// `gate` lets the supervisor observe whether a signal was forwarded.
    pub fn spawn(
        mask: SigSet,
        child: Pid,
        reaped: Arc<AtomicBool>,
        gate: Arc<ForwardGate>,
        pre_stop: Arc<PreStopHooks>,
        events: Sender<Event>,
    ) -> JoinHandle<()> {
        let relay = Self {
            mask,
            child,
            reaped,
            gate,
            pre_stop,
            events,
        };
        thread::spawn(move || relay.run())
    }

    fn run(self) {
        loop {
            let sig = match self.mask.wait() {
                Ok(sig) => sig,
                Err(errno) => {
                    error!("Waiting for signals failed: {errno}");
                    return;
                }
            };

            info!("Received signal {sig}, relaying to the exporter");

            if let Err(err) = self.pre_stop.run() {
                error!("Error occurred while executing pre-stop hooks: {err}");
            }

            if self.gate.try_acquire() && !self.reaped.load(Ordering::SeqCst) {
                if let Err(err) = signal::kill(self.child, sig) {
                    error!("Failed to forward {sig} to the exporter: {err}");
                }
            }

            // A dropped receiver is the supervisor's shutdown cue.
            if self.events.send(Event::Signal(sig)).is_err() {
                return;
            }
        }
    }
}
