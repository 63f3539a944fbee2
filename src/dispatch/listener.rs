//! Listening lifecycle controller.
//!
//! One background receive loop per actively-listened channel. The handler
//! registry decides *whether* a channel should be listening (handler count
//! above the system-handler baseline); this controller owns the *how*:
//! idempotent start/stop serialized per channel, so concurrent handler
//! add/remove can never race two loops onto one channel or strand a loop
//! with no listeners.

use crate::communicator::Communicator;
use crate::error::Error;
use crate::telemetry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use switchboard_proto::Channel;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, warn};

struct RunningLoop {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    running: Option<RunningLoop>,
}

/// Starts and stops per-channel receive loops.
pub struct ListenerController {
    slots: [tokio::sync::Mutex<Slot>; 4],
    flags: [AtomicBool; 4],
}

impl Default for ListenerController {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerController {
    /// Controller with no loops running.
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| tokio::sync::Mutex::new(Slot::default())),
            flags: std::array::from_fn(|_| AtomicBool::new(false)),
        }
    }

    fn index(channel: Channel) -> usize {
        Channel::ALL
            .iter()
            .position(|c| *c == channel)
            .expect("channel in closed set")
    }

    /// Whether a receive loop is currently running for `channel`.
    pub fn is_listening(&self, channel: Channel) -> bool {
        self.flags[Self::index(channel)].load(Ordering::Acquire)
    }

    /// Bring the channel's loop in line with the registry's current
    /// listening decision. Idempotent; the per-channel async mutex
    /// serializes competing transitions.
    ///
    /// The decision is read fresh under the slot lock rather than passed
    /// in by the caller: handler add/remove can race, and a decision
    /// computed before the slot lock was won may describe a registry state
    /// that no longer exists. Re-reading makes the last transition applied
    /// reflect the registry as it is now, whatever order callers arrive in.
    ///
    /// Must not be called from the channel's own dispatch path: stopping
    /// waits for the loop task to exit.
    pub async fn sync(&self, comm: &Communicator, channel: Channel) {
        let index = Self::index(channel);
        let mut slot = self.slots[index].lock().await;
        let desired = comm.should_listen(channel);
        match (desired, slot.running.is_some()) {
            (true, false) => {
                let stop = CancellationToken::new();
                let task = tokio::spawn(
                    receive_loop(comm.clone(), channel, stop.clone())
                        .instrument(telemetry::spans::listener(comm.identity(), channel)),
                );
                slot.running = Some(RunningLoop { stop, task });
                self.flags[index].store(true, Ordering::Release);
                debug!(channel = %channel, "listening started");
            }
            (false, true) => {
                Self::stop_slot(&mut slot, &self.flags[index], channel).await;
            }
            _ => {}
        }
    }

    /// Stop every running loop and wait for the tasks to exit, regardless
    /// of what the registry still holds.
    pub async fn stop_all(&self) {
        for channel in Channel::ALL {
            let index = Self::index(channel);
            let mut slot = self.slots[index].lock().await;
            Self::stop_slot(&mut slot, &self.flags[index], channel).await;
        }
    }

    async fn stop_slot(slot: &mut Slot, flag: &AtomicBool, channel: Channel) {
        let Some(running) = slot.running.take() else { return };
        running.stop.cancel();
        if let Err(join_err) = running.task.await {
            warn!(channel = %channel, error = %join_err, "listener task aborted");
        }
        flag.store(false, Ordering::Release);
        debug!(channel = %channel, "listening stopped");
    }
}

/// Delay before retrying after a failure to open a receiver.
const REOPEN_DELAY: Duration = Duration::from_millis(500);

async fn receive_loop(comm: Communicator, channel: Channel, stop: CancellationToken) {
    // Open the receiver, retrying until it sticks or the loop is stopped.
    // The session-affine channel accepts this communicator's own session.
    let mut receiver = loop {
        let opened = if channel.is_session_affine() {
            comm.transport().accept_session(comm.identity()).await
        } else {
            comm.transport().receiver(channel).await
        };
        match opened {
            Ok(receiver) => break receiver,
            Err(err) => {
                warn!(channel = %channel, code = err.code(), error = %err, "receiver open failed");
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = tokio::time::sleep(REOPEN_DELAY) => {}
                }
            }
        }
    };

    let receive_timeout = comm.config().receive_timeout;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            received = receiver.receive(receive_timeout) => match received {
                Ok(Some(delivery)) => {
                    let status = comm.dispatch_inbound(channel, &delivery.message).await;
                    let settled = if status.marked_for_deletion() {
                        receiver.complete(delivery.token).await
                    } else {
                        let reason = if status.claims() { "no longer expected" } else { "no handler" };
                        receiver.dead_letter(delivery.token, reason).await
                    };
                    if let Err(err) = settled {
                        warn!(channel = %channel, id = %delivery.message.id, code = err.code(),
                            error = %err, "delivery settlement failed");
                    }
                }
                // Idle timeout; keep polling.
                Ok(None) => {}
                Err(Error::LockLost) => {
                    if let Err(err) = receiver.renew_lock().await {
                        warn!(channel = %channel, code = err.code(), error = %err,
                            "session lock renewal failed");
                    }
                }
                Err(err) => {
                    warn!(channel = %channel, code = err.code(), error = %err, "receive failed");
                }
            }
        }
    }
    if let Err(err) = receiver.close().await {
        warn!(channel = %channel, code = err.code(), error = %err, "receiver close failed");
    }
}
