//! Background loops moving packets between the device and the queues.

use crate::cancel::CancellationToken;
use crate::config::RetryPolicy;
use crate::{Device, Error, Packet};
use crossbeam::channel::{Receiver, Sender};
use crossbeam::select;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Smallest delay between retries unless the policy caps it lower.
const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// Exponential back-off with jitter for consecutive I/O failures.
#[derive(Debug)]
pub(crate) struct Backoff {
    policy: RetryPolicy,
    current: Duration,
    failures: u32,
}

impl Backoff {
    pub(crate) fn new(policy: RetryPolicy) -> Self {
        Self {
            current: Self::floor(&policy),
            policy,
            failures: 0,
        }
    }

    /// A zero initial delay would never grow, so start from `MIN_BACKOFF`.
    fn floor(policy: &RetryPolicy) -> Duration {
        policy
            .initial_backoff()
            .max(MIN_BACKOFF)
            .min(policy.max_backoff())
    }

    pub(crate) fn reset(&mut self) {
        self.current = Self::floor(&self.policy);
        self.failures = 0;
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }

    /// Records a failure and returns how long to wait before retrying, or
    /// `None` once the failure budget is spent.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if let Some(max) = self.policy.max_consecutive_failures {
            if self.failures > max {
                return None;
            }
        }

        let ceiling = self.current.min(self.policy.max_backoff());
        let half = ceiling / 2;
        let jitter = rand::thread_rng().gen_range(Duration::ZERO..=half);
        self.current = (ceiling * 2).min(self.policy.max_backoff());
        Some(ceiling - half + jitter)
    }
}

/// Reads packets from `device` into `incoming` until `cancel` is raised.
///
/// The token is checked before each read, never during one: a read that is
/// already blocked in the device finishes first. When `incoming` is full the
/// enqueue blocks, which throttles how fast the device is drained.
pub(crate) fn read_pump(
    device: &dyn Device,
    incoming: Sender<Packet>,
    cancel: &CancellationToken,
    packet_size: usize,
    retry: RetryPolicy,
) {
    let mut backoff = Backoff::new(retry);

    loop {
        if cancel.is_cancelled() {
            debug!("read pump cancelled");
            break;
        }

        let mut buf = vec![0u8; packet_size];
        match device.recv(&mut buf) {
            Ok(n) => {
                backoff.reset();
                buf.truncate(n);
                trace!(len = n, "packet received from device");
                if incoming.send(Packet::new(buf)).is_err() {
                    debug!("incoming queue dropped, stopping read pump");
                    break;
                }
            }
            Err(err) => {
                let err = Error::Read(err);
                warn!(error = %err, failures = backoff.failures() + 1, "device read failed");
                if !wait_before_retry(&mut backoff, cancel) {
                    break;
                }
            }
        }
    }
}

/// Writes packets from `outgoing` to `device` until `cancel` is raised.
pub(crate) fn write_pump(
    device: &dyn Device,
    outgoing: Receiver<Packet>,
    cancel: &CancellationToken,
    retry: RetryPolicy,
) {
    let mut backoff = Backoff::new(retry);

    loop {
        let packet = select! {
            recv(cancel.signal()) -> _ => None,
            recv(outgoing) -> packet => packet.ok(),
        };
        // `select!` picks randomly when both are ready.
        let packet = match packet {
            Some(packet) if !cancel.is_cancelled() => packet,
            _ => {
                debug!("write pump cancelled");
                break;
            }
        };

        match device.send(packet.as_bytes()) {
            Ok(n) => {
                backoff.reset();
                if n < packet.len() {
                    warn!(len = packet.len(), written = n, "short write to device");
                } else {
                    trace!(len = n, "packet written to device");
                }
            }
            Err(err) => {
                let err = Error::Write(err);
                warn!(
                    error = %err,
                    len = packet.len(),
                    failures = backoff.failures() + 1,
                    "device write failed"
                );
                if !wait_before_retry(&mut backoff, cancel) {
                    break;
                }
            }
        }
    }
}

/// Returns `false` if the pump should stop.
fn wait_before_retry(backoff: &mut Backoff, cancel: &CancellationToken) -> bool {
    match backoff.next_delay() {
        Some(delay) => !cancel.wait_timeout(delay),
        None => {
            error!(
                failures = backoff.failures(),
                "too many consecutive device failures, stopping pump"
            );
            false
        }
    }
}
