//! Single-slot acknowledgment correlation between the transmit loop and the inbound listener.
//!
//! The sender arms the exact acknowledgment text it expects, transmits, then waits. The listener
//! offers every decoded payload; only an exact match against the armed value resolves the wait.
//! Arming again supersedes the previous wait, and [`AckCorrelator::clear`] disarms once an attempt
//! is finished so late or duplicate acknowledgments fall on the floor.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::protocol::codec::SignalQuality;

/// Result of [`AckCorrelator::wait_resolved`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckOutcome {
    pub acknowledged: bool,
    /// Link quality of the most recent matched acknowledgment, if any has been seen.
    pub quality: Option<SignalQuality>,
}

#[derive(Debug, Default)]
struct AckState {
    expected: Option<String>,
    resolved: bool,
    last_quality: Option<SignalQuality>,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct AckCorrelator {
    state: Mutex<AckState>,
    notify: Notify,
}

impl AckCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AckState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set the expected acknowledgment and lower the resolved flag.
    pub fn arm(&self, expected: impl Into<String>) {
        {
            let mut state = self.lock();
            state.expected = Some(expected.into());
            state.resolved = false;
            state.generation = state.generation.wrapping_add(1);
        }
        // Wake any wait on the superseded value so it can observe the new generation.
        self.notify.notify_waiters();
    }

    /// Offer a received payload. Returns true only when it matched the armed value and this
    /// call is the one that resolved it.
    pub fn try_resolve(&self, received: &str, quality: SignalQuality) -> bool {
        let matched = {
            let mut state = self.lock();
            let armed = state.expected.as_deref() == Some(received);
            if armed && !state.resolved {
                state.resolved = true;
                state.last_quality = Some(quality);
                true
            } else {
                false
            }
        };
        if matched {
            self.notify.notify_waiters();
        }
        matched
    }

    /// Disarm without touching the last recorded quality.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.expected = None;
        state.resolved = false;
    }

    pub fn expected(&self) -> Option<String> {
        self.lock().expected.clone()
    }

    pub fn last_quality(&self) -> Option<SignalQuality> {
        self.lock().last_quality
    }

    /// Wait until the currently armed value resolves, `timeout` elapses, or the value is
    /// superseded by another [`arm`](Self::arm).
    pub async fn wait_resolved(&self, timeout: Duration) -> AckOutcome {
        let deadline = Instant::now() + timeout;
        let generation = self.lock().generation;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a resolve in between is not lost.
            notified.as_mut().enable();

            if let Some(outcome) = self.check(generation) {
                return outcome;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.check(generation).unwrap_or(AckOutcome {
                    acknowledged: false,
                    quality: self.last_quality(),
                });
            }
        }
    }

    fn check(&self, generation: u64) -> Option<AckOutcome> {
        let state = self.lock();
        if state.generation != generation {
            return Some(AckOutcome {
                acknowledged: false,
                quality: state.last_quality,
            });
        }
        if state.resolved {
            return Some(AckOutcome {
                acknowledged: true,
                quality: state.last_quality,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const Q: SignalQuality = SignalQuality { rssi: -40, snr: 10 };

    #[tokio::test]
    async fn armed_value_resolves_waiter() {
        let corr = Arc::new(AckCorrelator::new());
        corr.arm("ACKREG:4");
        let listener = corr.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(listener.try_resolve("ACKREG:4", Q));
        });
        let outcome = corr.wait_resolved(Duration::from_secs(2)).await;
        assert!(outcome.acknowledged);
        assert_eq!(outcome.quality, Some(Q));
    }

    #[tokio::test]
    async fn mismatches_leave_wait_pending_until_timeout() {
        let corr = AckCorrelator::new();
        corr.arm("ACK:4:1");
        assert!(!corr.try_resolve("ACK:4:0", Q));
        assert!(!corr.try_resolve("ACK:5:1", Q));
        let outcome = corr.wait_resolved(Duration::from_millis(30)).await;
        assert!(!outcome.acknowledged);
        assert_eq!(outcome.quality, None);
    }

    #[tokio::test]
    async fn resolve_before_wait_is_not_lost() {
        let corr = AckCorrelator::new();
        corr.arm("ACK:1:0");
        assert!(corr.try_resolve("ACK:1:0", Q));
        assert!(corr.wait_resolved(Duration::from_millis(10)).await.acknowledged);
    }

    #[tokio::test]
    async fn unarmed_resolve_does_not_leak_into_next_arm() {
        let corr = AckCorrelator::new();
        assert!(!corr.try_resolve("ACK:1:0", Q));
        corr.arm("ACK:1:0");
        let outcome = corr.wait_resolved(Duration::from_millis(20)).await;
        assert!(!outcome.acknowledged);
        assert_eq!(corr.last_quality(), None);
    }

    #[test]
    fn duplicate_and_late_acks_are_ignored() {
        let corr = AckCorrelator::new();
        corr.arm("ACK:1:0");
        assert!(corr.try_resolve("ACK:1:0", Q));
        let late = SignalQuality { rssi: -99, snr: -5 };
        assert!(!corr.try_resolve("ACK:1:0", late));
        corr.clear();
        assert!(!corr.try_resolve("ACK:1:0", late));
        assert_eq!(corr.last_quality(), Some(Q));
        assert_eq!(corr.expected(), None);
    }

    #[tokio::test]
    async fn rearming_supersedes_pending_wait() {
        let corr = Arc::new(AckCorrelator::new());
        corr.arm("ACK:1:0");
        let waiter = {
            let corr = corr.clone();
            tokio::spawn(async move { corr.wait_resolved(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        corr.arm("ACK:1:1");
        let outcome = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("superseded wait returns promptly")
            .expect("join");
        assert!(!outcome.acknowledged);
    }
}
