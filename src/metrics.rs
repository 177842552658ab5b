//! Process-wide delivery counters.
//! Cheap relaxed atomics; a [`snapshot`] is logged at shutdown.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static ATTEMPTS: AtomicU64 = AtomicU64::new(0);
static ACKNOWLEDGED: AtomicU64 = AtomicU64::new(0);
static TIMEOUTS: AtomicU64 = AtomicU64::new(0);
static EXHAUSTED: AtomicU64 = AtomicU64::new(0);
static ACKS_SENT: AtomicU64 = AtomicU64::new(0);
static MALFORMED: AtomicU64 = AtomicU64::new(0);
static DECODE_FAILURES: AtomicU64 = AtomicU64::new(0);

pub fn inc_attempts() {
    ATTEMPTS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_acknowledged() {
    ACKNOWLEDGED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_timeouts() {
    TIMEOUTS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_exhausted() {
    EXHAUSTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_acks_sent() {
    ACKS_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_malformed() {
    MALFORMED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_decode_failures() {
    DECODE_FAILURES.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub attempts: u64,
    pub acknowledged: u64,
    pub timeouts: u64,
    pub exhausted: u64,
    pub acks_sent: u64,
    pub malformed: u64,
    pub decode_failures: u64,
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempts={} acked={} timeouts={} exhausted={} acks_sent={} malformed={} decode_failures={}",
            self.attempts,
            self.acknowledged,
            self.timeouts,
            self.exhausted,
            self.acks_sent,
            self.malformed,
            self.decode_failures
        )
    }
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        attempts: ATTEMPTS.load(Ordering::Relaxed),
        acknowledged: ACKNOWLEDGED.load(Ordering::Relaxed),
        timeouts: TIMEOUTS.load(Ordering::Relaxed),
        exhausted: EXHAUSTED.load(Ordering::Relaxed),
        acks_sent: ACKS_SENT.load(Ordering::Relaxed),
        malformed: MALFORMED.load(Ordering::Relaxed),
        decode_failures: DECODE_FAILURES.load(Ordering::Relaxed),
    }
}
