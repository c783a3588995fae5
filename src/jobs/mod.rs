//! Deferred work which is executed by a single designated owner thread.

mod job_scheduler;

use std::{
    collections::{BTreeMap, HashMap},
    sync::{atomic::AtomicU64, Condvar, Mutex, OnceLock},
    thread::ThreadId,
    time::{Duration, Instant},
};

/// A unit of deferred work. Jobs receive the instant the scheduler pass
/// started.
pub type Job = Box<dyn FnOnce(Instant) + Send + 'static>;

/// How the owner thread should wait before the next scheduler pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakePolicy {
    /// Immediate or overridable jobs are pending.
    RunNow,

    /// Only delayed jobs are pending, the earliest is due at this instant.
    WaitUntil(Instant),

    /// Nothing is pending.
    WaitIndefinitely,
}

/// Three job queues drained exclusively by one owner thread.
///
/// Any thread can post jobs. The owner thread calls
/// [JobScheduler::tick] which blocks until work is available and then runs
/// every overridable job, every immediate job, and every delayed job which is
/// due, in that order.
///
/// Jobs posted while a pass is running are never executed during that same
/// pass.
pub struct JobScheduler {
    immediate: Mutex<Vec<Job>>,
    overridable: Mutex<HashMap<u64, Job>>,

    /// Keyed by due time, ties are broken by the post sequence number.
    delayed: Mutex<BTreeMap<(Instant, u64), Job>>,
    delayed_sequence: AtomicU64,

    /// True when something has been posted since the owner last woke.
    notified: Mutex<bool>,
    wake_signal: Condvar,

    owner: OnceLock<ThreadId>,
    slow_tick_threshold: Duration,
}
