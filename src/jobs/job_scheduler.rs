use {
    super::{Job, JobScheduler, WakePolicy},
    std::{
        collections::{BTreeMap, HashMap},
        sync::{
            atomic::{AtomicU64, Ordering},
            Condvar, Mutex, MutexGuard, OnceLock,
        },
        time::{Duration, Instant},
    },
};

/// Stand-in delay for deadlines which `Instant` cannot represent.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("a job scheduler lock was poisoned")
}

impl JobScheduler {
    /// Create an empty scheduler.
    ///
    /// Passes which take longer than `slow_tick_threshold` are logged as
    /// warnings.
    pub fn new(slow_tick_threshold: Duration) -> Self {
        Self {
            immediate: Mutex::new(Vec::new()),
            overridable: Mutex::new(HashMap::new()),
            delayed: Mutex::new(BTreeMap::new()),
            delayed_sequence: AtomicU64::new(0),
            notified: Mutex::new(false),
            wake_signal: Condvar::new(),
            owner: OnceLock::new(),
            slow_tick_threshold,
        }
    }

    /// Run the job on the owner thread during the next pass.
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce(Instant) + Send + 'static,
    {
        lock(&self.immediate).push(Box::new(job));
        self.wake();
    }

    /// Run the job on the owner thread during the next pass, replacing any
    /// job with the same id which has not run yet.
    pub fn post_overridable<F>(&self, job: F, id: u64)
    where
        F: FnOnce(Instant) + Send + 'static,
    {
        let replaced = lock(&self.overridable)
            .insert(id, Box::new(job) as Job)
            .is_some();
        if replaced {
            log::trace!("overridable job {} replaced before it ran", id);
        }
        self.wake();
    }

    /// Run the job on the owner thread during the first pass which starts
    /// after `delay` has elapsed.
    ///
    /// Delayed jobs cannot be cancelled. Delays too long for the platform
    /// clock are clamped to a deadline decades away.
    pub fn post_delayed<F>(&self, job: F, delay: Duration)
    where
        F: FnOnce(Instant) + Send + 'static,
    {
        let now = Instant::now();
        let due = now
            .checked_add(delay)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        let sequence = self.delayed_sequence.fetch_add(1, Ordering::Relaxed);
        lock(&self.delayed).insert((due, sequence), Box::new(job));
        self.wake();
    }

    /// Interrupt the owner thread if it is blocked waiting for work.
    pub fn wake(&self) {
        *lock(&self.notified) = true;
        self.wake_signal.notify_one();
    }

    /// Decide how long the owner thread can sleep before the next pass.
    pub fn next_wake(&self) -> WakePolicy {
        if !lock(&self.overridable).is_empty() {
            return WakePolicy::RunNow;
        }
        if !lock(&self.immediate).is_empty() {
            return WakePolicy::RunNow;
        }
        match lock(&self.delayed).keys().next() {
            Some((due, _)) => WakePolicy::WaitUntil(*due),
            None => WakePolicy::WaitIndefinitely,
        }
    }

    /// Make the calling thread the owner thread.
    ///
    /// # Returns
    ///
    /// False when a different thread already owns the scheduler.
    pub fn bind_to_current_thread(&self) -> bool {
        let current = std::thread::current().id();
        *self.owner.get_or_init(|| current) == current
    }

    /// True on the owner thread, or on any thread before an owner is bound.
    pub fn is_owner_thread(&self) -> bool {
        self.owner
            .get()
            .map(|owner| *owner == std::thread::current().id())
            .unwrap_or(true)
    }

    /// Debug assertion guarding entry points which touch native handles.
    pub fn assert_owner_thread(&self) {
        debug_assert!(
            self.is_owner_thread(),
            "native api access from {:?}, only the scheduler owner thread may \
             record or submit device commands",
            std::thread::current().id(),
        );
    }

    /// Run one scheduler pass on the owner thread.
    ///
    /// Blocks until work is available (bounded by the next delayed deadline)
    /// then drains the overridable, immediate, and delayed queues.
    ///
    /// # Returns
    ///
    /// The number of jobs which were executed.
    pub fn tick(&self) -> usize {
        let is_owner = self.bind_to_current_thread();
        debug_assert!(
            is_owner,
            "JobScheduler::tick called from a thread which is not the owner"
        );

        self.wait_for_work(self.next_wake());

        let now = Instant::now();
        let executed = self.run_overridable(now)
            + self.run_immediate(now)
            + self.run_delayed(now);

        let elapsed = now.elapsed();
        if elapsed > self.slow_tick_threshold {
            log::warn!(
                "{} jobs took {:.3}ms, all scheduled work was stalled",
                executed,
                elapsed.as_secs_f64() * 1000.0
            );
        } else if executed > 0 {
            log::trace!("{} jobs done in {:?}", executed, elapsed);
        }
        executed
    }

    /// The number of jobs waiting in every queue.
    pub fn pending_jobs(&self) -> usize {
        lock(&self.overridable).len()
            + lock(&self.immediate).len()
            + lock(&self.delayed).len()
    }
}

// Private API
// -----------

impl JobScheduler {
    fn wait_for_work(&self, policy: WakePolicy) {
        let mut notified = lock(&self.notified);
        match policy {
            WakePolicy::RunNow => (),
            WakePolicy::WaitIndefinitely => {
                while !*notified {
                    notified = self
                        .wake_signal
                        .wait(notified)
                        .expect("a job scheduler lock was poisoned");
                }
            }
            WakePolicy::WaitUntil(deadline) => {
                while !*notified {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    notified = self
                        .wake_signal
                        .wait_timeout(notified, deadline - now)
                        .expect("a job scheduler lock was poisoned")
                        .0;
                }
            }
        }
        *notified = false;
    }

    fn run_overridable(&self, now: Instant) -> usize {
        let jobs = std::mem::take(&mut *lock(&self.overridable));
        let count = jobs.len();
        for (_id, job) in jobs {
            job(now);
        }
        count
    }

    fn run_immediate(&self, now: Instant) -> usize {
        let jobs = std::mem::take(&mut *lock(&self.immediate));
        let count = jobs.len();
        for job in jobs {
            job(now);
        }
        count
    }

    fn run_delayed(&self, now: Instant) -> usize {
        let mut due = std::mem::take(&mut *lock(&self.delayed));
        let later = due.split_off(&(now, u64::MAX));

        if !later.is_empty() {
            lock(&self.delayed).extend(later);
        }

        let count = due.len();
        for (_key, job) in due {
            job(now);
        }
        count
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new(Duration::from_millis(16))
    }
}
