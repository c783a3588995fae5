mod config;
mod listener;

use {
    crate::{
        graphics::vulkan_api::{
            AllocatorError, DeviceApi, StagingError, StagingPipeline,
        },
        jobs::JobScheduler,
    },
    std::{
        sync::{Arc, Mutex, MutexGuard},
        time::{Duration, Instant},
    },
};

pub use self::{config::ContextConfig, listener::Listener};

/// The explicit context shared by every component which touches the device.
///
/// A RenderContext bundles the device, the job scheduler which serializes
/// native api access onto one owner thread, and the staging pipeline which
/// batches transfers. Components keep an `Arc<RenderContext>` instead of
/// reaching for global state.
pub struct RenderContext {
    staging: Mutex<StagingPipeline>,
    listeners: Mutex<Vec<Box<dyn Listener>>>,
    jobs: JobScheduler,
    config: ContextConfig,
    device: Arc<dyn DeviceApi>,
}

impl RenderContext {
    /// Create the context and its staging pipeline.
    ///
    /// The thread which first calls [RenderContext::run_once] becomes the
    /// owner thread.
    pub fn new(
        device: Arc<dyn DeviceApi>,
        config: ContextConfig,
    ) -> Result<Arc<Self>, AllocatorError> {
        let mut staging = StagingPipeline::new(
            device.clone(),
            config.staging_capacity,
            config.staging_memory,
            config.staging_usage,
        )?;
        log::debug!("created render context with {:#?}", config);
        Ok(Arc::new_cyclic(|context| {
            staging.attach_context(context.clone());
            Self {
                staging: Mutex::new(staging),
                listeners: Mutex::new(vec![]),
                jobs: JobScheduler::new(config.slow_tick_threshold),
                config,
                device,
            }
        }))
    }

    pub fn device(&self) -> &Arc<dyn DeviceApi> {
        &self.device
    }

    pub fn jobs(&self) -> &JobScheduler {
        &self.jobs
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// See [JobScheduler::post].
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce(Instant) + Send + 'static,
    {
        self.jobs.post(job)
    }

    /// See [JobScheduler::post_overridable].
    pub fn post_overridable<F>(&self, job: F, id: u64)
    where
        F: FnOnce(Instant) + Send + 'static,
    {
        self.jobs.post_overridable(job, id)
    }

    /// See [JobScheduler::post_delayed].
    pub fn post_delayed<F>(&self, job: F, delay: Duration)
    where
        F: FnOnce(Instant) + Send + 'static,
    {
        self.jobs.post_delayed(job, delay)
    }

    /// Lock the staging pipeline for recording.
    ///
    /// Only the owner thread may record commands. Do not hold the guard while
    /// calling [RenderContext::flush] or anything which updates a
    /// device-local buffer.
    pub fn staging(&self) -> MutexGuard<'_, StagingPipeline> {
        self.jobs.assert_owner_thread();
        self.lock_staging_any_thread()
    }

    /// Run the closure once, after the next flush has completed.
    ///
    /// Callable from any thread. Registering a callback does not touch the
    /// device.
    pub fn on_flushed<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.lock_staging_any_thread().on_flushed(callback);
    }

    /// Submit every recorded staging command, wait for the device, then run
    /// the flush callbacks.
    ///
    /// Callbacks run after the staging pipeline is unlocked, so they can post
    /// jobs or record commands for the next flush.
    pub fn flush(&self) -> Result<(), StagingError> {
        let callbacks = self.staging().flush().map_err(|err| {
            log::error!("Unable to flush staged transfers: {}", err);
            err
        })?;
        if !callbacks.is_empty() {
            log::trace!("running {} flush callbacks", callbacks.len());
        }
        for callback in callbacks {
            callback();
        }
        Ok(())
    }

    /// Run one pass on the owner thread.
    ///
    /// A pass runs one scheduler tick (which blocks until work is
    /// available), flushes the staging pipeline, then invokes every listener
    /// in registration order.
    ///
    /// # Returns
    ///
    /// The number of jobs executed by the tick.
    pub fn run_once(&self) -> Result<usize, StagingError> {
        let executed = self.jobs.tick();
        self.flush()?;
        self.notify_listeners(Instant::now());
        Ok(executed)
    }

    /// Run passes until `should_stop` returns true.
    ///
    /// `should_stop` is checked before every pass. Threads which flip the
    /// stop condition should call [JobScheduler::wake] so an idle owner
    /// thread notices.
    pub fn run_until<F>(&self, mut should_stop: F) -> Result<(), StagingError>
    where
        F: FnMut() -> bool,
    {
        while !should_stop() {
            self.run_once()?;
        }
        Ok(())
    }

    /// Register a listener to be invoked after every pass.
    pub fn add_listener(&self, listener: Box<dyn Listener>) {
        self.listeners
            .lock()
            .expect("the listener lock was poisoned")
            .push(listener);
    }
}

// Crate API
// ---------

impl RenderContext {
    /// Lock the staging pipeline without the owner thread check.
    ///
    /// Used by producer threads for scratch uploads, which only write host
    /// memory and post jobs.
    pub(crate) fn lock_staging_any_thread(
        &self,
    ) -> MutexGuard<'_, StagingPipeline> {
        self.staging
            .lock()
            .expect("the staging pipeline lock was poisoned")
    }
}

// Private API
// -----------

impl RenderContext {
    fn notify_listeners(&self, now: Instant) {
        let mut listeners = std::mem::take(
            &mut *self
                .listeners
                .lock()
                .expect("the listener lock was poisoned"),
        );
        if listeners.is_empty() {
            return;
        }
        for listener in listeners.iter_mut() {
            listener.on_pass(self, now);
        }

        // listeners added during the pass go after the existing ones
        let mut registered =
            self.listeners.lock().expect("the listener lock was poisoned");
        listeners.append(&mut registered);
        *registered = listeners;
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        let pending = self.jobs.pending_jobs();
        if pending > 0 {
            log::debug!(
                "dropping render context with {} jobs still queued",
                pending
            );
        }
    }
}
