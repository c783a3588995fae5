use {super::RenderContext, std::time::Instant};

/// Hooks invoked on the owner thread by [RenderContext::run_once].
///
/// Listeners run in registration order, after the scheduler pass and the
/// staging flush. Listeners can post jobs, record staging commands, and
/// register new listeners.
pub trait Listener: Send {
    fn on_pass(&mut self, context: &RenderContext, now: Instant);
}

impl<F> Listener for F
where
    F: FnMut(&RenderContext, Instant) + Send,
{
    fn on_pass(&mut self, context: &RenderContext, now: Instant) {
        self(context, now)
    }
}
