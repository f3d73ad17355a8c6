use std::future::Future;
use std::time::Duration;

use log::trace;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// A background task that runs a closure on a fixed delay.
///
/// The task is owned by whoever started it: dropping the handle (or calling
/// [`PeriodicTask::stop`]) aborts it, so a timer can never outlive the
/// component that needs it.
///
/// Must be started from within a Tokio runtime.
pub struct PeriodicTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn a task that waits `initial_delay`, then runs `tick` repeatedly
    /// with `period` between the end of one run and the start of the next.
    ///
    /// # Arguments
    ///
    /// * `name` - Label used in trace logs
    /// * `initial_delay` - Delay before the first tick
    /// * `period` - Delay between ticks
    /// * `tick` - Closure producing the future to run on every tick
    pub fn spawn<F, Fut>(
        name: &'static str,
        initial_delay: Duration,
        period: Duration,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        trace!("Starting periodic task {} every {:?}", name, period);

        let handle = tokio::spawn(async move {
            sleep(initial_delay).await;
            loop {
                tick().await;
                sleep(period).await;
            }
        });

        Self { name, handle }
    }

    /// Stop the task. Equivalent to dropping it.
    pub fn stop(self) {}

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        trace!("Stopping periodic task {}", self.name);
        self.handle.abort();
    }
}
