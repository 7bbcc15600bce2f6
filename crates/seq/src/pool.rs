use std::sync::Arc;

/// A bounded worker pool injected at the root of a pipeline.
///
/// Cloning is cheap and shares the underlying threads. Panics inside a
/// worker task are reported by the consumer that was waiting on the
/// element, not by tearing down the process.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<rayon::ThreadPool>,
    width: usize,
}

impl Pool {
    pub fn new(threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let inner = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("seq-worker-{i}"))
            // A panicking task drops its result channel; the consumer
            // surfaces the failure. Don't also abort the process.
            .panic_handler(|_| {
                tracing::error!("sequence worker panicked");
            })
            .build()?;
        Ok(Pool {
            inner: Arc::new(inner),
            width: threads,
        })
    }

    /// Maximum number of concurrently executing tasks.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        self.inner.spawn(job);
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("width", &self.width).finish()
    }
}
