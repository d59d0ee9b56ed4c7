//! User background tasks attached to an endpoint.
//!
//! A task is registered before `start()`/`run()` and spawned exactly once when
//! the endpoint starts, concurrently with connection handling. Each task gets a
//! [`TaskContext`]; when the endpoint stops the task's future is dropped at its
//! next await point. A periodic task looks like
//!
//! ```ignore
//! loop {
//!     sender.send(msg.clone()).await.ok();
//!     if !ctx.sleep(Duration::from_secs(1)).await {
//!         break;
//!     }
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};

/// Handle passed to a running background task.
#[derive(Clone, Debug)]
pub struct TaskContext {
    name: String,
    token: CancellationToken,
}

impl TaskContext {
    /// Task name, as registered.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the endpoint is stopping.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the endpoint starts stopping.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Sleep for `duration`. Returns `false` if the endpoint began stopping first.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(duration) => true,
            () = self.token.cancelled() => false,
        }
    }
}

type TaskFactory = Box<dyn FnOnce(TaskContext) -> BoxFuture<'static, ()> + Send>;

/// A registered, not yet started, background task.
pub(crate) struct BackgroundTask {
    name: String,
    factory: TaskFactory,
}

impl BackgroundTask {
    pub(crate) fn new<F, Fut>(name: impl Into<String>, task: F) -> Self
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            factory: Box::new(move |ctx| task(ctx).boxed()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the task under `token`. A task still pending after cancellation is dropped.
    pub(crate) fn spawn(self, token: &CancellationToken) -> JoinHandle<()> {
        let Self { name, factory } = self;
        let ctx = TaskContext {
            name: name.clone(),
            token: token.child_token(),
        };
        let token = ctx.token.clone();
        let fut = factory(ctx);
        let span = info_span!("background_task", task = %name);

        tokio::spawn(
            async move {
                info!("background task started");
                // catch_unwind keeps a panicking task from taking the endpoint down.
                // The task is polled first so one that returns on cancellation finishes.
                let outcome = tokio::select! {
                    biased;
                    result = std::panic::AssertUnwindSafe(fut).catch_unwind() => Some(result),
                    () = token.cancelled() => None,
                };
                match outcome {
                    Some(Ok(())) => info!("background task finished"),
                    Some(Err(_)) => error!("background task panicked"),
                    None => debug!("background task cancelled"),
                }
            }
            .instrument(span),
        )
    }
}

/// Spawn every task; handles are returned in registration order.
pub(crate) fn spawn_all(tasks: Vec<BackgroundTask>, token: &CancellationToken) -> Vec<JoinHandle<()>> {
    tasks.into_iter().map(|task| task.spawn(token)).collect()
}
