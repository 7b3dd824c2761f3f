//! Drives a `kube_runtime::watcher` stream into a handler.
//!
//! Adapted from the teacher's `watcher::Runner`/`RunStream`
//! (`operator-common::watcher` in `drogue-iot-drogue-cloud`), generalized
//! from `kube::api::DynamicObject` + `drogue_cloud_registry_events::EventHandler`
//! to any typed Kubernetes resource and a plain async handler trait — the
//! Event trigger of `spec.md` §4.5 needs nothing registry-specific, just a
//! label-selected watch over `ConfigMap`s.

use futures::{Stream, StreamExt, TryStreamExt};
use kube_runtime::watcher::Event;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::task::JoinHandle;

#[async_trait::async_trait]
pub trait WatchHandler<T>: Send + Sync {
    async fn handle(&self, resource: &T) -> Result<(), ()>;
}

#[async_trait::async_trait]
impl<T, F, Fut> WatchHandler<T> for F
where
    T: Send + Sync,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), ()>> + Send,
    T: Clone,
{
    async fn handle(&self, resource: &T) -> Result<(), ()> {
        (self)(resource.clone()).await
    }
}

/// Run a watch stream to completion, dispatching each observed resource to
/// `handler`. Returned [`Runner`] tracks whether the loop is still alive,
/// which the health surface (`spec.md` §4.6/§6) reports through `/healthy`.
pub trait RunStream<T> {
    fn run_stream<H>(self, handler: H) -> Runner
    where
        H: WatchHandler<T> + 'static;
}

impl<S, T, E> RunStream<T> for S
where
    T: Clone + Send + Sync + 'static,
    E: Send + std::fmt::Debug,
    S: Stream<Item = Result<Event<T>, E>> + Send + 'static,
{
    fn run_stream<H>(self, handler: H) -> Runner
    where
        H: WatchHandler<T> + 'static,
    {
        Runner::new(Box::pin(self), handler)
    }
}

pub struct Runner {
    _handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

impl Runner {
    pub fn new<S, T, H, E>(stream: S, handler: H) -> Self
    where
        T: Clone + Send + Sync + 'static,
        E: Send + std::fmt::Debug,
        S: Stream<Item = Result<Event<T>, E>> + Unpin + Send + 'static,
        H: WatchHandler<T> + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();
        let handle = tokio::spawn(async move {
            let mut stream = stream
                .inspect_err(|err| tracing::warn!(?err, "watch stream error"))
                .filter_map(|item| async move { item.ok() })
                .map(Self::expand)
                .flatten();

            while let Some(resource) = stream.next().await {
                let mut attempts = 0;
                while handler.handle(&resource).await.is_err() {
                    attempts += 1;
                    if attempts > 10 {
                        tracing::error!("giving up on watch event after repeated failures");
                        break;
                    }
                }
            }
            r.store(false, Ordering::Relaxed);
            tracing::info!("watch runner exiting");
        });
        Self {
            _handle: handle,
            running,
        }
    }

    /// Whether the underlying watch loop is still running. Used by the
    /// health surface as a liveness signal.
    pub fn is_alive(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn expand<T>(event: Event<T>) -> futures::stream::Iter<std::vec::IntoIter<T>> {
        let items = match event {
            Event::Applied(resource) | Event::Deleted(resource) => vec![resource],
            Event::Restarted(resources) => resources,
        };
        futures::stream::iter(items)
    }
}
