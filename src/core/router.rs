use crate::core::message::Notify;
use crate::core::traits::Handler;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(Notify) + Send + Sync,
{
    async fn handle(&self, _ctx: &CancellationToken, notify: Notify) {
        (self.0)(notify);
    }
}

/// [`Handler`] that dispatches notifications by channel name
///
/// Exact routes win over prefix routes; among prefixes the longest match wins.
/// Unmatched notifications go to the fallback, or are dropped.
#[derive(Default)]
pub struct ChannelRouter {
    exact: HashMap<String, Arc<dyn Handler>>,
    prefixes: Vec<(String, Arc<dyn Handler>)>,
    fallback: Option<Arc<dyn Handler>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn route(mut self, channel: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.exact.insert(channel.into(), handler);
        self
    }

    /// Route every channel starting with `prefix`, e.g. `book.`
    #[must_use]
    pub fn route_prefix(mut self, prefix: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.prefixes.push((prefix.into(), handler));
        self.prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    #[must_use]
    pub fn route_fn<F>(self, channel: impl Into<String>, callback: F) -> Self
    where
        F: Fn(Notify) + Send + Sync + 'static,
    {
        self.route(channel, Arc::new(FnHandler(callback)))
    }

    #[must_use]
    pub fn fallback(mut self, handler: Arc<dyn Handler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    fn resolve(&self, channel: &str) -> Option<&Arc<dyn Handler>> {
        self.exact
            .get(channel)
            .or_else(|| {
                self.prefixes
                    .iter()
                    .find(|(prefix, _)| channel.starts_with(prefix.as_str()))
                    .map(|(_, handler)| handler)
            })
            .or(self.fallback.as_ref())
    }
}

#[async_trait]
impl Handler for ChannelRouter {
    async fn handle(&self, ctx: &CancellationToken, notify: Notify) {
        match self.resolve(notify.channel()) {
            Some(handler) => handler.handle(ctx, notify).await,
            None => trace!(channel = %notify.channel(), "No route for notification"),
        }
    }
}
