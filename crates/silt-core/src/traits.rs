use crate::error::Result;
use crate::types::ChangeEvent;
use async_trait::async_trait;

/// A durable change feed subscriber.
///
/// Implementations are stored as trait objects by the feed engine and invoked
/// for every matching event. Delivery is at-least-once: the cursor only
/// advances after `on_event` returns `Ok`, so a callback that fails (or a
/// crash between callback and cursor write) leads to redelivery. Handlers
/// must therefore be idempotent.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn on_event(&self, event: ChangeEvent) -> Result<()>;
}
