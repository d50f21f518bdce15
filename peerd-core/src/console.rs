use crate::Basket;

/// Receives basket observations for the peer console. Publishing is
/// fire-and-forget; implementations must not fail the caller.
pub trait Console: Send + Sync {
    fn publish_insert(&self, basket: &Basket);
    fn publish_drop(&self, basket: &Basket);
}

/// Emits console observations as structured tracing events under the
/// `peerd::console` target.
#[derive(Debug, Default, Clone)]
pub struct TracingConsole;

impl Console for TracingConsole {
    fn publish_insert(&self, basket: &Basket) {
        tracing::debug!(target: "peerd::console", basket = %basket, "insert");
    }

    fn publish_drop(&self, basket: &Basket) {
        tracing::debug!(target: "peerd::console", basket = %basket, "drop");
    }
}
