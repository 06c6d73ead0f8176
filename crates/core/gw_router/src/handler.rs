use async_trait::async_trait;

/// A registered listener for one or more channel patterns. Services
/// implement this once and register it against every router whose traffic
/// they need to see.
///
/// Handlers never block indefinitely: the router's command queue is
/// single-threaded, so a handler that blocks stalls every other handler
/// sharing that router.
#[async_trait]
pub trait Handler: Send + Sync {
    /// The subscription patterns this handler wants to see traffic for.
    /// Called once at registration time to compute the transport's
    /// subscribe set; a handler's pattern set is fixed for its lifetime.
    fn patterns(&self) -> Vec<String>;

    async fn on_message(&self, channel: &str, payload: &[u8]);
}
