use async_trait::async_trait;

/// Delivers rendered content to a destination address and returns the
/// provider-assigned message id.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, content: &str, destination: &str) -> anyhow::Result<String>;

    /// Same as [`Sender::send`], with a key the transport may use to drop
    /// duplicates of the same outbound message.
    async fn send_with_key(
        &self,
        content: &str,
        destination: &str,
        _idempotency_key: &str,
    ) -> anyhow::Result<String> {
        self.send(content, destination).await
    }
}
