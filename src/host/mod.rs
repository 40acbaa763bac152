//! Host integration boundary.
//!
//! The gateway never touches disk or keychain itself; the embedding host
//! supplies a [`CredentialSink`] and is responsible for durable storage.
//! Persistence failures are the host's problem to surface — the session
//! keeps the refreshed credentials in memory either way.

use async_trait::async_trait;

use crate::auth::Credentials;
use crate::error::Result;

/// Where refreshed or newly-issued credentials are written back.
///
/// Called after every successful authorization and refresh with the full
/// replacement credential set, keyed by the provider identifier.
#[async_trait]
pub trait CredentialSink: Send + Sync {
    /// Persist the complete credential set for `provider_id`.
    async fn persist(&self, provider_id: &str, credentials: &Credentials) -> Result<()>;
}

#[async_trait]
impl<T: CredentialSink + ?Sized> CredentialSink for std::sync::Arc<T> {
    async fn persist(&self, provider_id: &str, credentials: &Credentials) -> Result<()> {
        (**self).persist(provider_id, credentials).await
    }
}

/// In-memory sink for tests and hosts without durable storage.
#[derive(Debug, Default)]
pub struct MemorySink {
    stored: tokio::sync::Mutex<Vec<(String, Credentials)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every credential set persisted so far, oldest first.
    pub async fn history(&self) -> Vec<(String, Credentials)> {
        self.stored.lock().await.clone()
    }

    /// The most recently persisted credential set, if any.
    pub async fn latest(&self) -> Option<Credentials> {
        self.stored
            .lock()
            .await
            .last()
            .map(|(_, credentials)| credentials.clone())
    }
}

#[async_trait]
impl CredentialSink for MemorySink {
    async fn persist(&self, provider_id: &str, credentials: &Credentials) -> Result<()> {
        self.stored
            .lock()
            .await
            .push((provider_id.to_string(), credentials.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        let first = Credentials::with_expires_at("a1".into(), "r1".into(), 100);
        let second = Credentials::with_expires_at("a2".into(), "r2".into(), 200);

        sink.persist("google", &first).await.unwrap();
        sink.persist("google", &second).await.unwrap();

        let history = sink.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].1.access_token, "a1");
        assert_eq!(sink.latest().await.unwrap().access_token, "a2");
    }

    #[tokio::test]
    async fn test_sink_usable_through_arc() {
        let sink = std::sync::Arc::new(MemorySink::new());
        let credentials = Credentials::with_expires_at("a".into(), "r".into(), 1);
        CredentialSink::persist(&sink, "google", &credentials)
            .await
            .unwrap();
        assert!(sink.latest().await.is_some());
    }
}
