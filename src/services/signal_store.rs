use crate::services::sqlite_store::SqliteStore;
use crate::types::Signal;
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Durable, read-only log of fired signals.
#[async_trait::async_trait]
pub trait SignalStore: Send + Sync {
    /// Signals of one type triggered at or after `since`, oldest first.
    async fn read_since(&self, signal_type: &str, since: DateTime<Utc>) -> Result<Vec<Signal>>;

    /// Signal types present in the log.
    async fn signal_types(&self) -> Result<Vec<String>>;
}

#[async_trait::async_trait]
impl SignalStore for SqliteStore {
    async fn read_since(&self, signal_type: &str, since: DateTime<Utc>) -> Result<Vec<Signal>> {
        Ok(self.signals_since(signal_type, since)?)
    }

    async fn signal_types(&self) -> Result<Vec<String>> {
        Ok(SqliteStore::signal_types(self)?)
    }
}
