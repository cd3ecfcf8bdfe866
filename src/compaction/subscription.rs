//! C8 — the compactor subscription and the `readCompacted` view it feeds
//! (spec §4.8).

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::DispatchError;
use crate::ledger::{Cursor, LedgerError, ManagedLedger};
use crate::model::{Entry, Position};

use super::compactor::{CompactionResult, Compactor};

/// The durable cursor name a topic's compaction runs read through —
/// distinct from any consumer-visible subscription.
pub const COMPACTOR_SUBSCRIPTION_NAME: &str = crate::constants::COMPACTOR_SUBSCRIPTION_NAME;

/// Drives compaction runs for one topic against its own dedicated cursor.
pub struct CompactorSubscription {
    compactor: Compactor,
}

impl CompactorSubscription {
    pub fn new(phase_two_max_pending: usize, read_batch_size: u32) -> Self {
        Self { compactor: Compactor::new(phase_two_max_pending, read_batch_size) }
    }

    /// Run one compaction pass against `source`, publishing the result
    /// into `view` on success.
    pub async fn run(&self, source: &dyn ManagedLedger, sink: Arc<dyn ManagedLedger>, view: &CompactedView) -> Result<CompactionResult, DispatchError> {
        let reader = source.open_cursor(COMPACTOR_SUBSCRIPTION_NAME, None).await?;
        let result = self.compactor.compact(source, reader, Arc::clone(&sink)).await?;
        view.publish(sink, result.last_compacted_position).await;
        Ok(result)
    }
}

struct ViewState {
    ledger: Arc<dyn ManagedLedger>,
    cursor: Box<dyn Cursor>,
    horizon: Position,
}

/// The read side a `readCompacted` consumer's dispatcher consults before
/// falling back to the raw backlog: everything up to `horizon` is served
/// from the compacted ledger instead, so superseded keys are never
/// redelivered.
pub struct CompactedView {
    state: Mutex<Option<ViewState>>,
}

impl CompactedView {
    pub fn new() -> Self {
        Self { state: Mutex::new(None) }
    }

    /// Replace the published compacted ledger with a freshly compacted one.
    pub async fn publish(&self, ledger: Arc<dyn ManagedLedger>, horizon: Position) {
        let cursor = ledger
            .open_cursor("__compacted_view", None)
            .await
            .expect("opening a cursor on a freshly built compacted ledger cannot fail");
        *self.state.lock().await = Some(ViewState { ledger, cursor, horizon });
    }

    pub async fn horizon(&self) -> Option<Position> {
        self.state.lock().await.as_ref().map(|s| s.horizon)
    }

    /// Read the next batch from the compacted ledger. Returns `None` once
    /// the compacted ledger is exhausted (or no view has been published
    /// yet), signalling the caller to resume reading the raw backlog from
    /// just past `horizon`.
    pub async fn try_read(&self, max_entries: u32) -> Option<Vec<Entry>> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut()?;
        match state.cursor.async_read_entries_or_wait(max_entries).await {
            Ok(entries) if !entries.is_empty() => Some(entries),
            Ok(_) | Err(LedgerError::NoMoreEntriesToRead) => None,
            Err(_) => None,
        }
    }
}

impl Default for CompactedView {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryLedger;
    use crate::model::MessageMetadata;

    #[tokio::test]
    async fn compaction_run_publishes_a_readable_view() {
        let source = InMemoryLedger::new(0);
        let mut m1 = MessageMetadata::new("p", 1, 0);
        m1.partition_key = Some("k".into());
        source.append(m1, b"v1".to_vec()).await.unwrap();
        let mut m2 = MessageMetadata::new("p", 2, 0);
        m2.partition_key = Some("k".into());
        source.append(m2, b"v2".to_vec()).await.unwrap();

        let subscription = CompactorSubscription::new(4, 10);
        let view = CompactedView::new();
        let sink = Arc::new(InMemoryLedger::new(1));
        subscription.run(&source, sink, &view).await.unwrap();

        assert!(view.horizon().await.is_some());
        let entries = view.try_read(10).await.expect("view has retained entries");
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn unpublished_view_reads_nothing() {
        let view = CompactedView::new();
        assert!(view.try_read(10).await.is_none());
    }
}
