//! C7 — the two-phase topic compactor (spec §4.7).
//!
//! Phase one scans the whole backlog through a dedicated cursor to build
//! `latestByKey`: for each partition key, the position of its most recent
//! message. Phase two rescans the same backlog and writes a fresh ledger
//! containing only the entries (or, for a batch entry, the sub-messages)
//! that are still the latest for their key — superseded ones are either
//! dropped (non-batch) or kept as a `compactedOut` tombstone so the
//! batch's message count stays stable for consumers that count by index.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::error::DispatchError;
use crate::ledger::{Cursor, LedgerError, ManagedLedger};
use crate::model::{Entry, EntryPayload, MessageId, Position, SubMessage};

/// Summary of one compaction run.
#[derive(Debug, Clone)]
pub struct CompactionResult {
    pub last_compacted_position: Position,
    pub entries_scanned: u64,
    pub entries_retained: u64,
    pub sub_messages_tombstoned: u64,
}

pub struct Compactor {
    /// Bounds how many phase-two appends to the fresh ledger run
    /// concurrently.
    phase_two_max_pending: usize,
    read_batch_size: u32,
}

impl Compactor {
    pub fn new(phase_two_max_pending: usize, read_batch_size: u32) -> Self {
        Self { phase_two_max_pending: phase_two_max_pending.max(1), read_batch_size: read_batch_size.max(1) }
    }

    /// Run both phases against `source`, reading through `reader` (a fresh
    /// cursor positioned at the start of the backlog) and writing the
    /// retained result into `sink`.
    pub async fn compact(
        &self,
        source: &dyn ManagedLedger,
        reader: Box<dyn Cursor>,
        sink: Arc<dyn ManagedLedger>,
    ) -> Result<CompactionResult, DispatchError> {
        let latest_by_key = self.phase_one(reader.as_ref()).await?;
        if latest_by_key.is_empty() {
            return Ok(CompactionResult {
                last_compacted_position: source.last_position(),
                entries_scanned: 0,
                entries_retained: 0,
                sub_messages_tombstoned: 0,
            });
        }

        let second_pass = source.open_cursor("__compactor_phase_two", None).await?;
        self.phase_two(second_pass.as_ref(), &latest_by_key, sink).await
    }

    async fn phase_one(&self, reader: &dyn Cursor) -> Result<HashMap<String, MessageId>, DispatchError> {
        let mut latest: HashMap<String, MessageId> = HashMap::new();
        loop {
            let entries = match reader.async_read_entries_or_wait(self.read_batch_size).await {
                Ok(entries) => entries,
                Err(LedgerError::NoMoreEntriesToRead) => break,
                Err(e) => return Err(DispatchError::Ledger(e)),
            };
            if entries.is_empty() {
                break;
            }
            for entry in &entries {
                match &entry.payload {
                    EntryPayload::Single(_) => {
                        if let Some(key) = &entry.metadata.partition_key {
                            latest.insert(key.clone(), MessageId::Single(entry.position));
                        }
                    }
                    EntryPayload::Batch(messages) => {
                        for (i, msg) in messages.iter().enumerate() {
                            if let Some(key) = &msg.metadata.partition_key {
                                latest.insert(key.clone(), MessageId::Batch(entry.position, i as u32));
                            }
                        }
                    }
                }
            }
        }
        Ok(latest)
    }

    async fn phase_two(
        &self,
        reader: &dyn Cursor,
        latest_by_key: &HashMap<String, MessageId>,
        sink: Arc<dyn ManagedLedger>,
    ) -> Result<CompactionResult, DispatchError> {
        let mut scanned = 0u64;
        let mut retained = 0u64;
        let mut tombstoned = 0u64;
        let mut last_position = Position::new(0, 0);

        loop {
            let entries = match reader.async_read_entries_or_wait(self.read_batch_size).await {
                Ok(entries) => entries,
                Err(LedgerError::NoMoreEntriesToRead) => break,
                Err(e) => return Err(DispatchError::Ledger(e)),
            };
            if entries.is_empty() {
                break;
            }

            let batch: Vec<Entry> = entries;
            scanned += batch.len() as u64;
            if let Some(last) = batch.last() {
                last_position = last.position;
            }

            let prepared: Vec<Option<Entry>> = batch
                .into_iter()
                .map(|entry| Self::repackage(entry, latest_by_key, &mut retained, &mut tombstoned))
                .collect();

            let sink = Arc::clone(&sink);
            let appended: Vec<Result<(), LedgerError>> = stream::iter(prepared.into_iter().flatten())
                .map(|entry| {
                    let sink = Arc::clone(&sink);
                    async move { sink.append(entry.metadata, Self::flatten_payload(&entry)).await.map(|_| ()) }
                })
                .buffer_unordered(self.phase_two_max_pending)
                .collect()
                .await;
            appended.into_iter().collect::<Result<Vec<()>, _>>()?;
        }

        Ok(CompactionResult { last_compacted_position: last_position, entries_scanned: scanned, entries_retained: retained, sub_messages_tombstoned: tombstoned })
    }

    /// Decide whether to retain, drop, or partially tombstone one entry.
    /// Returns `None` for a non-batch entry that is entirely superseded
    /// (dropped outright); a batch entry is always retained, with
    /// superseded sub-messages tombstoned in place.
    fn repackage(entry: Entry, latest_by_key: &HashMap<String, MessageId>, retained: &mut u64, tombstoned: &mut u64) -> Option<Entry> {
        match entry.payload {
            EntryPayload::Single(_) => {
                let is_latest = match &entry.metadata.partition_key {
                    None => true,
                    Some(key) => latest_by_key.get(key) == Some(&MessageId::Single(entry.position)),
                };
                if is_latest {
                    *retained += 1;
                    Some(entry)
                } else {
                    None
                }
            }
            EntryPayload::Batch(messages) => {
                let position = entry.position;
                let repackaged: Vec<SubMessage> = messages
                    .into_iter()
                    .enumerate()
                    .map(|(i, mut msg)| {
                        let is_latest = match &msg.metadata.partition_key {
                            None => true,
                            Some(key) => latest_by_key.get(key) == Some(&MessageId::Batch(position, i as u32)),
                        };
                        if is_latest {
                            *retained += 1;
                        } else {
                            msg.metadata.compacted_out = true;
                            msg.payload.clear();
                            *tombstoned += 1;
                        }
                        msg
                    })
                    .collect();
                Some(Entry::batch(position, entry.metadata, repackaged))
            }
        }
    }

    fn flatten_payload(entry: &Entry) -> Vec<u8> {
        match &entry.payload {
            EntryPayload::Single(p) => p.clone(),
            EntryPayload::Batch(messages) => messages.iter().flat_map(|m| m.payload.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryLedger;
    use crate::model::{MessageMetadata, SubMessageMetadata};

    #[tokio::test]
    async fn keeps_only_the_latest_entry_per_key() {
        let source = InMemoryLedger::new(0);
        let mut m1 = MessageMetadata::new("p", 1, 0);
        m1.partition_key = Some("k1".into());
        source.append(m1, b"v1".to_vec()).await.unwrap();
        let mut m2 = MessageMetadata::new("p", 2, 0);
        m2.partition_key = Some("k1".into());
        source.append(m2, b"v2".to_vec()).await.unwrap();
        let mut m3 = MessageMetadata::new("p", 3, 0);
        m3.partition_key = Some("k2".into());
        source.append(m3, b"v3".to_vec()).await.unwrap();

        let reader = source.open_cursor("__compactor", None).await.unwrap();
        let compactor = Compactor::new(4, 10);
        let sink = Arc::new(InMemoryLedger::new(1));
        let result = compactor.compact(&source, reader, sink.clone()).await.unwrap();

        assert_eq!(result.entries_scanned, 3);
        assert_eq!(result.entries_retained, 2);

        let out_cursor = sink.open_cursor("check", None).await.unwrap();
        let retained = out_cursor.async_read_entries_or_wait(10).await.unwrap();
        let payloads: Vec<&Vec<u8>> = retained.iter().map(|e| match &e.payload {
            EntryPayload::Single(p) => p,
            _ => unreachable!(),
        }).collect();
        assert!(payloads.contains(&&b"v2".to_vec()));
        assert!(payloads.contains(&&b"v3".to_vec()));
        assert!(!payloads.contains(&&b"v1".to_vec()));
    }

    #[tokio::test]
    async fn batch_entries_tombstone_superseded_sub_messages_in_place() {
        let source = InMemoryLedger::new(0);
        let mut batch_meta = MessageMetadata::new("p", 1, 0);
        batch_meta.num_messages_in_batch = 2;
        let messages = vec![
            SubMessage { metadata: SubMessageMetadata { partition_key: Some("k".into()), compacted_out: false }, payload: b"old".to_vec() },
            SubMessage { metadata: SubMessageMetadata { partition_key: Some("other".into()), compacted_out: false }, payload: b"keep".to_vec() },
        ];
        source.append_batch(batch_meta, messages).await.unwrap();

        // A later, non-batch publish for key "k" supersedes the batch's
        // first sub-message but not its second ("other").
        let mut newer = MessageMetadata::new("p", 2, 0);
        newer.partition_key = Some("k".into());
        source.append(newer, b"new".to_vec()).await.unwrap();

        let reader = source.open_cursor("__compactor", None).await.unwrap();
        let compactor = Compactor::new(4, 10);
        let sink = Arc::new(InMemoryLedger::new(1));
        let result = compactor.compact(&source, reader, sink.clone()).await.unwrap();
        assert_eq!(result.sub_messages_tombstoned, 1);

        let out_cursor = sink.open_cursor("check", None).await.unwrap();
        let retained = out_cursor.async_read_entries_or_wait(10).await.unwrap();
        let batch_entry = retained.iter().find(|e| e.is_batch()).expect("batch entry retained");
        match &batch_entry.payload {
            EntryPayload::Batch(msgs) => {
                assert!(msgs[0].metadata.compacted_out);
                assert!(!msgs[1].metadata.compacted_out);
            }
            _ => unreachable!(),
        }
    }
}
