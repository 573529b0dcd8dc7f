//! Conversation state shared across processing agents.
//!
//! Each conversation owns two pieces of state: a JSON context document
//! that agents merge updates into, and an append-only log of processing
//! records. A merge holds its conversation's lock across the whole
//! read-modify-write cycle, so concurrent merges cannot drop keys; log
//! appends serialize under the same lock, so sequence numbers stay
//! unique.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::StoreRetryPolicy;
use crate::error::StoreError;
use crate::store::backend::StoreBackend;

/// Mutable JSON context for one conversation.
pub type Context = serde_json::Map<String, Value>;

/// Context key reserved for the merge timestamp. Agent-supplied values
/// under this key are overwritten on every merge.
pub const TIMESTAMP_KEY: &str = "timestamp";

// ── Identifiers and records ─────────────────────────────────────────────────

/// Opaque, non-empty identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Result<Self, StoreError> {
        let id = id.into();
        if id.is_empty() {
            return Err(StoreError::EmptyConversationId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry in a conversation's processing log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub action: String,
    pub details: Value,
}

// ── Store ───────────────────────────────────────────────────────────────────

/// Store for conversation context and processing history.
///
/// Cloning is cheap; clones share the backend and the per-conversation
/// lock map.
#[derive(Clone)]
pub struct ConversationStore {
    backend: Arc<dyn StoreBackend>,
    retry: StoreRetryPolicy,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ConversationStore {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            retry: StoreRetryPolicy::default(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: StoreRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Current context document for a conversation, if one exists.
    pub async fn get_context(&self, id: &ConversationId) -> Result<Option<Context>, StoreError> {
        self.load(id).await
    }

    /// Merge `updates` into the conversation context and stamp the merge
    /// time under [`TIMESTAMP_KEY`]. Returns the merged document.
    ///
    /// The read and the write happen under the conversation's lock, so
    /// keys absent from `updates` survive concurrent merges.
    pub async fn update_context(
        &self,
        id: &ConversationId,
        updates: Context,
    ) -> Result<Context, StoreError> {
        let lock = self.conversation_lock(id);
        let _guard = lock.lock().await;

        let mut context = self.load(id).await?.unwrap_or_default();
        for (key, value) in updates {
            context.insert(key, value);
        }
        context.insert(
            TIMESTAMP_KEY.to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );

        let encoded = serde_json::to_string(&context)?;
        self.retrying("put_context", || async {
            self.backend.put_context(id.as_str(), &encoded).await
        })
        .await?;

        debug!(conversation = %id, keys = context.len(), "Context updated");
        Ok(context)
    }

    /// Append a processing record for `agent`, returning the record's
    /// 1-based sequence number in the log.
    ///
    /// Appends for one conversation run under its lock, so concurrent
    /// appends receive distinct sequence numbers.
    pub async fn append_record(
        &self,
        id: &ConversationId,
        agent: &str,
        action: &str,
        details: Value,
    ) -> Result<u64, StoreError> {
        let record = ProcessingRecord {
            timestamp: Utc::now(),
            agent: agent.to_string(),
            action: action.to_string(),
            details,
        };
        let encoded = serde_json::to_string(&record)?;

        let lock = self.conversation_lock(id);
        let _guard = lock.lock().await;
        let seq = self
            .retrying("append_log", || async {
                self.backend.append_log(id.as_str(), &encoded).await
            })
            .await?;
        debug!(conversation = %id, agent, action, seq, "Processing step recorded");
        Ok(seq)
    }

    /// Full processing history, oldest first.
    pub async fn get_history(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<ProcessingRecord>, StoreError> {
        let entries = self
            .retrying("read_log", || async {
                self.backend.read_log(id.as_str()).await
            })
            .await?;
        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            records.push(serde_json::from_str(&entry)?);
        }
        Ok(records)
    }

    /// Delete the context document and the processing log. Both deletes
    /// are attempted even if the first fails; a partial failure surfaces
    /// as [`StoreError::ClearIncomplete`].
    pub async fn clear(&self, id: &ConversationId) -> Result<(), StoreError> {
        let context = self
            .retrying("delete_context", || async {
                self.backend.delete_context(id.as_str()).await
            })
            .await;
        let log = self
            .retrying("delete_log", || async {
                self.backend.delete_log(id.as_str()).await
            })
            .await;

        match (context, log) {
            (Ok(()), Ok(())) => {
                // A cleared conversation no longer needs its lock entry.
                self.locks.lock().unwrap().remove(id.as_str());
                info!(conversation = %id, "Conversation cleared");
                Ok(())
            }
            (context, log) => Err(StoreError::ClearIncomplete {
                context: outcome_label(context),
                log: outcome_label(log),
            }),
        }
    }

    async fn load(&self, id: &ConversationId) -> Result<Option<Context>, StoreError> {
        let encoded = self
            .retrying("get_context", || async {
                self.backend.get_context(id.as_str()).await
            })
            .await?;
        match encoded {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn conversation_lock(&self, id: &ConversationId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(id.as_str().to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn retrying<T, F>(
        &self,
        op: &str,
        mut call: impl FnMut() -> F,
    ) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(op, attempt, error = %e, "Transient store failure, retrying");
                    tokio::time::sleep(self.retry.backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn outcome_label(result: Result<(), StoreError>) -> String {
    match result {
        Ok(()) => "deleted".to_string(),
        Err(e) => e.to_string(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::store::libsql_backend::LibSqlBackend;

    fn store(backend: Arc<dyn StoreBackend>) -> ConversationStore {
        ConversationStore::new(backend).with_retry(StoreRetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1),
        })
    }

    async fn memory_store() -> ConversationStore {
        store(Arc::new(LibSqlBackend::new_memory().await.unwrap()))
    }

    fn conv(id: &str) -> ConversationId {
        ConversationId::new(id).unwrap()
    }

    /// Fails the first `fail_first` calls to any operation, then succeeds
    /// with empty results.
    struct FlakyBackend {
        fail_first: u32,
        transient: bool,
        calls: AtomicU32,
    }

    impl FlakyBackend {
        fn new(fail_first: u32, transient: bool) -> Self {
            Self {
                fail_first,
                transient,
                calls: AtomicU32::new(0),
            }
        }

        fn fail(&self) -> Option<StoreError> {
            let seen = self.calls.fetch_add(1, Ordering::SeqCst);
            if seen < self.fail_first {
                Some(if self.transient {
                    StoreError::Unavailable {
                        reason: "connection refused".into(),
                    }
                } else {
                    StoreError::Backend("boom".into())
                })
            } else {
                None
            }
        }
    }

    #[async_trait::async_trait]
    impl StoreBackend for FlakyBackend {
        async fn get_context(&self, _conversation: &str) -> Result<Option<String>, StoreError> {
            match self.fail() {
                Some(e) => Err(e),
                None => Ok(None),
            }
        }

        async fn put_context(&self, _conversation: &str, _encoded: &str) -> Result<(), StoreError> {
            match self.fail() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        async fn append_log(&self, _conversation: &str, _entry: &str) -> Result<u64, StoreError> {
            match self.fail() {
                Some(e) => Err(e),
                None => Ok(1),
            }
        }

        async fn read_log(&self, _conversation: &str) -> Result<Vec<String>, StoreError> {
            match self.fail() {
                Some(e) => Err(e),
                None => Ok(Vec::new()),
            }
        }

        async fn delete_context(&self, _conversation: &str) -> Result<(), StoreError> {
            match self.fail() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        async fn delete_log(&self, _conversation: &str) -> Result<(), StoreError> {
            match self.fail() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    /// Context delete succeeds, log delete always fails.
    struct HalfClearBackend;

    #[async_trait::async_trait]
    impl StoreBackend for HalfClearBackend {
        async fn get_context(&self, _conversation: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }

        async fn put_context(&self, _conversation: &str, _encoded: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn append_log(&self, _conversation: &str, _entry: &str) -> Result<u64, StoreError> {
            Ok(1)
        }

        async fn read_log(&self, _conversation: &str) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }

        async fn delete_context(&self, _conversation: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn delete_log(&self, _conversation: &str) -> Result<(), StoreError> {
            Err(StoreError::Backend("log delete refused".into()))
        }
    }

    #[test]
    fn empty_conversation_id_rejected() {
        assert!(matches!(
            ConversationId::new(""),
            Err(StoreError::EmptyConversationId)
        ));
        assert!(ConversationId::new("conv-1").is_ok());
    }

    #[tokio::test]
    async fn missing_context_is_none() {
        let store = memory_store().await;
        let context = store.get_context(&conv("nope")).await.unwrap();
        assert!(context.is_none());
    }

    #[tokio::test]
    async fn merge_preserves_unrelated_keys_and_stamps_timestamp() {
        let store = memory_store().await;
        let id = conv("c1");

        let mut first = Context::new();
        first.insert("email_sender".into(), json!("a@example.com"));
        first.insert("keep".into(), json!("x"));
        store.update_context(&id, first).await.unwrap();

        let mut second = Context::new();
        second.insert("email_sender".into(), json!("b@example.com"));
        let merged = store.update_context(&id, second).await.unwrap();

        assert_eq!(merged["email_sender"], json!("b@example.com"));
        assert_eq!(merged["keep"], json!("x"));
        let stamp = merged[TIMESTAMP_KEY].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());

        let stored = store.get_context(&id).await.unwrap().unwrap();
        assert_eq!(stored, merged);
    }

    #[tokio::test]
    async fn agent_supplied_timestamp_is_overwritten() {
        let store = memory_store().await;
        let id = conv("c1");

        let mut updates = Context::new();
        updates.insert(TIMESTAMP_KEY.into(), json!("bogus"));
        let merged = store.update_context(&id, updates).await.unwrap();

        let stamp = merged[TIMESTAMP_KEY].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_merges_keep_every_key() {
        let store = memory_store().await;
        let id = conv("shared");

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                let mut updates = Context::new();
                updates.insert(format!("key_{i}"), json!(i));
                store.update_context(&id, updates).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let context = store.get_context(&id).await.unwrap().unwrap();
        for i in 0..8 {
            assert_eq!(context[&format!("key_{i}")], json!(i), "lost key_{i}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_never_share_a_sequence_number() {
        let store = memory_store().await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_record(&conv("shared"), "email_agent", "process_email", json!({"i": i}))
                    .await
                    .unwrap()
            }));
        }

        let mut seqs = Vec::new();
        for handle in handles {
            seqs.push(handle.await.unwrap());
        }
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=8).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn history_keeps_order_and_sequence_numbers() {
        let store = memory_store().await;
        let id = conv("c1");

        let s1 = store
            .append_record(&id, "email_agent", "process_email", json!({"status": "success"}))
            .await
            .unwrap();
        let s2 = store
            .append_record(&id, "json_agent", "process_json", json!({"status": "warning"}))
            .await
            .unwrap();
        assert_eq!((s1, s2), (1, 2));

        let history = store.get_history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].agent, "email_agent");
        assert_eq!(history[0].action, "process_email");
        assert_eq!(history[0].details, json!({"status": "success"}));
        assert_eq!(history[1].agent, "json_agent");
        assert!(history[0].timestamp <= history[1].timestamp);
    }

    #[tokio::test]
    async fn clear_removes_context_and_history() {
        let store = memory_store().await;
        let id = conv("c1");

        let mut updates = Context::new();
        updates.insert("a".into(), json!(1));
        store.update_context(&id, updates).await.unwrap();
        store
            .append_record(&id, "email_agent", "process_email", json!({}))
            .await
            .unwrap();

        store.clear(&id).await.unwrap();
        assert!(store.get_context(&id).await.unwrap().is_none());
        assert!(store.get_history(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_drops_the_conversation_lock_entry() {
        let store = memory_store().await;
        let id = conv("c1");

        let mut updates = Context::new();
        updates.insert("a".into(), json!(1));
        store.update_context(&id, updates).await.unwrap();
        assert_eq!(store.locks.lock().unwrap().len(), 1);

        store.clear(&id).await.unwrap();
        assert!(store.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_failures_recover_within_retry_budget() {
        let backend = Arc::new(FlakyBackend::new(2, true));
        let store = store(backend.clone());

        let context = store.get_context(&conv("c1")).await.unwrap();
        assert!(context.is_none());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_failures_exhaust_retry_budget() {
        let backend = Arc::new(FlakyBackend::new(u32::MAX, true));
        let store = store(backend.clone());

        let err = store.get_context(&conv("c1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let backend = Arc::new(FlakyBackend::new(u32::MAX, false));
        let store = store(backend.clone());

        let err = store.get_context(&conv("c1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn partial_clear_is_reported() {
        let store = store(Arc::new(HalfClearBackend));
        let err = store.clear(&conv("c1")).await.unwrap_err();
        match err {
            StoreError::ClearIncomplete { context, log } => {
                assert_eq!(context, "deleted");
                assert!(log.contains("log delete refused"));
            }
            other => panic!("expected ClearIncomplete, got {other:?}"),
        }
    }
}
