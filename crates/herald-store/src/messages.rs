//! Message records: last-write-wins upsert and lookups.

use herald_shared::Jid;

use crate::models::StoreRecord;
use crate::store::Store;

impl Store {
    /// Insert or overwrite the record for `(conversation, item_id)`.
    ///
    /// The write that is applied last wins, whatever timestamp the payload
    /// carries. Returns the record that was replaced, if any.
    pub async fn put(&self, mut record: StoreRecord) -> Option<StoreRecord> {
        record.conversation = record.conversation.normalized();

        let mut state = self.state.write().await;
        let previous = state
            .messages
            .entry(record.conversation.clone())
            .or_default()
            .insert(record.item_id.clone(), record);
        state.touch();
        previous
    }

    /// Last record written for the key. Unknown keys are `None`.
    pub async fn get(&self, conversation: &Jid, item_id: &str) -> Option<StoreRecord> {
        let state = self.state.read().await;
        state
            .messages
            .get(&conversation.normalized())
            .and_then(|items| items.get(item_id))
            .cloned()
    }

    /// Historical lookup used by the transport when it retries or
    /// re-decrypts a message it no longer buffers.
    pub async fn load_message(&self, remote_jid: &Jid, id: &str) -> Option<serde_json::Value> {
        self.get(remote_jid, id).await.map(|record| record.payload)
    }

    /// Every record cached for one conversation, ordered by item id.
    pub async fn messages_in(&self, conversation: &Jid) -> Vec<StoreRecord> {
        let state = self.state.read().await;
        state
            .messages
            .get(&conversation.normalized())
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of cached message records.
    pub async fn message_count(&self) -> usize {
        let state = self.state.read().await;
        state.messages.values().map(|items| items.len()).sum()
    }

    /// Number of conversations with at least one record.
    pub async fn conversation_count(&self) -> usize {
        self.state.read().await.messages.len()
    }
}
