//! Store binding: the supervisor's write path into the durable store.

use async_trait::async_trait;
use herald_net::{MessageLookup, TransportEvent};
use herald_shared::MessageKey;
use herald_store::{ContactRecord, Store, StoreRecord};
use tracing::warn;

/// Record what `event` tells us about messages and contacts.
///
/// Runs on the supervisor task before the event is routed, so writes land
/// in emission order.
pub async fn ingest(store: &Store, event: &TransportEvent) {
    match event {
        TransportEvent::MessagesUpsert(upsert) => {
            for message in &upsert.messages {
                if message.content.is_none() {
                    continue;
                }
                if let Some(name) = message.push_name.as_deref() {
                    if !message.key.from_me {
                        store.record_push_name(message.key.sender(), name).await;
                    }
                }
                match serde_json::to_value(message) {
                    Ok(payload) => {
                        let record = StoreRecord::new(
                            message.key.remote_jid.clone(),
                            message.key.id.clone(),
                            payload,
                        );
                        store.put(record).await;
                    }
                    Err(e) => warn!(id = %message.key.id, error = %e, "message not cacheable"),
                }
            }
        }
        TransportEvent::ContactsUpdate(updates) => {
            for update in updates {
                let name = update.best_name().map(str::to_owned);
                store.upsert_contact(ContactRecord::new(&update.id, name)).await;
            }
        }
        TransportEvent::GroupMetadataUpdate(metadata) => {
            store
                .upsert_contact(ContactRecord::new(&metadata.id, metadata.subject.clone()))
                .await;
        }
        TransportEvent::GroupParticipantsUpdate(update) => {
            if store.resolve_contact(&update.group).await.is_none() {
                store
                    .upsert_contact(ContactRecord::new(&update.group, None))
                    .await;
            }
        }
        _ => {}
    }
}

/// Serves the transport's historical message lookups from the store.
#[derive(Clone)]
pub struct StoreLookup {
    store: Store,
}

impl StoreLookup {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MessageLookup for StoreLookup {
    async fn load_message(&self, key: &MessageKey) -> Option<serde_json::Value> {
        self.store.load_message(&key.remote_jid, &key.id).await
    }
}
