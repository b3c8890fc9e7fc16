//! Contact records and name resolution.

use herald_shared::Jid;

use crate::models::ContactRecord;
use crate::store::Store;

impl Store {
    /// Create or update a contact.
    ///
    /// Contact events are often partial: an update without a display name
    /// keeps the name already known.
    pub async fn upsert_contact(&self, mut contact: ContactRecord) {
        contact.id = contact.id.normalized();
        contact.is_group = contact.is_group || contact.id.is_group();

        let mut state = self.state.write().await;
        match state.contacts.get_mut(&contact.id) {
            Some(existing) => {
                if contact.display_name.is_some() {
                    existing.display_name = contact.display_name;
                }
                existing.is_group = contact.is_group;
                existing.updated_at = contact.updated_at;
            }
            None => {
                state.contacts.insert(contact.id.clone(), contact);
            }
        }
        state.touch();
    }

    /// Record the name a sender advertises on their own messages.
    pub async fn record_push_name(&self, id: &Jid, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }

        let id = id.normalized();
        {
            let state = self.state.read().await;
            let unchanged = state
                .contacts
                .get(&id)
                .and_then(|c| c.display_name.as_deref())
                == Some(name);
            if unchanged {
                return;
            }
        }

        self.upsert_contact(ContactRecord::new(&id, Some(name.to_string())))
            .await;
    }

    pub async fn resolve_contact(&self, id: &Jid) -> Option<ContactRecord> {
        self.state.read().await.contacts.get(&id.normalized()).cloned()
    }

    /// Display name for `id`, falling back to the formatted address.
    pub async fn display_name(&self, id: &Jid) -> String {
        match self.resolve_contact(id).await {
            Some(contact) => contact.label(),
            None => id.normalized().formatted(),
        }
    }

    pub async fn contact_count(&self) -> usize {
        self.state.read().await.contacts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ana() -> Jid {
        "4915112345678@s.whatsapp.net".parse().unwrap()
    }

    #[tokio::test]
    async fn test_display_name_falls_back_to_formatted_id() {
        let store = Store::in_memory();
        assert_eq!(store.display_name(&ana()).await, "+4915112345678");

        store.upsert_contact(ContactRecord::new(&ana(), None)).await;
        assert_eq!(store.display_name(&ana()).await, "+4915112345678");

        store
            .upsert_contact(ContactRecord::new(&ana(), Some("Ana".into())))
            .await;
        assert_eq!(store.display_name(&ana()).await, "Ana");
    }

    #[tokio::test]
    async fn test_partial_update_keeps_name() {
        let store = Store::in_memory();
        store
            .upsert_contact(ContactRecord::new(&ana(), Some("Ana".into())))
            .await;
        store.upsert_contact(ContactRecord::new(&ana(), None)).await;

        let contact = store.resolve_contact(&ana()).await.unwrap();
        assert_eq!(contact.display_name.as_deref(), Some("Ana"));
        assert_eq!(store.contact_count().await, 1);
    }

    #[tokio::test]
    async fn test_group_flag_and_device_normalization() {
        let store = Store::in_memory();
        let group: Jid = "120363041234567890@g.us".parse().unwrap();
        store
            .upsert_contact(ContactRecord::new(&group, Some("Team".into())))
            .await;
        assert!(store.resolve_contact(&group).await.unwrap().is_group);

        let device: Jid = "4915112345678:3@s.whatsapp.net".parse().unwrap();
        store.record_push_name(&device, "  Ana B ").await;
        let contact = store.resolve_contact(&ana()).await.unwrap();
        assert_eq!(contact.id, ana());
        assert_eq!(contact.display_name.as_deref(), Some("Ana B"));
        assert!(!contact.is_group);
    }

    #[tokio::test]
    async fn test_blank_push_name_ignored() {
        let store = Store::in_memory();
        store.record_push_name(&ana(), "   ").await;
        assert!(store.resolve_contact(&ana()).await.is_none());
    }
}
