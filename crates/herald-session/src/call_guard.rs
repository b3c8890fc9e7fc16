use std::collections::HashMap;
use std::time::{Duration, Instant};

use herald_shared::Jid;

/// Suppresses repeated call notifications to the same peer.
///
/// A peer is notified at most once per cooldown. Entries carry their own
/// expiry and are purged on every check, so the map only ever holds peers
/// notified within the last cooldown.
#[derive(Debug)]
pub struct CallGuard {
    cooldown: Duration,
    entries: HashMap<Jid, Instant>,
}

impl CallGuard {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            entries: HashMap::new(),
        }
    }

    pub fn should_notify(&mut self, peer: &Jid) -> bool {
        self.should_notify_at(peer, Instant::now())
    }

    /// [`should_notify`](Self::should_notify) at an explicit instant.
    pub fn should_notify_at(&mut self, peer: &Jid, now: Instant) -> bool {
        self.purge_expired(now);

        let peer = peer.normalized();
        if self.entries.contains_key(&peer) {
            return false;
        }
        self.entries.insert(peer, now + self.cooldown);
        true
    }

    pub fn purge_expired(&mut self, now: Instant) {
        self.entries.retain(|_, expiry| *expiry > now);
    }

    /// Peers currently suppressed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
