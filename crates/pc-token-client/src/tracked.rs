//! Last-issued-wins bookkeeping for values the UI refreshes.
//!
//! Every refresh takes a ticket before it starts fetching. A result is only
//! applied while its ticket is still the newest, so a slow fetch for a
//! previously selected account cannot overwrite a newer one.

use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket(u64);

struct Slot<K, T> {
    generation: u64,
    key: Option<K>,
    value: Option<T>,
}

pub struct Tracked<K, T> {
    slot: Mutex<Slot<K, T>>,
}

impl<K, T> Default for Tracked<K, T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(Slot {
                generation: 0,
                key: None,
                value: None,
            }),
        }
    }
}

impl<K, T> Tracked<K, T>
where
    K: Clone + PartialEq,
    T: Clone,
{
    /// Starts a refresh for `key`. A different key clears the held value.
    pub async fn begin(&self, key: K) -> RefreshTicket {
        let mut slot = self.slot.lock().await;
        slot.generation += 1;
        if slot.key.as_ref() != Some(&key) {
            slot.value = None;
            slot.key = Some(key);
        }
        RefreshTicket(slot.generation)
    }

    /// Stores `value` if `ticket` is still the latest one issued.
    pub async fn apply(&self, ticket: RefreshTicket, value: T) -> bool {
        let mut slot = self.slot.lock().await;
        if ticket.0 != slot.generation {
            return false;
        }
        slot.value = Some(value);
        true
    }

    pub async fn current(&self) -> Option<(K, T)> {
        let slot = self.slot.lock().await;
        match (&slot.key, &slot.value) {
            (Some(key), Some(value)) => Some((key.clone(), value.clone())),
            _ => None,
        }
    }

    pub async fn clear(&self) {
        let mut slot = self.slot.lock().await;
        slot.generation += 1;
        slot.key = None;
        slot.value = None;
    }
}
