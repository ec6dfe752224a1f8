//! Typed listener registry for applied host events.
//!
//! Listeners register for one [`InboundKind`] and are called only for events
//! of that kind, after the event has been committed to the store. Discarded
//! and faulting messages are never published.

use std::collections::BTreeMap;

use playground_protocol::{InboundEvent, InboundKind};

use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&InboundEvent, &Store)>;

#[derive(Default)]
pub struct EventBus {
    listeners: BTreeMap<InboundKind, Vec<(ListenerId, Listener)>>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        &mut self,
        kind: InboundKind,
        listener: impl FnMut(&InboundEvent, &Store) + 'static,
    ) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners
            .entry(kind)
            .or_default()
            .push((id, Box::new(listener)));
        id
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        let mut removed = false;
        for listeners in self.listeners.values_mut() {
            let before = listeners.len();
            listeners.retain(|(candidate, _)| *candidate != id);
            removed |= listeners.len() != before;
        }
        removed
    }

    /// Calls every listener for the event's kind, in registration order.
    pub fn publish(&mut self, event: &InboundEvent, store: &Store) -> usize {
        let Some(listeners) = self.listeners.get_mut(&event.kind()) else {
            return 0;
        };
        for (_, listener) in listeners.iter_mut() {
            listener(event, store);
        }
        listeners.len()
    }

    pub fn listener_count(&self, kind: InboundKind) -> usize {
        self.listeners.get(&kind).map(Vec::len).unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}
