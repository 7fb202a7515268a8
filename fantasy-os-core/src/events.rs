//! Per-engine typed event bus.
//!
//! Every engine owns its own [`EventBus`]; there is no global bus. Handlers
//! registered with [`EventBus::on`] run synchronously in registration order.
//! Emitted events are also queued in an outbox so the composition root can
//! route cross-engine reactions after the emitting call has returned.
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// An event that can travel on an [`EventBus`].
pub trait BusEvent {
    type Kind: Copy + Eq + Hash + fmt::Debug;

    fn kind(&self) -> Self::Kind;
}

/// Token returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

type Handler<E> = Box<dyn FnMut(&E)>;

pub struct EventBus<E: BusEvent> {
    handlers: HashMap<E::Kind, Vec<(HandlerId, Handler<E>)>>,
    next_id: u64,
    outbox: Vec<E>,
}

impl<E: BusEvent> EventBus<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            next_id: 0,
            outbox: Vec::new(),
        }
    }

    /// Subscribe `handler` to events of `kind`.
    pub fn on(&mut self, kind: E::Kind, handler: impl FnMut(&E) + 'static) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Remove a handler. Returns `false` if it was not registered for `kind`.
    pub fn off(&mut self, kind: E::Kind, id: HandlerId) -> bool {
        let Some(list) = self.handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        list.len() != before
    }

    pub fn emit(&mut self, event: E) {
        if let Some(list) = self.handlers.get_mut(&event.kind()) {
            for (_, handler) in list.iter_mut() {
                handler(&event);
            }
        }
        self.outbox.push(event);
    }

    /// Take every event emitted since the previous drain.
    pub fn drain(&mut self) -> Vec<E> {
        std::mem::take(&mut self.outbox)
    }

    #[must_use]
    pub fn pending(&self) -> &[E] {
        &self.outbox
    }

    #[must_use]
    pub fn handler_count(&self, kind: E::Kind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Drop queued events without delivering them anywhere else.
    pub fn clear_pending(&mut self) {
        self.outbox.clear();
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: BusEvent> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<String> = self
            .handlers
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(kind, list)| format!("{kind:?}x{}", list.len()))
            .collect();
        kinds.sort();
        f.debug_struct("EventBus")
            .field("handlers", &kinds)
            .field("pending", &self.outbox.len())
            .finish()
    }
}
