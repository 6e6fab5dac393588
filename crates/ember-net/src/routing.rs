//! Message dispatch: route inbound messages to type-specific handlers.
//!
//! The [`MessageRegistry`] maps a [`MessageTypeId`] to exactly one
//! [`MessageHandler`]. Sessions drain their connections once per tick and hand
//! every message to [`MessageRegistry::dispatch`]. A message with no handler
//! means the peers disagree on the schema, so dispatch aborts.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::NetError;
use crate::message::{Message, MessageTypeId};
use crate::session::NetSession;

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// A callable bound to one message type.
///
/// Handlers run synchronously inside `update()` and receive the session core
/// so they can reply or change session state. They must not block.
pub trait MessageHandler {
    /// Process a single inbound message.
    fn handle(&mut self, message: Message, session: &mut NetSession);
}

/// Blanket implementation for closures and plain functions.
impl<F> MessageHandler for F
where
    F: FnMut(Message, &mut NetSession),
{
    fn handle(&mut self, message: Message, session: &mut NetSession) {
        self(message, session);
    }
}

/// Adapter binding a method to a shared object.
pub struct BoundMethod<T> {
    target: Rc<RefCell<T>>,
    method: fn(&mut T, Message, &mut NetSession),
}

impl<T> BoundMethod<T> {
    /// Bind `method` to `target`.
    pub fn new(target: Rc<RefCell<T>>, method: fn(&mut T, Message, &mut NetSession)) -> Self {
        Self { target, method }
    }
}

impl<T> MessageHandler for BoundMethod<T> {
    fn handle(&mut self, message: Message, session: &mut NetSession) {
        let mut target = self.target.borrow_mut();
        (self.method)(&mut target, message, session);
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// One registry entry.
pub struct MessageDefinition {
    type_id: MessageTypeId,
    handler: Box<dyn MessageHandler>,
}

impl MessageDefinition {
    /// Message type this entry handles.
    pub fn type_id(&self) -> MessageTypeId {
        self.type_id
    }
}

/// Id → handler table. At most one entry per message type.
///
/// Lookups scan linearly: ids fit in a byte and registration happens at setup,
/// so the table stays tiny.
#[derive(Default)]
pub struct MessageRegistry {
    definitions: Vec<MessageDefinition>,
}

impl MessageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `type_id`.
    ///
    /// Fails without touching the registry if `type_id` is already bound.
    pub fn register<H>(
        &mut self,
        type_id: impl Into<MessageTypeId>,
        handler: H,
    ) -> Result<(), NetError>
    where
        H: MessageHandler + 'static,
    {
        let type_id = type_id.into();
        if self.is_registered(type_id) {
            return Err(NetError::AlreadyRegistered(type_id));
        }
        self.definitions.push(MessageDefinition {
            type_id,
            handler: Box::new(handler),
        });
        Ok(())
    }

    /// Remove the handler bound to `type_id`, if any.
    pub fn unregister(&mut self, type_id: impl Into<MessageTypeId>) {
        let type_id = type_id.into();
        if let Some(pos) = self.position(type_id) {
            self.definitions.swap_remove(pos);
        }
    }

    /// Entry bound to `type_id`.
    pub fn definition(&self, type_id: MessageTypeId) -> Option<&MessageDefinition> {
        self.definitions.iter().find(|d| d.type_id == type_id)
    }

    /// Whether `type_id` has a handler.
    pub fn is_registered(&self, type_id: MessageTypeId) -> bool {
        self.position(type_id).is_some()
    }

    /// Registered ids in registration order (modulo removals).
    pub fn registered_ids(&self) -> impl Iterator<Item = MessageTypeId> + '_ {
        self.definitions.iter().map(|d| d.type_id)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    fn position(&self, type_id: MessageTypeId) -> Option<usize> {
        self.definitions.iter().position(|d| d.type_id == type_id)
    }

    /// Hand `message` to the handler bound to its type.
    ///
    /// # Panics
    ///
    /// Panics if no handler is registered for the message type.
    pub fn dispatch(&mut self, message: Message, session: &mut NetSession) {
        let type_id = message.type_id();
        let Some(pos) = self.position(type_id) else {
            tracing::error!(
                "No handler registered for message type {type_id} (sender {:?}, address {:?})",
                message.sender(),
                message.sender_address()
            );
            panic!("no handler registered for message type {type_id}");
        };
        tracing::trace!("Dispatching message type {type_id}");
        self.definitions[pos].handler.handle(message, session);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
