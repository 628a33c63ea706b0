//! Event and Action descriptors.
//!
//! A parameterless signal with a description is called an Event; a
//! parameterless no-reply method with a description is called an Action.
//! Descriptors are immutable configuration values supplied to the builder;
//! the interface synthesized at start time gets one member per descriptor.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::bus::MessageEnvelope;
use crate::facade::EventTrigger;

/// A named parameterless notification this service can emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDescriptor {
    /// Member name, also used to trigger the event.
    pub name: String,
    /// Single-language localized sentence describing the event.
    pub description: String,
}

impl EventDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// A named parameterless command remote callers can invoke on this service.
#[derive(Clone)]
pub struct ActionDescriptor {
    /// Member name remote callers invoke.
    pub name: String,
    /// Single-language localized sentence describing the action.
    pub description: String,
    /// Handler dispatched on every invocation.
    pub handler: Arc<dyn ActionHandler>,
}

impl ActionDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            handler,
        }
    }
}

impl std::fmt::Debug for ActionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// A single incoming action invocation.
///
/// Carries the invoked member's identity, the incoming message envelope and
/// an [`EventTrigger`] back into the owning service, so a handler can emit
/// events without holding a reference to the facade itself.
pub struct ActionInvocation {
    /// Name of the invoked method member.
    pub member: String,
    /// Envelope of the incoming message.
    pub envelope: MessageEnvelope,
    /// Handle for triggering events on the owning service.
    pub trigger: EventTrigger,
}

/// Handler for incoming action invocations.
///
/// Invocations are fire-and-forget: no reply is sent. The `handle` method
/// takes `&self`; handlers that need mutable state should use interior
/// mutability (e.g. `RwLock`, `Mutex`).
pub trait ActionHandler: Send + Sync {
    /// Process one invocation.
    fn handle(&self, invocation: ActionInvocation) -> BoxFuture<'static, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    impl ActionHandler for NoopHandler {
        fn handle(&self, _invocation: ActionInvocation) -> BoxFuture<'static, ()> {
            Box::pin(async {})
        }
    }

    #[test]
    fn test_event_descriptor_fields() {
        let event = EventDescriptor::new("Pressed", "Button Pressed");
        assert_eq!(event.name, "Pressed");
        assert_eq!(event.description, "Button Pressed");
    }

    #[test]
    fn test_action_descriptor_fields() {
        let action = ActionDescriptor::new("Press", "Press the button", Arc::new(NoopHandler));
        assert_eq!(action.name, "Press");
        assert_eq!(action.description, "Press the button");
    }

    #[test]
    fn test_action_descriptor_debug_omits_handler() {
        let action = ActionDescriptor::new("Press", "Press the button", Arc::new(NoopHandler));
        let rendered = format!("{action:?}");
        assert!(rendered.contains("Press"));
    }
}
