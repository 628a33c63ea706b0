//! Service bus boundary.
//!
//! This module contains:
//! - `ServiceBus` trait: process-scoped runtime lifecycle and attachment creation
//! - `BusAttachment` trait: one service instance's connection to the bus
//! - `InterfaceBuilder` / `BusInterface` traits: interface definition and lookup
//! - `SessionPortListener` trait: session acceptance callbacks
//! - Shared wire types: session options, envelopes, signals, announcements
//! - Implementations: Loopback (in-process), Mock (test failure injection)
//!
//! The transport library behind a real peer-to-peer bus is an external
//! collaborator; everything the facade needs from it is expressed here as a
//! trait so that any transport can be slotted in.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::about::AboutData;
use crate::descriptor::ActionHandler;
use crate::facade::EventTrigger;

// Implementation modules
pub mod loopback;
pub mod mock;

// Re-exports
pub use loopback::LoopbackBus;
pub use mock::{FailPoint, MockBus};

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Logical endpoint number a service binds to accept session joins.
pub type SessionPort = u16;

/// Identifier assigned to a completed session join.
pub type SessionId = u32;

/// Errors that can occur at the bus boundary.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus runtime is not initialized")]
    RuntimeNotInitialized,

    #[error("interface '{0}' already exists")]
    InterfaceExists(String),

    #[error("no interface '{0}' on this bus")]
    NoSuchInterface(String),

    #[error("member '{member}' already exists on interface '{interface}'")]
    MemberExists { interface: String, member: String },

    #[error("no member '{member}' on interface '{interface}'")]
    NoSuchMember { interface: String, member: String },

    #[error("object path '{0}' is already registered")]
    ObjectExists(String),

    #[error("attachment '{0}' is not started")]
    NotStarted(String),

    #[error("attachment '{0}' is not connected")]
    NotConnected(String),

    #[error("session port {0} is already bound")]
    PortBound(SessionPort),

    #[error("no listener bound on session port {0}")]
    PortNotBound(SessionPort),

    #[error("session join on port {0} rejected")]
    SessionRejected(SessionPort),

    #[error("{0}")]
    Failure(String),
}

// ============================================================================
// Session types
// ============================================================================

/// Traffic carried over a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrafficType {
    /// Reliable message-based traffic.
    #[default]
    Messages,
    /// Unreliable raw traffic.
    RawUnreliable,
    /// Reliable raw traffic.
    RawReliable,
}

/// Physical proximity constraint for session peers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Proximity {
    #[default]
    Any,
    Physical,
    Network,
}

/// Transports a session may ride on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportMask {
    #[default]
    Any,
    Local,
    Ip,
}

/// Options attached to a session-port binding or join request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub traffic: TrafficType,
    pub multipoint: bool,
    pub proximity: Proximity,
    pub transports: TransportMask,
}

/// Listener half of a session-port binding.
pub trait SessionPortListener: Send + Sync {
    /// Decide whether `joiner` may join a session on `port`.
    fn accept_session_joiner(&self, port: SessionPort, joiner: &str, opts: &SessionOptions)
        -> bool;

    /// Observe a completed join.
    fn session_joined(&self, port: SessionPort, id: SessionId, joiner: &str) {
        let _ = (port, id, joiner);
    }
}

// ============================================================================
// Messages and signals
// ============================================================================

/// Envelope of an incoming bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    /// Bus identity of the sender.
    pub sender: String,
    /// Session the message arrived on, if any.
    pub session_id: Option<SessionId>,
}

/// A signal as observed on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalEvent {
    /// Interface the signal member belongs to.
    pub interface: String,
    /// Signal member name.
    pub member: String,
    /// Attachment that emitted the signal.
    pub sender: String,
    /// Whether the signal was broadcast outside any session.
    pub sessionless: bool,
}

/// A service announcement as observed on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// Session port remote peers should join.
    pub port: SessionPort,
    /// Announced metadata.
    pub about: AboutData,
}

// ============================================================================
// Interface definition
// ============================================================================

/// Kind of an interface member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Signal,
    Method,
}

/// One member of an interface definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceMember {
    pub name: String,
    pub kind: MemberKind,
    /// Localized member description.
    pub description: String,
    /// Set on signal members described as sessionless.
    pub sessionless: bool,
}

/// An activated (frozen) interface definition.
pub trait BusInterface: Send + Sync + std::fmt::Debug {
    /// Interface name.
    fn name(&self) -> &str;

    /// Localization tag of the descriptions.
    fn description_language(&self) -> &str;

    /// Interface description text.
    fn description(&self) -> &str;

    /// Look up a signal member by name.
    fn signal(&self, name: &str) -> Option<&InterfaceMember>;

    /// Look up a method member by name.
    fn method(&self, name: &str) -> Option<&InterfaceMember>;

    /// All members in registration order.
    fn members(&self) -> &[InterfaceMember];
}

/// Mutable interface definition, prior to activation.
///
/// Obtained from [`BusAttachment::create_interface`]; activation freezes the
/// definition and no further members may be added.
pub trait InterfaceBuilder: Send {
    fn set_description_language(&mut self, language: &str);

    fn set_description(&mut self, description: &str);

    /// Add a zero-argument signal member.
    fn add_signal(&mut self, name: &str) -> Result<()>;

    /// Add a zero-argument, no-reply method member.
    fn add_method(&mut self, name: &str) -> Result<()>;

    /// Attach a localized description to an existing member.
    ///
    /// `sessionless_signal` tags the description as belonging to a
    /// sessionless signal.
    fn set_member_description(
        &mut self,
        member: &str,
        description: &str,
        sessionless_signal: bool,
    ) -> Result<()>;

    /// Freeze the definition and make it resolvable on the attachment.
    fn activate(self: Box<Self>) -> Arc<dyn BusInterface>;
}

/// Concrete member table shared by the in-crate bus implementations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDefinition {
    name: String,
    description_language: String,
    description: String,
    members: Vec<InterfaceMember>,
}

impl InterfaceDefinition {
    fn member(&self, name: &str, kind: MemberKind) -> Option<&InterfaceMember> {
        self.members
            .iter()
            .find(|m| m.kind == kind && m.name == name)
    }
}

impl BusInterface for InterfaceDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn description_language(&self) -> &str {
        &self.description_language
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn signal(&self, name: &str) -> Option<&InterfaceMember> {
        self.member(name, MemberKind::Signal)
    }

    fn method(&self, name: &str) -> Option<&InterfaceMember> {
        self.member(name, MemberKind::Method)
    }

    fn members(&self) -> &[InterfaceMember] {
        &self.members
    }
}

/// Accumulates members for an [`InterfaceDefinition`].
///
/// Used by bus implementations behind their [`InterfaceBuilder`] types;
/// enforces member-name uniqueness across both kinds.
#[derive(Debug)]
pub struct DefinitionBuilder {
    name: String,
    description_language: String,
    description: String,
    members: Vec<InterfaceMember>,
}

impl DefinitionBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description_language: String::new(),
            description: String::new(),
            members: Vec::new(),
        }
    }

    pub fn set_description_language(&mut self, language: &str) {
        self.description_language = language.to_string();
    }

    pub fn set_description(&mut self, description: &str) {
        self.description = description.to_string();
    }

    pub fn add_member(&mut self, name: &str, kind: MemberKind) -> Result<()> {
        if self.members.iter().any(|m| m.name == name) {
            return Err(BusError::MemberExists {
                interface: self.name.clone(),
                member: name.to_string(),
            });
        }
        self.members.push(InterfaceMember {
            name: name.to_string(),
            kind,
            description: String::new(),
            sessionless: false,
        });
        Ok(())
    }

    pub fn describe_member(
        &mut self,
        name: &str,
        description: &str,
        sessionless_signal: bool,
    ) -> Result<()> {
        let member = self
            .members
            .iter_mut()
            .find(|m| m.name == name)
            .ok_or_else(|| BusError::NoSuchMember {
                interface: self.name.clone(),
                member: name.to_string(),
            })?;
        member.description = description.to_string();
        member.sessionless = sessionless_signal;
        Ok(())
    }

    pub fn build(self) -> InterfaceDefinition {
        InterfaceDefinition {
            name: self.name,
            description_language: self.description_language,
            description: self.description,
            members: self.members,
        }
    }
}

// ============================================================================
// Service objects and attachments
// ============================================================================

/// A service object as registered with an attachment.
///
/// Binds an object path to an activated interface and one handler per method
/// member. The trigger handle is passed to handlers on dispatch.
pub struct ServiceObject {
    pub path: String,
    pub interface: Arc<dyn BusInterface>,
    pub handlers: HashMap<String, Arc<dyn ActionHandler>>,
    pub trigger: EventTrigger,
}

/// One service instance's connection to the bus.
///
/// Created started; torn down with [`BusAttachment::stop`], which is
/// best-effort and never reports an error.
#[async_trait]
pub trait BusAttachment: Send + Sync {
    /// Name this attachment presents on the bus.
    fn name(&self) -> &str;

    /// Begin a new interface definition named `name`.
    fn create_interface(&self, name: &str) -> Result<Box<dyn InterfaceBuilder>>;

    /// Resolve an activated interface by name.
    fn interface(&self, name: &str) -> Option<Arc<dyn BusInterface>>;

    /// Register a service object.
    async fn register_object(&self, object: ServiceObject) -> Result<()>;

    /// Unregister the service object at `path`, if present.
    async fn unregister_object(&self, path: &str);

    /// Connect to the bus transport.
    async fn connect(&self) -> Result<()>;

    /// Bind a session port and install its listener.
    async fn bind_session_port(
        &self,
        port: SessionPort,
        options: SessionOptions,
        listener: Arc<dyn SessionPortListener>,
    ) -> Result<()>;

    /// Announce this service's metadata on `port`.
    async fn announce(&self, port: SessionPort, about: &AboutData) -> Result<()>;

    /// Withdraw the current announcement, if any.
    async fn cancel_announcement(&self);

    /// Emit a sessionless signal from this attachment.
    async fn emit_signal(&self, interface: &str, member: &str) -> Result<()>;

    /// Stop the attachment and wait for it to quiesce.
    async fn stop(&self);
}

/// Entry point to a bus transport implementation.
#[async_trait]
pub trait ServiceBus: Send + Sync {
    /// Process-scoped runtime initialization. Idempotent; every successful
    /// call must be matched by a [`ServiceBus::shutdown`].
    fn init(&self) -> Result<()>;

    /// Matching process-scoped shutdown. Never errors.
    fn shutdown(&self);

    /// Create and start an attachment named `application_name`.
    async fn attach(&self, application_name: &str) -> Result<Arc<dyn BusAttachment>>;
}
