//! In-process loopback bus implementation.
//!
//! Routes announcements, session joins, method invocations and signals
//! between attachments living in the same process, without any network
//! transport. Ideal for:
//! - Single-process applications
//! - Testing
//! - Embedded use cases
//!
//! The bus half a remote peer would use is exposed directly on
//! [`LoopbackBus`]: `observe_signals`, `announcements`, `invoke_method` and
//! `join_session`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{
    Announcement, BusAttachment, BusError, BusInterface, DefinitionBuilder, InterfaceBuilder,
    InterfaceDefinition, MemberKind, MessageEnvelope, Result, ServiceBus, ServiceObject,
    SessionId, SessionOptions, SessionPort, SessionPortListener, SignalEvent,
};
use crate::about::AboutData;
use crate::descriptor::ActionInvocation;

const SIGNAL_CHANNEL_CAPACITY: usize = 128;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process loopback bus.
///
/// Cheap to clone; clones share the same router, so attachments created
/// through any clone see each other.
#[derive(Clone)]
pub struct LoopbackBus {
    router: Arc<Router>,
}

struct Router {
    init_count: AtomicUsize,
    next_session: AtomicU32,
    signals: broadcast::Sender<SignalEvent>,
    attachments: Mutex<Vec<Weak<AttachmentState>>>,
}

impl Router {
    /// Snapshot the live attachments, pruning dropped ones.
    fn live_attachments(&self) -> Vec<Arc<AttachmentState>> {
        let mut slots = lock(&self.attachments);
        slots.retain(|weak| weak.strong_count() > 0);
        slots.iter().filter_map(Weak::upgrade).collect()
    }
}

impl LoopbackBus {
    pub fn new() -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        Self {
            router: Arc::new(Router {
                init_count: AtomicUsize::new(0),
                next_session: AtomicU32::new(0),
                signals,
                attachments: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Number of outstanding runtime initializations.
    pub fn init_count(&self) -> usize {
        self.router.init_count.load(Ordering::SeqCst)
    }

    /// Subscribe to every signal emitted on this bus.
    pub fn observe_signals(&self) -> broadcast::Receiver<SignalEvent> {
        self.router.signals.subscribe()
    }

    /// Currently live announcements.
    pub fn announcements(&self) -> Vec<Announcement> {
        self.router
            .live_attachments()
            .iter()
            .filter(|a| !a.stopped.load(Ordering::SeqCst))
            .filter_map(|a| lock(&a.announcement).clone())
            .collect()
    }

    /// Invoke a method member on whichever service implements `interface`.
    ///
    /// The bound handler is dispatched on its own task; the call returns as
    /// soon as the invocation is routed, mirroring a no-reply method call.
    pub async fn invoke_method(&self, interface: &str, member: &str, sender: &str) -> Result<()> {
        let mut interface_seen = false;

        for attachment in self.router.live_attachments() {
            if attachment.stopped.load(Ordering::SeqCst)
                || !attachment.connected.load(Ordering::SeqCst)
            {
                continue;
            }

            let dispatch = {
                let objects = lock(&attachment.objects);
                objects.values().find_map(|object| {
                    if object.interface.name() != interface {
                        return None;
                    }
                    interface_seen = true;
                    object.interface.method(member)?;
                    let handler = object.handlers.get(member)?;
                    Some((Arc::clone(handler), object.trigger.clone()))
                })
            };

            if let Some((handler, trigger)) = dispatch {
                debug!(interface, member, sender, "dispatching method invocation");
                let invocation = ActionInvocation {
                    member: member.to_string(),
                    envelope: MessageEnvelope {
                        sender: sender.to_string(),
                        session_id: None,
                    },
                    trigger,
                };
                tokio::spawn(handler.handle(invocation));
                return Ok(());
            }
        }

        if interface_seen {
            Err(BusError::NoSuchMember {
                interface: interface.to_string(),
                member: member.to_string(),
            })
        } else {
            Err(BusError::NoSuchInterface(interface.to_string()))
        }
    }

    /// Request to join a session on `port` as `joiner`.
    ///
    /// The join is rejected when the offered traffic type does not match the
    /// binding, or when the bound listener turns the joiner away.
    pub async fn join_session(
        &self,
        port: SessionPort,
        joiner: &str,
        options: SessionOptions,
    ) -> Result<SessionId> {
        let (bound_options, listener) = self
            .router
            .live_attachments()
            .into_iter()
            .filter(|a| {
                !a.stopped.load(Ordering::SeqCst) && a.connected.load(Ordering::SeqCst)
            })
            .find_map(|a| {
                lock(&a.ports)
                    .get(&port)
                    .map(|b| (b.options, Arc::clone(&b.listener)))
            })
            .ok_or(BusError::PortNotBound(port))?;

        if bound_options.traffic != options.traffic {
            return Err(BusError::SessionRejected(port));
        }

        if !listener.accept_session_joiner(port, joiner, &options) {
            return Err(BusError::SessionRejected(port));
        }

        let id = self.router.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        listener.session_joined(port, id, joiner);
        Ok(id)
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceBus for LoopbackBus {
    fn init(&self) -> Result<()> {
        let count = self.router.init_count.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(count, "loopback runtime initialized");
        Ok(())
    }

    fn shutdown(&self) {
        let _ = self
            .router
            .init_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    async fn attach(&self, application_name: &str) -> Result<Arc<dyn BusAttachment>> {
        if self.router.init_count.load(Ordering::SeqCst) == 0 {
            return Err(BusError::RuntimeNotInitialized);
        }

        let state = Arc::new(AttachmentState {
            name: application_name.to_string(),
            started: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            interfaces: Mutex::new(HashMap::new()),
            objects: Mutex::new(HashMap::new()),
            ports: Mutex::new(HashMap::new()),
            announcement: Mutex::new(None),
            router: Arc::clone(&self.router),
        });
        lock(&self.router.attachments).push(Arc::downgrade(&state));

        info!(attachment = application_name, "bus attachment started");
        Ok(Arc::new(LoopbackAttachment { state }))
    }
}

enum InterfaceSlot {
    /// Name reserved by an unactivated builder.
    Reserved,
    Active(Arc<InterfaceDefinition>),
}

struct BoundPort {
    options: SessionOptions,
    listener: Arc<dyn SessionPortListener>,
}

struct AttachmentState {
    name: String,
    started: AtomicBool,
    connected: AtomicBool,
    stopped: AtomicBool,
    interfaces: Mutex<HashMap<String, InterfaceSlot>>,
    objects: Mutex<HashMap<String, ServiceObject>>,
    ports: Mutex<HashMap<SessionPort, BoundPort>>,
    announcement: Mutex<Option<Announcement>>,
    router: Arc<Router>,
}

/// An attachment on the loopback bus.
pub struct LoopbackAttachment {
    state: Arc<AttachmentState>,
}

#[async_trait]
impl BusAttachment for LoopbackAttachment {
    fn name(&self) -> &str {
        &self.state.name
    }

    fn create_interface(&self, name: &str) -> Result<Box<dyn InterfaceBuilder>> {
        let mut interfaces = lock(&self.state.interfaces);
        if interfaces.contains_key(name) {
            return Err(BusError::InterfaceExists(name.to_string()));
        }
        interfaces.insert(name.to_string(), InterfaceSlot::Reserved);

        Ok(Box::new(LoopbackInterfaceBuilder {
            definition: DefinitionBuilder::new(name),
            name: name.to_string(),
            state: Arc::clone(&self.state),
        }))
    }

    fn interface(&self, name: &str) -> Option<Arc<dyn BusInterface>> {
        match lock(&self.state.interfaces).get(name) {
            Some(InterfaceSlot::Active(definition)) => {
                Some(Arc::clone(definition) as Arc<dyn BusInterface>)
            }
            _ => None,
        }
    }

    async fn register_object(&self, object: ServiceObject) -> Result<()> {
        let mut objects = lock(&self.state.objects);
        if objects.contains_key(&object.path) {
            return Err(BusError::ObjectExists(object.path.clone()));
        }
        debug!(path = %object.path, interface = %object.interface.name(), "service object registered");
        objects.insert(object.path.clone(), object);
        Ok(())
    }

    async fn unregister_object(&self, path: &str) {
        lock(&self.state.objects).remove(path);
    }

    async fn connect(&self) -> Result<()> {
        if !self.state.started.load(Ordering::SeqCst) {
            return Err(BusError::NotStarted(self.state.name.clone()));
        }
        self.state.connected.store(true, Ordering::SeqCst);
        debug!(attachment = %self.state.name, "attachment connected");
        Ok(())
    }

    async fn bind_session_port(
        &self,
        port: SessionPort,
        options: SessionOptions,
        listener: Arc<dyn SessionPortListener>,
    ) -> Result<()> {
        if !self.state.connected.load(Ordering::SeqCst) {
            return Err(BusError::NotConnected(self.state.name.clone()));
        }
        let mut ports = lock(&self.state.ports);
        if ports.contains_key(&port) {
            return Err(BusError::PortBound(port));
        }
        ports.insert(port, BoundPort { options, listener });
        debug!(attachment = %self.state.name, port, "session port bound");
        Ok(())
    }

    async fn announce(&self, port: SessionPort, about: &AboutData) -> Result<()> {
        if !self.state.connected.load(Ordering::SeqCst) {
            return Err(BusError::NotConnected(self.state.name.clone()));
        }
        *lock(&self.state.announcement) = Some(Announcement {
            port,
            about: about.clone(),
        });
        info!(
            attachment = %self.state.name,
            port,
            application = about.app_name().unwrap_or_default(),
            "service announced"
        );
        Ok(())
    }

    async fn cancel_announcement(&self) {
        lock(&self.state.announcement).take();
    }

    async fn emit_signal(&self, interface: &str, member: &str) -> Result<()> {
        if !self.state.started.load(Ordering::SeqCst) {
            return Err(BusError::NotStarted(self.state.name.clone()));
        }
        if !self.state.connected.load(Ordering::SeqCst) {
            return Err(BusError::NotConnected(self.state.name.clone()));
        }

        match lock(&self.state.interfaces).get(interface) {
            Some(InterfaceSlot::Active(definition)) => {
                if definition.signal(member).is_none() {
                    return Err(BusError::NoSuchMember {
                        interface: interface.to_string(),
                        member: member.to_string(),
                    });
                }
            }
            _ => return Err(BusError::NoSuchInterface(interface.to_string())),
        }

        debug!(attachment = %self.state.name, interface, member, "signal emitted");
        let _ = self.state.router.signals.send(SignalEvent {
            interface: interface.to_string(),
            member: member.to_string(),
            sender: self.state.name.clone(),
            sessionless: true,
        });
        Ok(())
    }

    async fn stop(&self) {
        self.state.stopped.store(true, Ordering::SeqCst);
        self.state.connected.store(false, Ordering::SeqCst);
        self.state.started.store(false, Ordering::SeqCst);
        lock(&self.state.ports).clear();
        info!(attachment = %self.state.name, "attachment stopped");
    }
}

struct LoopbackInterfaceBuilder {
    definition: DefinitionBuilder,
    name: String,
    state: Arc<AttachmentState>,
}

impl InterfaceBuilder for LoopbackInterfaceBuilder {
    fn set_description_language(&mut self, language: &str) {
        self.definition.set_description_language(language);
    }

    fn set_description(&mut self, description: &str) {
        self.definition.set_description(description);
    }

    fn add_signal(&mut self, name: &str) -> Result<()> {
        self.definition.add_member(name, MemberKind::Signal)
    }

    fn add_method(&mut self, name: &str) -> Result<()> {
        self.definition.add_member(name, MemberKind::Method)
    }

    fn set_member_description(
        &mut self,
        member: &str,
        description: &str,
        sessionless_signal: bool,
    ) -> Result<()> {
        self.definition
            .describe_member(member, description, sessionless_signal)
    }

    fn activate(self: Box<Self>) -> Arc<dyn BusInterface> {
        let definition = Arc::new(self.definition.build());
        lock(&self.state.interfaces).insert(
            self.name.clone(),
            InterfaceSlot::Active(Arc::clone(&definition)),
        );
        debug!(interface = %self.name, "interface activated");
        definition
    }
}
