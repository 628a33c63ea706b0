//! Mock bus implementation for testing.
//!
//! Records every call it receives and can be scripted to fail at any single
//! point of the setup pipeline, so each stage's error path can be exercised
//! in isolation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{
    BusAttachment, BusError, BusInterface, DefinitionBuilder, InterfaceBuilder,
    InterfaceDefinition, MemberKind, Result, ServiceBus, ServiceObject, SessionOptions,
    SessionPort, SessionPortListener,
};
use crate::about::AboutData;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pipeline points the mock can be scripted to fail at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    RuntimeInit,
    AttachmentStart,
    CreateInterface,
    AddSignal,
    AddMethod,
    InterfaceLookup,
    RegisterObject,
    Connect,
    BindPort,
    Announce,
    EmitSignal,
}

/// Mock bus for testing.
///
/// Cheap to clone; clones share the scripted failure and the call log.
#[derive(Clone, Default)]
pub struct MockBus {
    state: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    fail: Mutex<Option<FailPoint>>,
    calls: Mutex<Vec<String>>,
}

impl MockState {
    fn record(&self, call: impl Into<String>) {
        lock(&self.calls).push(call.into());
    }

    fn failing(&self, point: FailPoint) -> bool {
        *lock(&self.fail) == Some(point)
    }

    fn fail_if(&self, point: FailPoint) -> Result<()> {
        if self.failing(point) {
            Err(BusError::Failure(format!("scripted failure at {point:?}")))
        } else {
            Ok(())
        }
    }
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next matching call to fail.
    pub fn fail_at(&self, point: FailPoint) {
        *lock(&self.state.fail) = Some(point);
    }

    /// Clear any scripted failure.
    pub fn clear_failure(&self) {
        lock(&self.state.fail).take();
    }

    /// Everything called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state.calls).clone()
    }
}

#[async_trait]
impl ServiceBus for MockBus {
    fn init(&self) -> Result<()> {
        self.state.record("runtime.init");
        self.state.fail_if(FailPoint::RuntimeInit)
    }

    fn shutdown(&self) {
        self.state.record("runtime.shutdown");
    }

    async fn attach(&self, application_name: &str) -> Result<Arc<dyn BusAttachment>> {
        self.state.record(format!("bus.attach({application_name})"));
        self.state.fail_if(FailPoint::AttachmentStart)?;
        Ok(Arc::new(MockAttachment {
            name: application_name.to_string(),
            state: Arc::clone(&self.state),
            interfaces: Arc::new(Mutex::new(HashMap::new())),
            objects: Mutex::new(HashMap::new()),
        }))
    }
}

struct MockAttachment {
    name: String,
    state: Arc<MockState>,
    interfaces: Arc<Mutex<HashMap<String, Arc<InterfaceDefinition>>>>,
    objects: Mutex<HashMap<String, ServiceObject>>,
}

#[async_trait]
impl BusAttachment for MockAttachment {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_interface(&self, name: &str) -> Result<Box<dyn InterfaceBuilder>> {
        self.state.record(format!("interface.create({name})"));
        self.state.fail_if(FailPoint::CreateInterface)?;
        if lock(&self.interfaces).contains_key(name) {
            return Err(BusError::InterfaceExists(name.to_string()));
        }
        Ok(Box::new(MockInterfaceBuilder {
            definition: DefinitionBuilder::new(name),
            name: name.to_string(),
            state: Arc::clone(&self.state),
            interfaces: Arc::clone(&self.interfaces),
        }))
    }

    fn interface(&self, name: &str) -> Option<Arc<dyn BusInterface>> {
        if self.state.failing(FailPoint::InterfaceLookup) {
            return None;
        }
        lock(&self.interfaces)
            .get(name)
            .map(|definition| Arc::clone(definition) as Arc<dyn BusInterface>)
    }

    async fn register_object(&self, object: ServiceObject) -> Result<()> {
        self.state.record(format!("object.register({})", object.path));
        self.state.fail_if(FailPoint::RegisterObject)?;
        lock(&self.objects).insert(object.path.clone(), object);
        Ok(())
    }

    async fn unregister_object(&self, path: &str) {
        self.state.record(format!("object.unregister({path})"));
        lock(&self.objects).remove(path);
    }

    async fn connect(&self) -> Result<()> {
        self.state.record("attachment.connect");
        self.state.fail_if(FailPoint::Connect)
    }

    async fn bind_session_port(
        &self,
        port: SessionPort,
        _options: SessionOptions,
        _listener: Arc<dyn SessionPortListener>,
    ) -> Result<()> {
        self.state.record(format!("port.bind({port})"));
        self.state.fail_if(FailPoint::BindPort)
    }

    async fn announce(&self, port: SessionPort, about: &AboutData) -> Result<()> {
        self.state.record(format!(
            "about.announce({port}, {})",
            about.app_name().unwrap_or_default()
        ));
        self.state.fail_if(FailPoint::Announce)
    }

    async fn cancel_announcement(&self) {
        self.state.record("about.cancel");
    }

    async fn emit_signal(&self, interface: &str, member: &str) -> Result<()> {
        self.state
            .record(format!("signal.emit({interface}, {member})"));
        self.state.fail_if(FailPoint::EmitSignal)
    }

    async fn stop(&self) {
        self.state.record("attachment.stop");
    }
}

struct MockInterfaceBuilder {
    definition: DefinitionBuilder,
    name: String,
    state: Arc<MockState>,
    interfaces: Arc<Mutex<HashMap<String, Arc<InterfaceDefinition>>>>,
}

impl InterfaceBuilder for MockInterfaceBuilder {
    fn set_description_language(&mut self, language: &str) {
        self.definition.set_description_language(language);
    }

    fn set_description(&mut self, description: &str) {
        self.definition.set_description(description);
    }

    fn add_signal(&mut self, name: &str) -> Result<()> {
        self.state.record(format!("interface.add_signal({name})"));
        self.state.fail_if(FailPoint::AddSignal)?;
        self.definition.add_member(name, MemberKind::Signal)
    }

    fn add_method(&mut self, name: &str) -> Result<()> {
        self.state.record(format!("interface.add_method({name})"));
        self.state.fail_if(FailPoint::AddMethod)?;
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
        self.state.record(format!("interface.activate({})", self.name));
        let definition = Arc::new(self.definition.build());
        lock(&self.interfaces).insert(self.name, Arc::clone(&definition));
        definition
    }
}
