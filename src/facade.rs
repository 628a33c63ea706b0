//! Service facade.
//!
//! Owns the whole bus-attachment lifecycle: runtime init, attachment start,
//! interface synthesis, handler binding, object registration, connect,
//! session-port binding, metadata construction and announcement - each step
//! gated on the success of the previous one, with the first failure reported
//! as a stage-tagged error after best-effort teardown of whatever was built.
//!
//! # Example
//!
//! ```ignore
//! use herald::config::ServiceConfig;
//! use herald::descriptor::EventDescriptor;
//! use herald::facade::Herald;
//!
//! let config = ServiceConfig::new(about_document, "/org/example/button", 1337);
//! let herald = Herald::builder(config)
//!     .with_event(EventDescriptor::new("Pressed", "Button Pressed"))
//!     .build()?;
//!
//! herald.start().await?;
//! herald.trigger_event("Pressed").await?;
//! herald.stop().await;
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info, warn};

use crate::about::{AboutData, AboutError};
use crate::bus::{
    BusAttachment, BusError, BusInterface, LoopbackBus, ServiceBus, ServiceObject,
    SessionOptions, SessionPort, SessionPortListener,
};
use crate::config::ServiceConfig;
use crate::descriptor::{ActionDescriptor, EventDescriptor};
use crate::digest::{self, Digest, DigestError};
use crate::gatekeeper::{Gatekeeper, SessionObserver};
use crate::interface;

/// Errors from constructing a service instance.
///
/// Construction-time failures are terminal: no instance exists, so nothing
/// can reach the bus with a bad configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration digestion failed")]
    Digest(#[from] DigestError),

    #[error("duplicate member name '{0}' across events and actions")]
    DuplicateMember(String),
}

/// Errors from `start`, tagged with the stage that failed.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("service is already started")]
    AlreadyStarted,

    #[error("bus runtime initialization failed")]
    RuntimeInit(#[source] BusError),

    #[error("bus attachment failed to start")]
    AttachmentStart(#[source] BusError),

    #[error("interface '{name}' could not be created")]
    InterfaceCreation {
        name: String,
        #[source]
        source: BusError,
    },

    #[error("signal '{name}' could not be registered")]
    SignalRegistration {
        name: String,
        #[source]
        source: BusError,
    },

    #[error("method '{name}' could not be registered")]
    MethodRegistration {
        name: String,
        #[source]
        source: BusError,
    },

    #[error("interface could not be attached to the service object")]
    InterfaceAttach(#[source] BusError),

    #[error("no method member found for action '{name}'")]
    HandlerBind { name: String },

    #[error("service object registration failed")]
    ObjectRegistration(#[source] BusError),

    #[error("bus connection failed")]
    Connect(#[source] BusError),

    #[error("session port {port} could not be bound")]
    PortBind {
        port: SessionPort,
        #[source]
        source: BusError,
    },

    #[error("about metadata could not be built")]
    MetadataBuild(#[source] AboutError),

    #[error("announcement failed")]
    Announcement(#[source] BusError),
}

/// Errors from `trigger_event`.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("service is not running")]
    NotRunning,

    #[error("unknown event '{0}'")]
    UnknownEvent(String),

    #[error("signal emission failed")]
    Emission(#[source] BusError),
}

/// Lifecycle state of a service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Unstarted,
    Starting,
    Running,
    Stopped,
}

/// Bus-side resources owned by a running service.
///
/// Populated step by step during `start` so that teardown can release
/// whatever subset exists, however far the pipeline got. After a successful
/// `start` every field is set.
#[derive(Default)]
struct BusResources {
    runtime_initialized: bool,
    attachment: Option<Arc<dyn BusAttachment>>,
    interface: Option<Arc<dyn BusInterface>>,
    about: Option<AboutData>,
    announced: bool,
}

/// Cheap-clone handle for triggering events on a service.
///
/// Handed to action handlers on every invocation; holds no strong reference
/// to the service, so a handler racing a teardown sees `NotRunning` instead
/// of half-destroyed resources.
#[derive(Clone)]
pub struct EventTrigger {
    inner: Weak<HeraldInner>,
}

impl EventTrigger {
    /// A trigger bound to nothing; always reports `NotRunning`.
    pub(crate) fn detached() -> Self {
        Self { inner: Weak::new() }
    }

    /// Trigger the named event on the owning service.
    pub async fn trigger(&self, event_name: &str) -> Result<(), TriggerError> {
        match self.inner.upgrade() {
            Some(inner) => inner.trigger(event_name).await,
            None => Err(TriggerError::NotRunning),
        }
    }
}

impl std::fmt::Debug for EventTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTrigger").finish_non_exhaustive()
    }
}

/// Builder for a [`Herald`] instance.
pub struct HeraldBuilder {
    config: ServiceConfig,
    events: Vec<EventDescriptor>,
    actions: Vec<ActionDescriptor>,
    bus: Option<Arc<dyn ServiceBus>>,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl HeraldBuilder {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            events: Vec::new(),
            actions: Vec::new(),
            bus: None,
            observer: None,
        }
    }

    /// Register an event this service can emit.
    pub fn with_event(mut self, event: EventDescriptor) -> Self {
        self.events.push(event);
        self
    }

    /// Register an action remote callers can invoke.
    pub fn with_action(mut self, action: ActionDescriptor) -> Self {
        self.actions.push(action);
        self
    }

    /// Use a specific bus implementation instead of a private loopback bus.
    pub fn with_bus(mut self, bus: Arc<dyn ServiceBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Observe completed session joins.
    pub fn with_session_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Digest the configuration and build the instance.
    ///
    /// Runs the metadata digester and pre-validates member-name uniqueness;
    /// failure here means the configuration can never be announced and no
    /// instance is constructed.
    pub fn build(self) -> Result<Herald, ConfigError> {
        let digest = digest::digest(&self.config.path, &self.config.about_document)?;

        let mut seen = HashSet::new();
        for name in self
            .events
            .iter()
            .map(|e| e.name.as_str())
            .chain(self.actions.iter().map(|a| a.name.as_str()))
        {
            if !seen.insert(name) {
                return Err(ConfigError::DuplicateMember(name.to_string()));
            }
        }

        let gatekeeper = Arc::new(match self.observer {
            Some(observer) => Gatekeeper::with_observer(self.config.session_port, observer),
            None => Gatekeeper::new(self.config.session_port),
        });
        let bus = self
            .bus
            .unwrap_or_else(|| Arc::new(LoopbackBus::new()) as Arc<dyn ServiceBus>);

        info!(
            application = %digest.application_name,
            interface = %digest.interface_name,
            port = self.config.session_port,
            "service configured"
        );

        Ok(Herald {
            inner: Arc::new(HeraldInner {
                config: self.config,
                digest,
                events: self.events,
                actions: self.actions,
                bus,
                gatekeeper,
                state: Mutex::new(ServiceState::Unstarted),
                resources: tokio::sync::Mutex::new(None),
            }),
        })
    }
}

/// An announceable service endpoint on a peer-to-peer bus.
pub struct Herald {
    inner: Arc<HeraldInner>,
}

struct HeraldInner {
    config: ServiceConfig,
    digest: Digest,
    events: Vec<EventDescriptor>,
    actions: Vec<ActionDescriptor>,
    bus: Arc<dyn ServiceBus>,
    gatekeeper: Arc<Gatekeeper>,
    state: Mutex<ServiceState>,
    resources: tokio::sync::Mutex<Option<BusResources>>,
}

impl Herald {
    /// Start building a service from its configuration.
    pub fn builder(config: ServiceConfig) -> HeraldBuilder {
        HeraldBuilder::new(config)
    }

    /// Fields digested from the configuration.
    pub fn digest(&self) -> &Digest {
        &self.inner.digest
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServiceState {
        *self.inner.state_lock()
    }

    /// A handle for triggering events without holding the facade.
    pub fn trigger_handle(&self) -> EventTrigger {
        EventTrigger {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Bring the service up and announce it.
    ///
    /// On any step failure the partially built resources are released, the
    /// service is left `Stopped` and the failing stage's error is returned;
    /// `start` may be called again once the underlying condition is fixed.
    pub async fn start(&self) -> Result<(), StartError> {
        let inner = &self.inner;
        let mut guard = inner.resources.lock().await;

        {
            let mut state = inner.state_lock();
            match *state {
                ServiceState::Starting | ServiceState::Running => {
                    return Err(StartError::AlreadyStarted)
                }
                _ => *state = ServiceState::Starting,
            }
        }

        info!(application = %inner.digest.application_name, "starting service");
        let mut resources = BusResources::default();
        let outcome = HeraldInner::setup(inner, &mut resources).await;
        *guard = Some(resources);

        match outcome {
            Ok(()) => {
                *inner.state_lock() = ServiceState::Running;
                info!(
                    application = %inner.digest.application_name,
                    port = inner.config.session_port,
                    "service announced and running"
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "start failed, releasing partial resources");
                inner.teardown(&mut guard).await;
                *inner.state_lock() = ServiceState::Stopped;
                Err(e)
            }
        }
    }

    /// Tear the service down.
    ///
    /// Idempotent and safe to call in any state, including before `start`
    /// and repeatedly; releases whatever subset of bus resources exists and
    /// never reports an error.
    pub async fn stop(&self) {
        let mut guard = self.inner.resources.lock().await;
        self.inner.teardown(&mut guard).await;
        *self.inner.state_lock() = ServiceState::Stopped;
        info!(application = %self.inner.digest.application_name, "service stopped");
    }

    /// Emit the named event as a sessionless, payload-free notification.
    pub async fn trigger_event(&self, event_name: &str) -> Result<(), TriggerError> {
        self.inner.trigger(event_name).await
    }

    /// The metadata currently announced, if the service is running.
    pub async fn announced_metadata(&self) -> Option<AboutData> {
        let guard = self.inner.resources.lock().await;
        guard
            .as_ref()
            .filter(|r| r.announced)
            .and_then(|r| r.about.clone())
    }
}

impl HeraldInner {
    fn state_lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The setup pipeline. Each step stores what it built into `resources`
    /// before the next step runs, so a failure anywhere leaves an accurate
    /// record for teardown.
    async fn setup(
        inner: &Arc<Self>,
        resources: &mut BusResources,
    ) -> Result<(), StartError> {
        inner.bus.init().map_err(StartError::RuntimeInit)?;
        resources.runtime_initialized = true;
        debug!("bus runtime initialized");

        let attachment = inner
            .bus
            .attach(&inner.digest.application_name)
            .await
            .map_err(StartError::AttachmentStart)?;
        resources.attachment = Some(Arc::clone(&attachment));
        debug!(attachment = attachment.name(), "attachment started");

        interface::synthesize(
            attachment.as_ref(),
            &inner.digest,
            &inner.events,
            &inner.actions,
        )?;

        let interface = attachment
            .interface(&inner.digest.interface_name)
            .ok_or_else(|| {
                StartError::InterfaceAttach(BusError::NoSuchInterface(
                    inner.digest.interface_name.clone(),
                ))
            })?;

        let mut handlers = std::collections::HashMap::new();
        for action in &inner.actions {
            if interface.method(&action.name).is_none() {
                return Err(StartError::HandlerBind {
                    name: action.name.clone(),
                });
            }
            handlers.insert(action.name.clone(), Arc::clone(&action.handler));
            debug!(action = %action.name, "handler bound");
        }
        resources.interface = Some(Arc::clone(&interface));

        attachment
            .register_object(ServiceObject {
                path: inner.config.path.clone(),
                interface: Arc::clone(&interface),
                handlers,
                trigger: EventTrigger {
                    inner: Arc::downgrade(inner),
                },
            })
            .await
            .map_err(StartError::ObjectRegistration)?;
        debug!(path = %inner.config.path, "service object registered");

        attachment.connect().await.map_err(StartError::Connect)?;
        debug!("attachment connected");

        attachment
            .bind_session_port(
                inner.config.session_port,
                SessionOptions::default(),
                Arc::clone(&inner.gatekeeper) as Arc<dyn SessionPortListener>,
            )
            .await
            .map_err(|source| StartError::PortBind {
                port: inner.config.session_port,
                source,
            })?;
        debug!(port = inner.config.session_port, "session port bound");

        let about = AboutData::from_document(
            &inner.config.about_document,
            &inner.digest.description_language,
        )
        .and_then(|about| {
            about.validate(&inner.digest.description_language)?;
            Ok(about)
        })
        .map_err(StartError::MetadataBuild)?;

        attachment
            .announce(inner.config.session_port, &about)
            .await
            .map_err(StartError::Announcement)?;
        resources.about = Some(about);
        resources.announced = true;

        Ok(())
    }

    /// Release whatever subset of resources exists, in reverse dependency
    /// order, ignoring teardown errors from the bus.
    async fn teardown(&self, slot: &mut Option<BusResources>) {
        let Some(resources) = slot.take() else {
            return;
        };

        if let Some(attachment) = &resources.attachment {
            attachment.stop().await;
            attachment.unregister_object(&self.config.path).await;
            if resources.announced {
                attachment.cancel_announcement().await;
            }
        }

        if resources.runtime_initialized {
            self.bus.shutdown();
        }
        debug!("bus resources released");
    }

    async fn trigger(&self, event_name: &str) -> Result<(), TriggerError> {
        let guard = self.resources.lock().await;
        let resources = guard
            .as_ref()
            .filter(|r| r.announced)
            .ok_or(TriggerError::NotRunning)?;
        let interface = resources.interface.as_ref().ok_or(TriggerError::NotRunning)?;
        let attachment = resources
            .attachment
            .as_ref()
            .ok_or(TriggerError::NotRunning)?;

        let member = interface
            .signal(event_name)
            .ok_or_else(|| TriggerError::UnknownEvent(event_name.to_string()))?;

        attachment
            .emit_signal(interface.name(), &member.name)
            .await
            .map_err(TriggerError::Emission)?;
        info!(event = event_name, "event triggered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::BoxFuture;

    use super::*;
    use crate::bus::{FailPoint, MockBus};
    use crate::descriptor::{ActionHandler, ActionInvocation};

    const ABOUT: &str = "<About>\
        <AppName>Higgns Button</AppName>\
        <DefaultLanguage>en</DefaultLanguage>\
        </About>";

    struct NoopHandler;

    impl ActionHandler for NoopHandler {
        fn handle(&self, _invocation: ActionInvocation) -> BoxFuture<'static, ()> {
            Box::pin(async {})
        }
    }

    fn config() -> ServiceConfig {
        ServiceConfig::new(ABOUT, "/org/example/button", 1337)
    }

    fn button(bus: &MockBus) -> Herald {
        Herald::builder(config())
            .with_event(EventDescriptor::new("Pressed", "Button Pressed"))
            .with_action(ActionDescriptor::new(
                "Press",
                "Press the button",
                Arc::new(NoopHandler),
            ))
            .with_bus(Arc::new(bus.clone()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_digests_configuration() {
        let herald = Herald::builder(config()).build().unwrap();
        assert_eq!(herald.digest().interface_name, "org.example.button");
        assert_eq!(herald.digest().application_name, "Higgns Button");
        assert_eq!(herald.state(), ServiceState::Unstarted);
    }

    #[test]
    fn test_build_rejects_invalid_path() {
        let result = Herald::builder(ServiceConfig::new(ABOUT, "", 1337)).build();
        assert!(matches!(
            result,
            Err(ConfigError::Digest(DigestError::InvalidPath(_)))
        ));
    }

    #[test]
    fn test_build_rejects_duplicate_members() {
        let result = Herald::builder(config())
            .with_event(EventDescriptor::new("Pressed", "Button Pressed"))
            .with_action(ActionDescriptor::new(
                "Pressed",
                "conflicts with the event",
                Arc::new(NoopHandler),
            ))
            .build();
        assert!(matches!(result, Err(ConfigError::DuplicateMember(name)) if name == "Pressed"));
    }

    #[tokio::test]
    async fn test_start_runs_full_pipeline() {
        let bus = MockBus::new();
        let herald = button(&bus);

        herald.start().await.unwrap();
        assert_eq!(herald.state(), ServiceState::Running);

        let calls = bus.calls();
        let order = [
            "runtime.init",
            "bus.attach(Higgns Button)",
            "interface.create(org.example.button)",
            "interface.add_signal(Pressed)",
            "interface.add_method(Press)",
            "interface.activate(org.example.button)",
            "object.register(/org/example/button)",
            "attachment.connect",
            "port.bind(1337)",
            "about.announce(1337, Higgns Button)",
        ];
        let mut last = 0;
        for call in order {
            let position = calls.iter().position(|c| c == call).unwrap_or_else(|| {
                panic!("missing call {call}, got {calls:?}");
            });
            assert!(position >= last, "{call} out of order in {calls:?}");
            last = position;
        }
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let bus = MockBus::new();
        let herald = button(&bus);
        herald.start().await.unwrap();
        assert!(matches!(
            herald.start().await,
            Err(StartError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn test_each_stage_failure_is_tagged() {
        let cases = [
            (FailPoint::RuntimeInit, "RuntimeInit"),
            (FailPoint::AttachmentStart, "AttachmentStart"),
            (FailPoint::CreateInterface, "InterfaceCreation"),
            (FailPoint::AddSignal, "SignalRegistration"),
            (FailPoint::AddMethod, "MethodRegistration"),
            (FailPoint::InterfaceLookup, "InterfaceAttach"),
            (FailPoint::RegisterObject, "ObjectRegistration"),
            (FailPoint::Connect, "Connect"),
            (FailPoint::BindPort, "PortBind"),
            (FailPoint::Announce, "Announcement"),
        ];

        for (point, expected) in cases {
            let bus = MockBus::new();
            bus.fail_at(point);
            let herald = button(&bus);

            let err = herald.start().await.unwrap_err();
            let tag = match err {
                StartError::RuntimeInit(_) => "RuntimeInit",
                StartError::AttachmentStart(_) => "AttachmentStart",
                StartError::InterfaceCreation { .. } => "InterfaceCreation",
                StartError::SignalRegistration { .. } => "SignalRegistration",
                StartError::MethodRegistration { .. } => "MethodRegistration",
                StartError::InterfaceAttach(_) => "InterfaceAttach",
                StartError::ObjectRegistration(_) => "ObjectRegistration",
                StartError::Connect(_) => "Connect",
                StartError::PortBind { .. } => "PortBind",
                StartError::Announcement(_) => "Announcement",
                other => panic!("unexpected error for {point:?}: {other:?}"),
            };
            assert_eq!(tag, expected, "failure at {point:?}");
            assert_eq!(herald.state(), ServiceState::Stopped, "state after {point:?}");
            assert!(
                matches!(herald.trigger_event("Pressed").await, Err(TriggerError::NotRunning)),
                "trigger after failed start at {point:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_failed_start_releases_runtime() {
        let bus = MockBus::new();
        bus.fail_at(FailPoint::Connect);
        let herald = button(&bus);

        herald.start().await.unwrap_err();

        let calls = bus.calls();
        assert!(calls.iter().any(|c| c == "attachment.stop"));
        assert!(calls.iter().any(|c| c == "runtime.shutdown"));
    }

    #[tokio::test]
    async fn test_start_again_after_failure() {
        let bus = MockBus::new();
        bus.fail_at(FailPoint::Connect);
        let herald = button(&bus);
        herald.start().await.unwrap_err();

        bus.clear_failure();
        herald.start().await.unwrap();
        assert_eq!(herald.state(), ServiceState::Running);
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let bus = MockBus::new();
        let herald = button(&bus);
        herald.stop().await;
        herald.stop().await;
        assert_eq!(herald.state(), ServiceState::Stopped);
        assert!(!bus.calls().iter().any(|c| c == "runtime.shutdown"));
    }

    #[tokio::test]
    async fn test_stop_releases_in_reverse_order() {
        let bus = MockBus::new();
        let herald = button(&bus);
        herald.start().await.unwrap();
        herald.stop().await;

        let calls = bus.calls();
        let stop = calls.iter().position(|c| c == "attachment.stop").unwrap();
        let unregister = calls
            .iter()
            .position(|c| c == "object.unregister(/org/example/button)")
            .unwrap();
        let cancel = calls.iter().position(|c| c == "about.cancel").unwrap();
        let shutdown = calls.iter().position(|c| c == "runtime.shutdown").unwrap();
        assert!(stop < unregister && unregister < cancel && cancel < shutdown);
    }

    #[tokio::test]
    async fn test_trigger_unknown_event_produces_no_emission() {
        let bus = MockBus::new();
        let herald = button(&bus);
        herald.start().await.unwrap();

        let err = herald.trigger_event("Alarm").await.unwrap_err();
        assert!(matches!(err, TriggerError::UnknownEvent(name) if name == "Alarm"));
        assert!(!bus.calls().iter().any(|c| c.starts_with("signal.emit")));
    }

    #[tokio::test]
    async fn test_trigger_emission_failure() {
        let bus = MockBus::new();
        let herald = button(&bus);
        herald.start().await.unwrap();

        bus.fail_at(FailPoint::EmitSignal);
        assert!(matches!(
            herald.trigger_event("Pressed").await,
            Err(TriggerError::Emission(_))
        ));
    }

    #[tokio::test]
    async fn test_trigger_handle_outlives_checks() {
        let bus = MockBus::new();
        let herald = button(&bus);
        let trigger = herald.trigger_handle();

        assert!(matches!(
            trigger.trigger("Pressed").await,
            Err(TriggerError::NotRunning)
        ));

        herald.start().await.unwrap();
        trigger.trigger("Pressed").await.unwrap();

        herald.stop().await;
        assert!(matches!(
            trigger.trigger("Pressed").await,
            Err(TriggerError::NotRunning)
        ));
    }

    struct CountingObserver {
        joins: AtomicUsize,
    }

    impl SessionObserver for CountingObserver {
        fn session_joined(&self, _port: SessionPort, _id: u32, _joiner: &str) {
            self.joins.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_builder_accepts_session_observer() {
        let observer = Arc::new(CountingObserver {
            joins: AtomicUsize::new(0),
        });
        let herald = Herald::builder(config())
            .with_event(EventDescriptor::new("Pressed", "Button Pressed"))
            .with_session_observer(Arc::clone(&observer) as _)
            .build()
            .unwrap();
        assert_eq!(herald.state(), ServiceState::Unstarted);
    }
}
