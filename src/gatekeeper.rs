//! Session gatekeeper.
//!
//! The listener half of the session-port binding: joins are accepted only
//! for the configured port. Completed joins are observational; integrators
//! that care about them register a [`SessionObserver`] instead of
//! subclassing the facade.

use std::sync::Arc;

use tracing::{debug, info};

use crate::bus::{SessionId, SessionOptions, SessionPort, SessionPortListener};

/// Observer for completed session joins.
pub trait SessionObserver: Send + Sync {
    fn session_joined(&self, port: SessionPort, id: SessionId, joiner: &str);
}

/// Accepts session joins for exactly one port.
pub struct Gatekeeper {
    port: SessionPort,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl Gatekeeper {
    pub fn new(port: SessionPort) -> Self {
        Self {
            port,
            observer: None,
        }
    }

    pub fn with_observer(port: SessionPort, observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            port,
            observer: Some(observer),
        }
    }

    /// The only port this gatekeeper accepts joins on.
    pub fn port(&self) -> SessionPort {
        self.port
    }
}

impl SessionPortListener for Gatekeeper {
    fn accept_session_joiner(
        &self,
        port: SessionPort,
        joiner: &str,
        _opts: &SessionOptions,
    ) -> bool {
        let accept = port == self.port;
        debug!(port, joiner, accept, "session join request");
        accept
    }

    fn session_joined(&self, port: SessionPort, id: SessionId, joiner: &str) {
        info!(port, session = id, joiner, "session joined");
        if let Some(observer) = &self.observer {
            observer.session_joined(port, id, joiner);
        }
    }
}
