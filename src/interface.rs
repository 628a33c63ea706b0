//! Interface synthesis.
//!
//! Builds the service's bus interface from the digested fields and the
//! event/action descriptors: one sessionless signal member per event, one
//! no-reply method member per action, then activation. Activation is the
//! last step and only runs once every registration has succeeded.

use std::sync::Arc;

use tracing::debug;

use crate::bus::{BusAttachment, BusInterface};
use crate::descriptor::{ActionDescriptor, EventDescriptor};
use crate::digest::Digest;
use crate::facade::StartError;

/// Build and activate the service interface on `attachment`.
pub fn synthesize(
    attachment: &dyn BusAttachment,
    digest: &Digest,
    events: &[EventDescriptor],
    actions: &[ActionDescriptor],
) -> Result<Arc<dyn BusInterface>, StartError> {
    let mut builder =
        attachment
            .create_interface(&digest.interface_name)
            .map_err(|source| StartError::InterfaceCreation {
                name: digest.interface_name.clone(),
                source,
            })?;

    builder.set_description_language(&digest.description_language);
    builder.set_description(&digest.application_name);

    for event in events {
        builder
            .add_signal(&event.name)
            .and_then(|()| builder.set_member_description(&event.name, &event.description, true))
            .map_err(|source| StartError::SignalRegistration {
                name: event.name.clone(),
                source,
            })?;
        debug!(interface = %digest.interface_name, signal = %event.name, "signal member registered");
    }

    for action in actions {
        builder
            .add_method(&action.name)
            .and_then(|()| builder.set_member_description(&action.name, &action.description, false))
            .map_err(|source| StartError::MethodRegistration {
                name: action.name.clone(),
                source,
            })?;
        debug!(interface = %digest.interface_name, method = %action.name, "method member registered");
    }

    let interface = builder.activate();
    debug!(interface = %digest.interface_name, members = interface.members().len(), "interface activated");
    Ok(interface)
}
