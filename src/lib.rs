//! Herald - service announcement facade
//!
//! Turns a declarative description of a service (metadata document, object
//! path, session port, named Events and Actions) into an announced endpoint
//! on a peer-to-peer service bus, and exposes the runtime verbs
//! `start`, `stop` and `trigger_event`.

pub mod about;
pub mod bootstrap;
pub mod bus;
pub mod config;
pub mod descriptor;
pub mod device;
pub mod digest;
pub mod facade;
pub mod gatekeeper;
pub mod interface;
