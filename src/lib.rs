//! Conformance harness verifying delivery of vector-valued signal updates
//! across a negotiated routing rule ("map") between two endpoint devices.
//!
//! The routing/discovery protocol itself is an external collaborator reached
//! through the narrow [`router::RoutingService`] interface; this crate only
//! polls and observes its externally visible state. [`loopback::LoopbackRouter`]
//! is a deterministic in-process stand-in for that service so the harness can
//! run end-to-end in a single process.

pub type Result<T> = color_eyre::eyre::Result<T>;

pub mod cli;
pub mod error;
pub mod harness;
pub mod interrupt;
pub mod loopback;
pub mod router;
