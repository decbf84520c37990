//! Boundary to the external signal-routing service.
//!
//! The harness never implements routing or discovery; it consumes a running
//! routing service through this narrow interface and observes its externally
//! visible state: device ready / not ready, map ready / not ready, update
//! delivered / not delivered.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Opaque handle to a registered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

/// Opaque handle to a signal owned by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(pub u64);

/// Opaque handle to a routing rule between signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MapId(pub u64);

/// Direction of a signal relative to its owning device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Output,
    Input,
}

/// Element type of a signal's value vector.
///
/// The harness only exercises `Float`, but the routing surface is typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    Float,
    Int32,
    Double,
}

/// Timestamp policy attached to an update.
///
/// `ApplyNow` requests an immediate, uncoalesced dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampPolicy {
    ApplyNow,
}

/// Declaration of a signal at creation time.
///
/// Direction and length are fixed for the signal's lifetime. The min/max
/// bounds are advisory metadata consumed by the routing service; the harness
/// never enforces them.
#[derive(Debug, Clone)]
pub struct SignalSpec {
    pub name: String,
    pub direction: Direction,
    pub length: usize,
    pub ty: SignalType,
    pub unit: Option<String>,
    pub min: Vec<f32>,
    pub max: Vec<f32>,
    /// Whether the owner wants delivery events for this signal surfaced
    /// from [`RoutingService::poll`].
    pub subscribe_updates: bool,
}

/// One delivered update, surfaced from a destination poll.
///
/// `value` is `None` for an out-of-range/removed-instance notification,
/// which carries no new value for the signal.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryEvent {
    pub signal: SignalId,
    pub instance: u64,
    pub value: Option<Vec<f32>>,
}

/// Faults reported by the routing service at the call boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouterError {
    #[error("routing registration could not be allocated: {0}")]
    AllocationFailed(String),
    #[error("unknown device handle {0:?}")]
    UnknownDevice(DeviceId),
    #[error("unknown signal handle {0:?}")]
    UnknownSignal(SignalId),
    #[error("unknown map handle {0:?}")]
    UnknownMap(MapId),
    #[error("signal {0:?} has the wrong direction for this operation")]
    WrongDirection(SignalId),
    #[error("value length {got} does not match signal length {expected}")]
    LengthMismatch { expected: usize, got: usize },
}

/// The call surface of the signal-routing service.
///
/// Every `poll` is a cooperative, bounded-time call: it drives the device's
/// network I/O for up to `budget` and returns the batch of updates delivered
/// during that window, in arrival order. Dispatching the batch to handlers is
/// the caller's concern, which keeps the whole exchange single-threaded.
#[async_trait]
pub trait RoutingService: Send {
    /// Registers a device with the routing service.
    fn create_device(&mut self, name: &str) -> Result<DeviceId, RouterError>;

    /// Declares a signal on an existing device.
    fn create_signal(
        &mut self,
        device: DeviceId,
        spec: SignalSpec,
    ) -> Result<SignalId, RouterError>;

    /// Releases a device and deregisters it. No-op on an already-destroyed
    /// or unknown handle.
    fn destroy_device(&mut self, device: DeviceId);

    /// Whether the device has completed its registration phase. Monotonic:
    /// once true it stays true for the device's lifetime.
    fn device_is_ready(&self, device: DeviceId) -> bool;

    /// Builds a routing rule from output signals to input signals.
    fn create_map(
        &mut self,
        sources: &[SignalId],
        destinations: &[SignalId],
    ) -> Result<MapId, RouterError>;

    /// Registers the map for negotiation with the routing protocol.
    fn submit_map(&mut self, map: MapId) -> Result<(), RouterError>;

    /// Whether the map has finished negotiating. Never transitions back to
    /// false once true.
    fn map_is_ready(&self, map: MapId) -> bool;

    /// Issues an update of an output signal instance.
    fn set_value(
        &mut self,
        signal: SignalId,
        instance: u64,
        value: &[f32],
        policy: TimestampPolicy,
    ) -> Result<(), RouterError>;

    /// Drives the device's network I/O for up to `budget` and returns the
    /// updates delivered during the call, in arrival order. A zero budget is
    /// a non-blocking drain.
    async fn poll(
        &mut self,
        device: DeviceId,
        budget: Duration,
    ) -> Result<Vec<DeliveryEvent>, RouterError>;
}
