//! Deterministic in-process routing service.
//!
//! `LoopbackRouter` implements the [`RoutingService`] surface without any
//! network: devices become ready after a configurable number of polls, maps
//! become ready a configurable number of polls after submission, and updates
//! routed through a ready map land in the destination device's inbox. The
//! binary runs against it so the harness is exercisable in one process, and
//! the scenario tests use its knobs to simulate delivery loss and negotiation
//! that never completes.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::debug;

use crate::router::{
    DeliveryEvent, DeviceId, Direction, MapId, RouterError, RoutingService, SignalId, SignalSpec,
    TimestampPolicy,
};

/// Behavior knobs for the simulated routing service.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// A device reports ready once it has been polled this many times.
    pub ready_after_polls: u32,
    /// A submitted map reports ready once its endpoint devices have been
    /// polled this many times after submission. `None` means negotiation
    /// never completes.
    pub map_ready_after_polls: Option<u32>,
    /// Silently discard every routed update (total delivery loss).
    pub drop_updates: bool,
    /// Refuse all device registrations (setup-failure simulation).
    pub fail_creation: bool,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            ready_after_polls: 1,
            map_ready_after_polls: Some(2),
            drop_updates: false,
            fail_creation: false,
        }
    }
}

#[derive(Debug)]
struct DeviceRecord {
    name: String,
    polls: u32,
    inbox: VecDeque<DeliveryEvent>,
}

#[derive(Debug)]
struct SignalRecord {
    device: DeviceId,
    spec: SignalSpec,
}

#[derive(Debug)]
struct MapRecord {
    sources: Vec<SignalId>,
    destinations: Vec<SignalId>,
    submitted: bool,
    polls_since_submit: u32,
}

#[derive(Debug)]
struct Inner {
    config: LoopbackConfig,
    next_id: u64,
    devices: HashMap<DeviceId, DeviceRecord>,
    signals: HashMap<SignalId, SignalRecord>,
    maps: HashMap<MapId, MapRecord>,
    destroy_calls: HashMap<DeviceId, u32>,
    premature_update: bool,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn map_is_ready(&self, record: &MapRecord) -> bool {
        record.submitted
            && self
                .config
                .map_ready_after_polls
                .is_some_and(|n| record.polls_since_submit >= n)
    }
}

/// Cloneable handle to the shared routing state. Tests keep a clone to
/// inspect the state after the harness has finished with its own.
#[derive(Debug, Clone)]
pub struct LoopbackRouter {
    inner: Arc<Mutex<Inner>>,
}

impl LoopbackRouter {
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                config,
                next_id: 0,
                devices: HashMap::new(),
                signals: HashMap::new(),
                maps: HashMap::new(),
                destroy_calls: HashMap::new(),
                premature_update: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("loopback state poisoned")
    }

    /// Number of times `destroy_device` has been called for this handle,
    /// including calls that were no-ops.
    pub fn destroy_calls(&self, device: DeviceId) -> u32 {
        self.lock().destroy_calls.get(&device).copied().unwrap_or(0)
    }

    /// Per-device destroy-call counts, in no particular order.
    pub fn all_destroy_calls(&self) -> Vec<u32> {
        self.lock().destroy_calls.values().copied().collect()
    }

    /// Devices currently registered (created and not destroyed).
    pub fn live_devices(&self) -> usize {
        self.lock().devices.len()
    }

    /// Whether any update was ever issued on a signal whose map had been
    /// submitted but was not yet ready.
    pub fn premature_update_issued(&self) -> bool {
        self.lock().premature_update
    }

    /// Enqueues an out-of-range/removed-instance notification for a signal.
    /// The delivered event carries no value.
    pub fn notify_instance_removed(
        &self,
        signal: SignalId,
        instance: u64,
    ) -> Result<(), RouterError> {
        let mut inner = self.lock();
        let device = inner
            .signals
            .get(&signal)
            .map(|r| r.device)
            .ok_or(RouterError::UnknownSignal(signal))?;
        let record = inner
            .devices
            .get_mut(&device)
            .ok_or(RouterError::UnknownDevice(device))?;
        record.inbox.push_back(DeliveryEvent {
            signal,
            instance,
            value: None,
        });
        Ok(())
    }

    /// One poll call accounts for one readiness tick on the device and on
    /// every submitted map it participates in.
    fn note_poll(&self, device: DeviceId) -> Result<(), RouterError> {
        let mut inner = self.lock();
        let Inner {
            devices,
            signals,
            maps,
            ..
        } = &mut *inner;
        let record = devices
            .get_mut(&device)
            .ok_or(RouterError::UnknownDevice(device))?;
        record.polls += 1;
        for map in maps.values_mut() {
            if !map.submitted {
                continue;
            }
            let involves = map
                .sources
                .iter()
                .chain(map.destinations.iter())
                .any(|s| signals.get(s).map(|r| r.device) == Some(device));
            if involves {
                map.polls_since_submit += 1;
            }
        }
        Ok(())
    }

    fn drain(&self, device: DeviceId) -> Result<Vec<DeliveryEvent>, RouterError> {
        let mut inner = self.lock();
        let record = inner
            .devices
            .get_mut(&device)
            .ok_or(RouterError::UnknownDevice(device))?;
        Ok(record.inbox.drain(..).collect())
    }
}

#[async_trait]
impl RoutingService for LoopbackRouter {
    fn create_device(&mut self, name: &str) -> Result<DeviceId, RouterError> {
        let mut inner = self.lock();
        if inner.config.fail_creation {
            return Err(RouterError::AllocationFailed(format!(
                "registration refused for '{name}'"
            )));
        }
        let id = DeviceId(inner.next_id());
        inner.devices.insert(
            id,
            DeviceRecord {
                name: name.to_string(),
                polls: 0,
                inbox: VecDeque::new(),
            },
        );
        debug!(name, ?id, "device registered");
        Ok(id)
    }

    fn create_signal(
        &mut self,
        device: DeviceId,
        spec: SignalSpec,
    ) -> Result<SignalId, RouterError> {
        let mut inner = self.lock();
        if !inner.devices.contains_key(&device) {
            return Err(RouterError::UnknownDevice(device));
        }
        let id = SignalId(inner.next_id());
        debug!(name = %spec.name, ?device, ?id, "signal registered");
        inner.signals.insert(id, SignalRecord { device, spec });
        Ok(id)
    }

    fn destroy_device(&mut self, device: DeviceId) {
        let mut inner = self.lock();
        *inner.destroy_calls.entry(device).or_insert(0) += 1;
        match inner.devices.remove(&device) {
            Some(record) => {
                inner.signals.retain(|_, s| s.device != device);
                debug!(name = %record.name, ?device, "device freed");
            }
            None => debug!(?device, "destroy on unknown or already-freed device"),
        }
    }

    fn device_is_ready(&self, device: DeviceId) -> bool {
        let inner = self.lock();
        inner
            .devices
            .get(&device)
            .is_some_and(|r| r.polls >= inner.config.ready_after_polls)
    }

    fn create_map(
        &mut self,
        sources: &[SignalId],
        destinations: &[SignalId],
    ) -> Result<MapId, RouterError> {
        let mut inner = self.lock();
        for signal in sources {
            let record = inner
                .signals
                .get(signal)
                .ok_or(RouterError::UnknownSignal(*signal))?;
            if record.spec.direction != Direction::Output {
                return Err(RouterError::WrongDirection(*signal));
            }
        }
        for signal in destinations {
            let record = inner
                .signals
                .get(signal)
                .ok_or(RouterError::UnknownSignal(*signal))?;
            if record.spec.direction != Direction::Input {
                return Err(RouterError::WrongDirection(*signal));
            }
        }
        let id = MapId(inner.next_id());
        inner.maps.insert(
            id,
            MapRecord {
                sources: sources.to_vec(),
                destinations: destinations.to_vec(),
                submitted: false,
                polls_since_submit: 0,
            },
        );
        debug!(?id, ?sources, ?destinations, "map created");
        Ok(id)
    }

    fn submit_map(&mut self, map: MapId) -> Result<(), RouterError> {
        let mut inner = self.lock();
        let record = inner.maps.get_mut(&map).ok_or(RouterError::UnknownMap(map))?;
        record.submitted = true;
        record.polls_since_submit = 0;
        debug!(?map, "map submitted for negotiation");
        Ok(())
    }

    fn map_is_ready(&self, map: MapId) -> bool {
        let inner = self.lock();
        inner
            .maps
            .get(&map)
            .is_some_and(|record| inner.map_is_ready(record))
    }

    fn set_value(
        &mut self,
        signal: SignalId,
        instance: u64,
        value: &[f32],
        _policy: TimestampPolicy,
    ) -> Result<(), RouterError> {
        let mut inner = self.lock();
        let record = inner
            .signals
            .get(&signal)
            .ok_or(RouterError::UnknownSignal(signal))?;
        if record.spec.direction != Direction::Output {
            return Err(RouterError::WrongDirection(signal));
        }
        if record.spec.length != value.len() {
            return Err(RouterError::LengthMismatch {
                expected: record.spec.length,
                got: value.len(),
            });
        }

        let mut deliveries: Vec<(DeviceId, SignalId)> = Vec::new();
        let mut premature = false;
        for map in inner.maps.values() {
            if !map.sources.contains(&signal) || !map.submitted {
                continue;
            }
            if !inner.map_is_ready(map) {
                premature = true;
                continue;
            }
            for dst in &map.destinations {
                if let Some(dst_record) = inner.signals.get(dst) {
                    // Events are only surfaced for signals that asked for
                    // update notifications.
                    if dst_record.spec.subscribe_updates {
                        deliveries.push((dst_record.device, *dst));
                    }
                }
            }
        }
        inner.premature_update |= premature;

        if inner.config.drop_updates {
            debug!(?signal, instance, "dropping routed update");
            return Ok(());
        }
        for (device, dst) in deliveries {
            if let Some(dst_device) = inner.devices.get_mut(&device) {
                dst_device.inbox.push_back(DeliveryEvent {
                    signal: dst,
                    instance,
                    value: Some(value.to_vec()),
                });
            }
        }
        Ok(())
    }

    async fn poll(
        &mut self,
        device: DeviceId,
        budget: Duration,
    ) -> Result<Vec<DeliveryEvent>, RouterError> {
        self.note_poll(device)?;
        let events = self.drain(device)?;
        if !events.is_empty() || budget.is_zero() {
            return Ok(events);
        }
        // Nothing pending: wait out the budget, then take one more look in
        // case something arrived meanwhile.
        sleep(budget).await;
        self.drain(device)
    }
}
