use std::io::{self, Write};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::HarnessError;
use crate::interrupt::CancelToken;
use crate::router::{
    DeliveryEvent, DeviceId, Direction, RoutingService, SignalId, SignalSpec, SignalType,
    TimestampPolicy,
};

/// Iteration bound applied when terminate-after-N mode is requested.
pub const TERMINATE_ITERATIONS: u64 = 50;

/// Elements in every exchanged vector.
pub const VECTOR_LENGTH: usize = 3;

/// Upper bound on map-readiness polling attempts. This is the harness's only
/// timeout-protected phase; the readiness wait is unbounded unless an opt-in
/// timeout is configured.
const MAP_READY_ATTEMPTS: u32 = 100;

/// Configuration for one harness run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Name registered for the sending device
    pub source_name: String,
    /// Name registered for the receiving device
    pub destination_name: String,
    /// Destination poll budget per exchange iteration
    pub period: Duration,
    /// Stop the exchange loop after this many iterations; unbounded if None
    pub iterations: Option<u64>,
    /// Whether to negotiate a map between the two signals before exchanging
    pub autoconnect: bool,
    /// Per-device poll budget while waiting for readiness
    pub ready_poll: Duration,
    /// Per-device poll budget while waiting for map negotiation
    pub map_poll: Duration,
    /// Bound on map-readiness polling attempts
    pub map_attempts: u32,
    /// Optional bound on the readiness wait; unbounded if None
    pub ready_timeout: Option<Duration>,
    /// Print the compact sent/received progress line each iteration
    pub progress_line: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            source_name: "sigvec-send".to_string(),
            destination_name: "sigvec-recv".to_string(),
            period: Duration::from_millis(100),
            iterations: None,
            autoconnect: true,
            ready_poll: Duration::from_millis(25),
            map_poll: Duration::from_millis(10),
            map_attempts: MAP_READY_ATTEMPTS,
            ready_timeout: None,
            progress_line: false,
        }
    }
}

/// A device handle paired with the one signal the harness created on it.
#[derive(Debug, Clone, Copy)]
struct Endpoint {
    device: DeviceId,
    signal: SignalId,
}

/// Final counters of a completed (or cancelled) run that passed
/// verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub sent: u64,
    pub received: u64,
    pub cancelled: bool,
}

/// Drives one end-to-end verification run against a routing service.
///
/// Owns all run state explicitly (device handles, counters, cancellation
/// token) so independent runs never share anything. Phases execute in order:
/// lifecycle setup, readiness wait, map negotiation, exchange loop, then the
/// terminal sent/received reconciliation. Teardown runs on every exit path,
/// including setup failures and cancellation.
pub struct Harness<R: RoutingService> {
    router: R,
    config: HarnessConfig,
    cancel: CancelToken,
    /// Every device created, in creation order, for teardown.
    created: Vec<DeviceId>,
    sent: u64,
    received: u64,
}

impl<R: RoutingService> Harness<R> {
    pub fn new(router: R, config: HarnessConfig, cancel: CancelToken) -> Self {
        Self {
            router,
            config,
            cancel,
            created: Vec::new(),
            sent: 0,
            received: 0,
        }
    }

    /// Number of updates issued so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Number of valued updates the receive handler has observed so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Runs the full phase pipeline and always tears the devices down before
    /// returning. Setup failures skip straight past the exchange loop and
    /// the verifier; cancellation reaches the verifier like a normal
    /// completion.
    pub async fn run(&mut self) -> Result<RunReport, HarnessError> {
        let phases = self.run_phases().await;
        self.teardown();
        phases?;
        self.verify()
    }

    async fn run_phases(&mut self) -> Result<(), HarnessError> {
        let destination = self.setup_destination()?;
        let source = self.setup_source()?;
        self.wait_ready(&source, &destination).await?;
        if self.config.autoconnect {
            self.establish_map(&source, &destination).await?;
        }
        self.exchange(&source, &destination).await
    }

    /// Registers the receiving device and its 3-element float input signal.
    fn setup_destination(&mut self) -> Result<Endpoint, HarnessError> {
        let device = self
            .router
            .create_device(&self.config.destination_name)
            .map_err(|reason| HarnessError::Creation {
                endpoint: "destination",
                reason,
            })?;
        self.created.push(device);
        debug!("destination created");

        let spec = SignalSpec {
            name: "insig".to_string(),
            direction: Direction::Input,
            length: VECTOR_LENGTH,
            ty: SignalType::Float,
            unit: None,
            min: vec![0.0, 0.0, 0.0],
            max: vec![1.0, 1.0, 1.0],
            subscribe_updates: true,
        };
        let signal = self
            .router
            .create_signal(device, spec)
            .map_err(|reason| HarnessError::Creation {
                endpoint: "destination",
                reason,
            })?;
        debug!("input signal 'insig' registered");
        Ok(Endpoint { device, signal })
    }

    /// Registers the sending device and its 3-element float output signal.
    fn setup_source(&mut self) -> Result<Endpoint, HarnessError> {
        let device = self
            .router
            .create_device(&self.config.source_name)
            .map_err(|reason| HarnessError::Creation {
                endpoint: "source",
                reason,
            })?;
        self.created.push(device);
        debug!("source created");

        let spec = SignalSpec {
            name: "outsig".to_string(),
            direction: Direction::Output,
            length: VECTOR_LENGTH,
            ty: SignalType::Float,
            unit: None,
            min: vec![0.0, 0.0, 0.0],
            max: vec![1.0, 2.0, 3.0],
            subscribe_updates: false,
        };
        let signal = self
            .router
            .create_signal(device, spec)
            .map_err(|reason| HarnessError::Creation {
                endpoint: "source",
                reason,
            })?;
        debug!("output signal 'outsig' registered");
        Ok(Endpoint { device, signal })
    }

    /// Polls both devices until each reports ready. Unbounded unless a
    /// readiness timeout is configured; cancellation exits the wait without
    /// error.
    async fn wait_ready(
        &mut self,
        source: &Endpoint,
        destination: &Endpoint,
    ) -> Result<(), HarnessError> {
        let started = Instant::now();
        while !self.cancel.is_cancelled() {
            if self.router.device_is_ready(source.device)
                && self.router.device_is_ready(destination.device)
            {
                debug!("both devices ready");
                return Ok(());
            }
            if let Some(timeout) = self.config.ready_timeout {
                if started.elapsed() >= timeout {
                    return Err(HarnessError::ReadinessTimeout { timeout });
                }
            }
            let budget = self.config.ready_poll;
            self.router.poll(source.device, budget).await?;
            let events = self.router.poll(destination.device, budget).await?;
            self.dispatch(destination, events);
        }
        Ok(())
    }

    /// Builds a map from the output signal to the input signal, submits it,
    /// and polls both devices until the map is ready or the attempt bound is
    /// exhausted. Cancellation exits the phase without error, matching a
    /// run that is interrupted before negotiation completes.
    async fn establish_map(
        &mut self,
        source: &Endpoint,
        destination: &Endpoint,
    ) -> Result<(), HarnessError> {
        let map = self
            .router
            .create_map(&[source.signal], &[destination.signal])?;
        self.router.submit_map(map)?;
        info!("map submitted, waiting for negotiation");

        for attempt in 0..self.config.map_attempts {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            if self.router.map_is_ready(map) {
                debug!(attempt, "map ready");
                return Ok(());
            }
            self.router.poll(source.device, self.config.map_poll).await?;
            let events = self.router.poll(destination.device, self.config.map_poll).await?;
            self.dispatch(destination, events);
        }
        if self.router.map_is_ready(map) {
            return Ok(());
        }
        Err(HarnessError::MapTimeout {
            attempts: self.config.map_attempts,
        })
    }

    /// The timed send/receive loop. Each iteration drains the source
    /// non-blocking, issues one immediate-apply vector update, then polls
    /// the destination for the configured period so delivery and handler
    /// dispatch can happen. Exits on cancellation or, in terminate mode,
    /// once the iteration bound is reached.
    async fn exchange(
        &mut self,
        source: &Endpoint,
        destination: &Endpoint,
    ) -> Result<(), HarnessError> {
        info!("polling devices");
        let mut i: u64 = 0;
        loop {
            if self.cancel.is_cancelled() {
                debug!("cancelled, leaving exchange loop");
                break;
            }
            if let Some(bound) = self.config.iterations {
                if i >= bound {
                    break;
                }
            }

            self.router.poll(source.device, Duration::ZERO).await?;

            let value = [i as f32, (i + 1) as f32, (i + 2) as f32];
            debug!(iteration = i, ?value, "updating signal 'outsig'");
            self.router
                .set_value(source.signal, 0, &value, TimestampPolicy::ApplyNow)?;
            self.sent += 1;

            let events = self.router.poll(destination.device, self.config.period).await?;
            self.dispatch(destination, events);
            i += 1;

            if self.config.progress_line {
                print!("\r  Sent: {:4}, Received: {:4}   ", self.sent, self.received);
                io::stdout().flush().ok();
            }
        }
        Ok(())
    }

    /// Routes a poll's event batch to the receive handler. Only events for
    /// the destination's subscribed input signal are of interest.
    fn dispatch(&mut self, destination: &Endpoint, events: Vec<DeliveryEvent>) {
        for event in events {
            if event.signal == destination.signal {
                self.on_receive(&event);
            }
        }
    }

    /// Receive handler: one invocation conveys one arrived update. Events
    /// without a value are removed-instance notifications and do not count.
    fn on_receive(&mut self, event: &DeliveryEvent) {
        match &event.value {
            Some(value) => {
                debug!(instance = event.instance, ?value, "handler: got update");
                self.received += 1;
            }
            None => debug!(instance = event.instance, "handler: instance removed"),
        }
    }

    /// Terminal reconciliation: every issued update must have been received.
    fn verify(&self) -> Result<RunReport, HarnessError> {
        if self.sent == self.received {
            Ok(RunReport {
                sent: self.sent,
                received: self.received,
                cancelled: self.cancel.is_cancelled(),
            })
        } else {
            Err(HarnessError::DeliveryMismatch {
                sent: self.sent,
                received: self.received,
            })
        }
    }

    /// Destroys every created device, exactly once each, in creation order.
    fn teardown(&mut self) {
        for device in self.created.drain(..) {
            debug!(?device, "freeing device");
            self.router.destroy_device(device);
        }
    }
}
