//! End-to-end scenarios for the delivery-verification harness, driven
//! against the in-process loopback routing service.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use sigvec_harness::error::{exit_code, HarnessError};
use sigvec_harness::harness::{Harness, HarnessConfig, TERMINATE_ITERATIONS};
use sigvec_harness::interrupt::CancelToken;
use sigvec_harness::loopback::{LoopbackConfig, LoopbackRouter};
use sigvec_harness::router::{
    DeliveryEvent, DeviceId, MapId, RouterError, RoutingService, SignalId, SignalSpec,
    TimestampPolicy,
};

/// Fast+terminate configuration: period 1 ms, 50 iterations.
fn fast_terminate_config() -> HarnessConfig {
    HarnessConfig {
        period: Duration::from_millis(1),
        iterations: Some(TERMINATE_ITERATIONS),
        ready_poll: Duration::from_millis(1),
        map_poll: Duration::from_millis(1),
        ..Default::default()
    }
}

#[tokio::test]
async fn scenario_a_reliable_run_delivers_everything() -> Result<()> {
    let router = LoopbackRouter::new(LoopbackConfig::default());
    let probe = router.clone();
    let mut harness = Harness::new(router, fast_terminate_config(), CancelToken::new());

    let outcome = harness.run().await;
    let report = outcome.as_ref().expect("reliable run should pass");
    assert_eq!(report.sent, 50);
    assert_eq!(report.received, 50);
    assert!(!report.cancelled);
    assert_eq!(exit_code(&outcome), 0);

    // Both devices torn down exactly once, and no update was issued while
    // the map was still negotiating.
    let mut destroys = probe.all_destroy_calls();
    destroys.sort_unstable();
    assert_eq!(destroys, vec![1, 1]);
    assert_eq!(probe.live_devices(), 0);
    assert!(!probe.premature_update_issued());
    Ok(())
}

#[tokio::test]
async fn scenario_b_total_delivery_loss_reports_mismatch() -> Result<()> {
    let router = LoopbackRouter::new(LoopbackConfig {
        drop_updates: true,
        ..Default::default()
    });
    let probe = router.clone();
    let mut harness = Harness::new(router, fast_terminate_config(), CancelToken::new());

    let outcome = harness.run().await;
    match &outcome {
        Err(HarnessError::DeliveryMismatch { sent, received }) => {
            assert_eq!(*sent, 50);
            assert_eq!(*received, 0);
        }
        other => panic!("expected delivery mismatch, got {other:?}"),
    }
    assert_eq!(exit_code(&outcome), 1);
    assert_eq!(probe.live_devices(), 0);
    Ok(())
}

/// Delegating router that cancels the token once a given number of valued
/// updates have been delivered, so cancellation lands at a deterministic
/// iteration boundary.
struct CancelAfterDeliveries {
    inner: LoopbackRouter,
    token: CancelToken,
    remaining: u64,
}

#[async_trait]
impl RoutingService for CancelAfterDeliveries {
    fn create_device(&mut self, name: &str) -> Result<DeviceId, RouterError> {
        self.inner.create_device(name)
    }

    fn create_signal(
        &mut self,
        device: DeviceId,
        spec: SignalSpec,
    ) -> Result<SignalId, RouterError> {
        self.inner.create_signal(device, spec)
    }

    fn destroy_device(&mut self, device: DeviceId) {
        self.inner.destroy_device(device);
    }

    fn device_is_ready(&self, device: DeviceId) -> bool {
        self.inner.device_is_ready(device)
    }

    fn create_map(
        &mut self,
        sources: &[SignalId],
        destinations: &[SignalId],
    ) -> Result<MapId, RouterError> {
        self.inner.create_map(sources, destinations)
    }

    fn submit_map(&mut self, map: MapId) -> Result<(), RouterError> {
        self.inner.submit_map(map)
    }

    fn map_is_ready(&self, map: MapId) -> bool {
        self.inner.map_is_ready(map)
    }

    fn set_value(
        &mut self,
        signal: SignalId,
        instance: u64,
        value: &[f32],
        policy: TimestampPolicy,
    ) -> Result<(), RouterError> {
        self.inner.set_value(signal, instance, value, policy)
    }

    async fn poll(
        &mut self,
        device: DeviceId,
        budget: Duration,
    ) -> Result<Vec<DeliveryEvent>, RouterError> {
        let events = self.inner.poll(device, budget).await?;
        let delivered = events.iter().filter(|e| e.value.is_some()).count() as u64;
        if delivered > 0 && self.remaining > 0 {
            self.remaining = self.remaining.saturating_sub(delivered);
            if self.remaining == 0 {
                self.token.cancel();
            }
        }
        Ok(events)
    }
}

#[tokio::test]
async fn scenario_c_interrupt_exits_at_the_next_iteration_boundary() -> Result<()> {
    let k = 7;
    let inner = LoopbackRouter::new(LoopbackConfig::default());
    let probe = inner.clone();
    let token = CancelToken::new();
    let router = CancelAfterDeliveries {
        inner,
        token: token.clone(),
        remaining: k,
    };
    let mut harness = Harness::new(router, fast_terminate_config(), token);

    let outcome = harness.run().await;
    let report = outcome.as_ref().expect("counts are equal at cancellation");
    assert_eq!(report.sent, k);
    assert_eq!(report.received, k);
    assert!(report.cancelled);
    assert_eq!(exit_code(&outcome), 0);

    let mut destroys = probe.all_destroy_calls();
    destroys.sort_unstable();
    assert_eq!(destroys, vec![1, 1]);
    Ok(())
}

#[tokio::test]
async fn scenario_d_map_negotiation_timeout_skips_the_exchange() -> Result<()> {
    let router = LoopbackRouter::new(LoopbackConfig {
        map_ready_after_polls: None,
        ..Default::default()
    });
    let probe = router.clone();
    let mut harness = Harness::new(router, fast_terminate_config(), CancelToken::new());

    let outcome = harness.run().await;
    match &outcome {
        Err(HarnessError::MapTimeout { attempts }) => assert_eq!(*attempts, 100),
        other => panic!("expected map timeout, got {other:?}"),
    }
    assert_eq!(exit_code(&outcome), 1);
    assert_eq!(harness.sent(), 0);
    assert_eq!(harness.received(), 0);
    assert_eq!(probe.live_devices(), 0);
    Ok(())
}

#[tokio::test]
async fn cancellation_before_readiness_exits_cleanly() -> Result<()> {
    let router = LoopbackRouter::new(LoopbackConfig {
        ready_after_polls: 1000,
        ..Default::default()
    });
    let probe = router.clone();
    let token = CancelToken::new();
    token.cancel();
    let mut harness = Harness::new(router, fast_terminate_config(), token);

    let outcome = harness.run().await;
    let report = outcome.as_ref().expect("0 == 0 verifies clean");
    assert_eq!(report.sent, 0);
    assert_eq!(report.received, 0);
    assert!(report.cancelled);

    let mut destroys = probe.all_destroy_calls();
    destroys.sort_unstable();
    assert_eq!(destroys, vec![1, 1]);
    Ok(())
}

#[tokio::test]
async fn opt_in_readiness_bound_times_out() -> Result<()> {
    let router = LoopbackRouter::new(LoopbackConfig {
        ready_after_polls: 1000,
        ..Default::default()
    });
    let config = HarnessConfig {
        ready_timeout: Some(Duration::from_millis(30)),
        ready_poll: Duration::from_millis(5),
        ..fast_terminate_config()
    };
    let mut harness = Harness::new(router, config, CancelToken::new());

    let outcome = harness.run().await;
    match &outcome {
        Err(HarnessError::ReadinessTimeout { timeout }) => {
            assert_eq!(*timeout, Duration::from_millis(30));
        }
        other => panic!("expected readiness timeout, got {other:?}"),
    }
    assert_eq!(exit_code(&outcome), 1);
    Ok(())
}

#[tokio::test]
async fn setup_failure_exits_with_code_one_before_the_loop() -> Result<()> {
    let router = LoopbackRouter::new(LoopbackConfig {
        fail_creation: true,
        ..Default::default()
    });
    let mut harness = Harness::new(router, fast_terminate_config(), CancelToken::new());

    let outcome = harness.run().await;
    assert!(matches!(outcome, Err(HarnessError::Creation { .. })));
    assert_eq!(exit_code(&outcome), 1);
    assert_eq!(harness.sent(), 0);
    Ok(())
}

#[tokio::test]
async fn slower_negotiation_still_completes_within_the_bound() -> Result<()> {
    // Negotiation needs 40 endpoint polls; each attempt contributes two.
    let router = LoopbackRouter::new(LoopbackConfig {
        map_ready_after_polls: Some(40),
        ..Default::default()
    });
    let probe = router.clone();
    let mut harness = Harness::new(router, fast_terminate_config(), CancelToken::new());

    let report = harness.run().await.expect("map becomes ready in time");
    assert_eq!(report.sent, 50);
    assert_eq!(report.received, 50);
    assert!(!probe.premature_update_issued());
    Ok(())
}
