//! The InfiniBand check component and its background loop.

use crate::analyze::{evaluate_port_drop, evaluate_port_flap, evaluate_switch_fault, lookback};
use crate::config::CheckConfig;
use crate::evaluate::evaluate_ports_and_rate;
use crate::eventstore::{Event, EventStore, EventType, StoreError};
use crate::health::{HealthState, HealthStateType, SuggestedActions};
use crate::models::ExpectedPortStates;
use crate::record::{read_ibstat_events, record_event, to_ibstat_event, EVENT_NAME_IBSTAT};
use crate::result::CheckResult;
use crate::source::{acquire, PortSource};
use crate::state::LatestSlot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const NAME: &str = "accelerator-nvidia-infiniband";

pub const REASON_THRESHOLD_NOT_SET: &str = "ports or rate threshold not set, skipping";
pub const REASON_NO_INSTRUMENTATION: &str = "NVIDIA instrumentation is not configured";
pub const REASON_NO_SOURCES: &str = "ibstat checker not found";
pub const REASON_NOT_INSTALLED: &str = "ibstat command not found";
pub const REASON_COMMAND_FAILED: &str = "ibstat command failed";
pub const REASON_MISSING_EVENT_STORE: &str = "missing event storage (skipped evaluation)";
pub const REASON_MISSING_OUTPUT: &str = "missing ibstat/ibstatus output (skipped evaluation)";
pub const REASON_NO_ISSUE: &str = "no infiniband issue found (in ibstat/ibstatus)";

/// Hardware and driver presence the check depends on.
pub trait Instrumentation: Send + Sync {
    /// `None` when everything is in place, otherwise why the check is skipped.
    fn missing_reason(&self) -> Option<String>;
}

/// A health check driven by the enclosing agent.
#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    fn tags(&self) -> Vec<String>;

    fn is_supported(&self) -> bool;

    /// Starts the periodic loop. Must be called within a tokio runtime.
    fn start(&self);

    /// Runs one cycle now and publishes its verdict. Waits for a cycle of
    /// the background loop that is already running.
    async fn check(&self) -> Vec<HealthState>;

    fn last_health_states(&self) -> Vec<HealthState>;

    fn events(&self, since: DateTime<Utc>) -> Result<Vec<Event>, StoreError>;

    /// Stops the loop and waits for it to exit.
    async fn close(&self);
}

#[derive(Clone)]
pub struct InfinibandComponent {
    config: CheckConfig,
    cancel: CancellationToken,
    thresholds: Arc<RwLock<ExpectedPortStates>>,
    instrumentation: Option<Arc<dyn Instrumentation>>,
    ibstat: Option<Arc<dyn PortSource>>,
    ibstatus: Option<Arc<dyn PortSource>>,
    store: Option<Arc<dyn EventStore>>,
    last: Arc<LatestSlot<CheckResult>>,
    /// Held for a whole cycle so the loop and on-demand checks take turns.
    cycle: Arc<tokio::sync::Mutex<()>>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl InfinibandComponent {
    pub fn new(config: CheckConfig) -> Self {
        let thresholds = Arc::new(RwLock::new(config.thresholds));
        Self {
            config,
            cancel: CancellationToken::new(),
            thresholds,
            instrumentation: None,
            ibstat: None,
            ibstatus: None,
            store: None,
            last: Arc::new(LatestSlot::new()),
            cycle: Arc::new(tokio::sync::Mutex::new(())),
            handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_instrumentation(mut self, instrumentation: Arc<dyn Instrumentation>) -> Self {
        self.instrumentation = Some(instrumentation);
        self
    }

    pub fn with_sources(
        mut self,
        ibstat: Arc<dyn PortSource>,
        ibstatus: Arc<dyn PortSource>,
    ) -> Self {
        self.ibstat = Some(ibstat);
        self.ibstatus = Some(ibstatus);
        self
    }

    pub fn with_event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Cancels in-flight tool invocations and the loop when `parent` is.
    pub fn with_parent_cancel(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Replaces the policy used from the next cycle on.
    pub fn set_expected_port_states(&self, thresholds: ExpectedPortStates) {
        info!(
            at_least_ports = thresholds.at_least_ports,
            at_least_rate = thresholds.at_least_rate,
            "setting expected port states"
        );
        *self.thresholds.write() = thresholds;
    }

    pub fn expected_port_states(&self) -> ExpectedPortStates {
        *self.thresholds.read()
    }

    pub fn last_check_result(&self) -> Option<Arc<CheckResult>> {
        self.last.load()
    }

    /// Runs one cycle as if the clock read `ts`, then publishes the result.
    /// Cycles never overlap: a call made while another cycle is running
    /// waits for it to publish first.
    pub async fn check_at(&self, ts: DateTime<Utc>) -> Arc<CheckResult> {
        let _turn = self.cycle.lock().await;
        info!("checking nvidia infiniband");
        let result = Arc::new(self.run_cycle(ts).await);
        self.last.publish(result.clone());
        result
    }

    async fn run_cycle(&self, ts: DateTime<Utc>) -> CheckResult {
        let thresholds = self.expected_port_states();
        if thresholds.is_zero() {
            return CheckResult::skip(ts, REASON_THRESHOLD_NOT_SET);
        }

        let Some(instrumentation) = &self.instrumentation else {
            return CheckResult::skip(ts, REASON_NO_INSTRUMENTATION);
        };
        if let Some(reason) = instrumentation.missing_reason() {
            return CheckResult::skip(ts, reason);
        }

        let (Some(ibstat), Some(ibstatus)) = (&self.ibstat, &self.ibstatus) else {
            return CheckResult::skip(ts, REASON_NO_SOURCES);
        };

        let overrides = &self.config.tool_overrides;
        let acq = acquire(
            ibstat.as_ref(),
            ibstatus.as_ref(),
            &overrides.ibstat_command,
            &overrides.ibstatus_command,
            self.config.command_timeout,
            &self.cancel,
        )
        .await;
        let snapshot = acq.snapshot(ts);

        let mut cr = CheckResult::new(ts);
        cr.ibstat_output = acq.ibstat.output.clone();
        cr.ibstatus_output = acq.ibstatus.output.clone();
        cr.error_ibstatus = acq.ibstatus.error.as_ref().map(|e| e.to_string());
        cr.total_port_count = snapshot.total_port_count;
        cr.all_ports = snapshot.ports;

        if let Some(err) = &acq.ibstat.error {
            if err.is_not_installed() {
                if cr.all_ports.is_empty() {
                    cr.reason = REASON_NOT_INSTALLED.to_string();
                    return cr;
                }
                debug!(error = %err, "ibstat not installed, evaluating ibstatus ports");
            } else {
                error!(error = %err, "ibstat command failed");
                cr.health = HealthStateType::Unhealthy;
                cr.reason = REASON_COMMAND_FAILED.to_string();
                cr.error = snapshot.source_error;
            }
        }

        // one-off scans run without history
        let Some(store) = &self.store else {
            cr.health = HealthStateType::Healthy;
            cr.reason = REASON_MISSING_EVENT_STORE.to_string();
            return cr;
        };

        evaluate_thresholds(&mut cr, thresholds);

        // healthy ports are recorded too, drop and flap need the full history
        let event = to_ibstat_event(ts, &cr.all_ports, &cr.unhealthy_ports, &cr.reason);
        if let Err(e) = record_event(store.as_ref(), &event, self.config.dedup) {
            error!(error = %e.store_error(), "{}", e.reason());
            cr.health = HealthStateType::Unhealthy;
            cr.reason = e.reason().to_string();
            cr.error = Some(e.store_error().to_string());
            return cr;
        }

        let unhealthy = !cr.is_healthy();
        if unhealthy {
            cr.reason_switch_fault =
                evaluate_switch_fault(&cr.unhealthy_ports, cr.total_port_count);
        }

        let history = match ts.checked_sub_signed(lookback()) {
            Some(since) => read_ibstat_events(store.as_ref(), since).unwrap_or_else(|e| {
                error!(error = %e, "error reading ibstat events");
                Vec::new()
            }),
            None => Vec::new(),
        };
        if unhealthy {
            cr.reason_port_drop = evaluate_port_drop(ts, &history);
        }
        cr.reason_port_flap = evaluate_port_flap(ts, &history);

        cr
    }

    async fn run_loop(self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("infiniband check loop stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let cr = self.check_at(Utc::now()).await;
            debug!(health = ?cr.health, reason = %cr.summary(), "infiniband check complete");
        }
    }
}

/// Applies the policy to the evaluated ports. A primary error is dropped when
/// the ports it came with satisfy the policy. Without any ports the verdict is
/// healthy and a primary error is only kept for the health record.
fn evaluate_thresholds(cr: &mut CheckResult, thresholds: ExpectedPortStates) {
    if cr.all_ports.is_empty() {
        error!(error = ?cr.error, "missing ibstat/ibstatus output");
        cr.health = HealthStateType::Healthy;
        cr.reason = REASON_MISSING_OUTPUT.to_string();
        return;
    }

    let verdict = evaluate_ports_and_rate(
        &cr.all_ports,
        thresholds.at_least_ports,
        thresholds.at_least_rate,
    );
    match verdict {
        Err(violation) => {
            cr.health = HealthStateType::Unhealthy;
            cr.reason = violation.to_string();
            cr.suggested_actions = Some(SuggestedActions::hardware_inspection());
            cr.unhealthy_ports = violation.unhealthy;
        }
        Ok(()) => {
            cr.health = HealthStateType::Healthy;
            cr.reason = REASON_NO_ISSUE.to_string();
            if let Some(err) = cr.error.take() {
                debug!(error = %err, "ibstat command returned partial output, discarding error");
            }
        }
    }
}

#[async_trait]
impl Component for InfinibandComponent {
    fn name(&self) -> &str {
        NAME
    }

    fn tags(&self) -> Vec<String> {
        ["accelerator", "gpu", "nvidia", "infiniband", NAME]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn is_supported(&self) -> bool {
        match &self.instrumentation {
            Some(inst) => inst.missing_reason().is_none(),
            None => false,
        }
    }

    fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            warn!("infiniband check loop already started");
            return;
        }
        *handle = Some(tokio::spawn(self.clone().run_loop()));
    }

    async fn check(&self) -> Vec<HealthState> {
        self.check_at(Utc::now()).await.health_states(NAME)
    }

    fn last_health_states(&self) -> Vec<HealthState> {
        match self.last.load() {
            Some(cr) => cr.health_states(NAME),
            None => vec![HealthState::no_data(NAME)],
        }
    }

    fn events(&self, since: DateTime<Utc>) -> Result<Vec<Event>, StoreError> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };
        Ok(store
            .get(since)?
            .into_iter()
            // per-cycle snapshots are internal bookkeeping
            .filter(|ev| !(ev.name == EVENT_NAME_IBSTAT && ev.event_type == EventType::Info))
            .collect())
    }

    async fn close(&self) {
        info!("closing infiniband check");
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "infiniband check loop ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventstore::JsonEventStore;
    use crate::models::{IbPort, LinkState, SourceOutput};
    use crate::source::{SourceError, SourceResult};
    use std::time::Duration;

    struct Present;

    impl Instrumentation for Present {
        fn missing_reason(&self) -> Option<String> {
            None
        }
    }

    struct Absent;

    impl Instrumentation for Absent {
        fn missing_reason(&self) -> Option<String> {
            Some("no infiniband class devices found".into())
        }
    }

    struct Fixed(&'static str, SourceResult);

    #[async_trait]
    impl PortSource for Fixed {
        fn command_name(&self) -> &str {
            self.0
        }

        async fn query(&self, _timeout: Duration, _command_override: &str) -> SourceResult {
            self.1.clone()
        }
    }

    fn policy(ports: usize, rate: u64) -> CheckConfig {
        CheckConfig {
            thresholds: ExpectedPortStates { at_least_ports: ports, at_least_rate: rate },
            ..CheckConfig::default()
        }
    }

    fn active(devs: &[&str]) -> SourceOutput {
        SourceOutput::new(devs.iter().map(|d| IbPort::new(*d, LinkState::Active, 400)).collect())
    }

    fn component(
        config: CheckConfig,
        ibstat: SourceResult,
        store: Arc<JsonEventStore>,
    ) -> InfinibandComponent {
        InfinibandComponent::new(config)
            .with_instrumentation(Arc::new(Present))
            .with_sources(
                Arc::new(Fixed("ibstat", ibstat)),
                Arc::new(Fixed("ibstatus", SourceResult::default())),
            )
            .with_event_store(store)
    }

    #[tokio::test]
    async fn test_disabled_policy_skips_everything() {
        let store = Arc::new(JsonEventStore::in_memory());
        let ibstat = SourceResult::ok(active(&["mlx5_0"]));
        let comp = component(CheckConfig::default(), ibstat, store.clone());

        let cr = comp.check_at(Utc::now()).await;
        assert!(cr.is_healthy());
        assert_eq!(cr.reason, REASON_THRESHOLD_NOT_SET);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_absent_instrumentation_skips() {
        let comp = InfinibandComponent::new(policy(1, 400)).with_instrumentation(Arc::new(Absent));
        let cr = comp.check_at(Utc::now()).await;
        assert!(cr.is_healthy());
        assert_eq!(cr.reason, "no infiniband class devices found");
        assert!(!comp.is_supported());
    }

    #[tokio::test]
    async fn test_missing_sources_skip() {
        let comp = InfinibandComponent::new(policy(1, 400)).with_instrumentation(Arc::new(Present));
        assert_eq!(comp.check_at(Utc::now()).await.reason, REASON_NO_SOURCES);
    }

    #[tokio::test]
    async fn test_missing_store_skips_after_invocation() {
        let comp = InfinibandComponent::new(policy(1, 400))
            .with_instrumentation(Arc::new(Present))
            .with_sources(
                Arc::new(Fixed("ibstat", SourceResult::ok(active(&["mlx5_0"])))),
                Arc::new(Fixed("ibstatus", SourceResult::default())),
            );
        let cr = comp.check_at(Utc::now()).await;
        assert_eq!(cr.reason, REASON_MISSING_EVENT_STORE);
        assert!(cr.ibstat_output.is_some());
    }

    #[tokio::test]
    async fn test_healthy_cycle_records_info_event() {
        let store = Arc::new(JsonEventStore::in_memory());
        let ibstat = SourceResult::ok(active(&["mlx5_0", "mlx5_1"]));
        let comp = component(policy(2, 400), ibstat, store.clone());

        let cr = comp.check_at(Utc::now()).await;
        assert!(cr.is_healthy());
        assert_eq!(cr.reason, REASON_NO_ISSUE);
        assert_eq!(store.len(), 1);
        // info snapshots are hidden
        assert!(comp.events(Utc::now() - chrono::Duration::hours(1)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_installed_is_a_skip() {
        let store = Arc::new(JsonEventStore::in_memory());
        let err = SourceError::NotInstalled { command: "ibstat".into() };
        let comp = component(policy(1, 400), SourceResult::err(err), store.clone());

        let cr = comp.check_at(Utc::now()).await;
        assert!(cr.is_healthy());
        assert_eq!(cr.reason, REASON_NOT_INSTALLED);
        assert!(cr.error.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_command_failure_without_ports_is_missing_output() {
        let store = Arc::new(JsonEventStore::in_memory());
        let err = SourceError::Failed {
            command: "ibstat".into(),
            code: Some(1),
            stderr: "boom".into(),
        };
        let comp = component(policy(1, 400), SourceResult::err(err), store.clone());

        let cr = comp.check_at(Utc::now()).await;
        assert!(cr.is_healthy());
        assert_eq!(cr.reason, REASON_MISSING_OUTPUT);
        assert!(cr.error.as_deref().unwrap().contains("boom"));
        assert!(cr.health_states(NAME)[0].error.contains("boom"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_timed_out_ibstat_stays_healthy() {
        let store = Arc::new(JsonEventStore::in_memory());
        let err = SourceError::Timeout {
            command: "ibstat".into(),
            timeout: Duration::from_secs(15),
        };
        let comp = component(policy(1, 400), SourceResult::err(err), store);

        for _ in 0..3 {
            let cr = comp.check_at(Utc::now()).await;
            assert!(cr.is_healthy());
            assert!(cr.error.as_deref().unwrap().contains("timed out"));
        }
    }

    #[tokio::test]
    async fn test_ethernet_ports_prevent_switch_fault() {
        let store = Arc::new(JsonEventStore::in_memory());
        let mut roce = IbPort::new("mlx5_4", LinkState::Active, 200);
        roce.link_layer = "Ethernet".into();
        let out = SourceOutput::new(vec![
            IbPort::new("mlx5_0", LinkState::Down, 0),
            IbPort::new("mlx5_1", LinkState::Down, 0),
            roce,
        ]);
        let comp = component(policy(2, 400), SourceResult::ok(out), store);

        let cr = comp.check_at(Utc::now()).await;
        assert!(!cr.is_healthy());
        assert_eq!(cr.all_ports.len(), 2);
        assert_eq!(cr.unhealthy_ports.len(), 2);
        assert_eq!(cr.total_port_count, 3);
        assert!(cr.reason_switch_fault.is_none());
    }

    struct Slow {
        in_flight: std::sync::atomic::AtomicUsize,
        max_in_flight: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl PortSource for Slow {
        fn command_name(&self) -> &str {
            "ibstat"
        }

        async fn query(&self, _timeout: Duration, _command_override: &str) -> SourceResult {
            use std::sync::atomic::Ordering;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            SourceResult::ok(active(&["mlx5_0"]))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_checks_take_turns() {
        let slow = Arc::new(Slow {
            in_flight: Default::default(),
            max_in_flight: Default::default(),
        });
        let comp = InfinibandComponent::new(policy(1, 400))
            .with_instrumentation(Arc::new(Present))
            .with_sources(slow.clone(), Arc::new(Fixed("ibstatus", SourceResult::default())))
            .with_event_store(Arc::new(JsonEventStore::in_memory()));

        let first = Utc::now();
        let second = first + chrono::Duration::seconds(30);
        let (a, b) = tokio::join!(comp.check_at(first), comp.check_at(second));

        assert!(a.is_healthy() && b.is_healthy());
        assert_eq!(slow.max_in_flight.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(comp.last_check_result().unwrap().ts, second);
    }

    #[tokio::test]
    async fn test_last_health_states_before_first_cycle() {
        let comp = InfinibandComponent::new(policy(1, 400));
        let states = comp.last_health_states();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].reason, "no data yet");
        assert_eq!(states[0].component, NAME);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_immediately_and_stops_on_close() {
        let store = Arc::new(JsonEventStore::in_memory());
        let comp = component(policy(1, 400), SourceResult::ok(active(&["mlx5_0"])), store);

        comp.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(comp.last_check_result().is_some());

        comp.close().await;
        assert!(comp.handle.lock().is_none());
    }

    #[tokio::test]
    async fn test_thresholds_update_applies_next_cycle() {
        let store = Arc::new(JsonEventStore::in_memory());
        let comp = component(policy(1, 400), SourceResult::ok(active(&["mlx5_0"])), store);
        assert!(comp.check_at(Utc::now()).await.is_healthy());

        comp.set_expected_port_states(ExpectedPortStates { at_least_ports: 2, at_least_rate: 400 });
        let cr = comp.check_at(Utc::now()).await;
        assert!(!cr.is_healthy());
        assert!(cr.suggested_actions.is_some());
    }
}
