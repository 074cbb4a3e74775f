/*!
Test harness for the InfiniBand check

Wires an [`InfinibandComponent`] to stub sources, stub instrumentation and a
[`FailingStore`], and runs cycles at timestamps relative to a fixed start.
*/

use crate::source_stub::{StubInstrumentation, StubSource};
use crate::store_stub::FailingStore;
use chrono::{DateTime, Duration, TimeZone, Utc};
use ibwatch_check::{
    CheckConfig, CheckResult, DedupMode, ExpectedPortStates, IbPort, InfinibandComponent,
};
use std::sync::Arc;
use tracing::info;

pub struct TestHarness {
    pub component: InfinibandComponent,
    pub ibstat: StubSource,
    pub ibstatus: StubSource,
    pub instrumentation: StubInstrumentation,
    pub store: Arc<FailingStore>,
    start: DateTime<Utc>,
}

impl TestHarness {
    /// Harness with the given policy and the default (exact-timestamp) dedup.
    pub fn new(at_least_ports: usize, at_least_rate: u64) -> Self {
        Self::with_config(CheckConfig {
            thresholds: ExpectedPortStates {
                at_least_ports,
                at_least_rate,
            },
            ..CheckConfig::default()
        })
    }

    pub fn with_dedup(at_least_ports: usize, at_least_rate: u64, dedup: DedupMode) -> Self {
        let mut harness = Self::new(at_least_ports, at_least_rate);
        harness.component = Self::build(
            CheckConfig {
                thresholds: harness.component.expected_port_states(),
                dedup,
                ..CheckConfig::default()
            },
            &harness.ibstat,
            &harness.ibstatus,
            &harness.instrumentation,
            &harness.store,
        );
        harness
    }

    pub fn with_config(config: CheckConfig) -> Self {
        init_logging();

        let ibstat = StubSource::ibstat();
        let ibstatus = StubSource::ibstatus();
        let instrumentation = StubInstrumentation::present();
        let store = Arc::new(FailingStore::new());
        let component = Self::build(config, &ibstat, &ibstatus, &instrumentation, &store);

        Self {
            component,
            ibstat,
            ibstatus,
            instrumentation,
            store,
            start: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).single().unwrap_or_else(Utc::now),
        }
    }

    fn build(
        config: CheckConfig,
        ibstat: &StubSource,
        ibstatus: &StubSource,
        instrumentation: &StubInstrumentation,
        store: &Arc<FailingStore>,
    ) -> InfinibandComponent {
        InfinibandComponent::new(config)
            .with_instrumentation(Arc::new(instrumentation.clone()))
            .with_sources(Arc::new(ibstat.clone()), Arc::new(ibstatus.clone()))
            .with_event_store(store.clone())
    }

    /// Timestamp `minutes` after the harness start.
    pub fn at(&self, minutes: i64) -> DateTime<Utc> {
        self.start + Duration::minutes(minutes)
    }

    /// Sets what `ibstat` reports from now on.
    pub fn ibstat_ports(&self, ports: Vec<IbPort>) {
        self.ibstat.set_ports(ports);
    }

    /// Runs one cycle at `minutes` after the start.
    pub async fn cycle(&self, minutes: i64) -> Arc<CheckResult> {
        self.cycle_at(self.at(minutes)).await
    }

    pub async fn cycle_at(&self, ts: DateTime<Utc>) -> Arc<CheckResult> {
        let result = self.component.check_at(ts).await;
        info!(ts = %ts, health = ?result.health, reason = %result.summary(), "test cycle");
        result
    }
}

/// Logs to the test writer, filtered by `RUST_LOG`.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::port;
    use ibwatch_check::LinkState;

    #[tokio::test]
    async fn test_harness_cycle() {
        let harness = TestHarness::new(1, 400);
        harness.ibstat_ports(vec![port("mlx5_0", LinkState::Active, 400)]);

        let cr = harness.cycle(0).await;
        assert!(cr.is_healthy());
        assert_eq!(cr.ts, harness.at(0));
        assert_eq!(harness.store.len(), 1);
        assert_eq!(harness.ibstat.call_count(), 1);
        assert_eq!(harness.ibstatus.call_count(), 1);
    }
}
