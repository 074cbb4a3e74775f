//! The verdict of one check cycle.

use crate::health::{HealthState, HealthStateType, SuggestedActions};
use crate::models::{IbPort, SourceOutput};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

pub const EXTRA_INFO_DATA: &str = "data";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub ts: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ibstat_output: Option<SourceOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ibstatus_output: Option<SourceOutput>,

    /// InfiniBand ports that were evaluated.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub all_ports: Vec<IbPort>,
    /// Ports reported by the trusted source, all link layers included.
    pub total_port_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unhealthy_ports: Vec<IbPort>,

    pub health: HealthStateType,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_switch_fault: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_port_drop: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_port_flap: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_actions: Option<SuggestedActions>,

    /// Primary source or store error. Surfaced in the health record.
    #[serde(skip)]
    pub error: Option<String>,
    /// Fallback source error. Informational only.
    #[serde(skip)]
    pub error_ibstatus: Option<String>,
}

impl CheckResult {
    pub fn new(ts: DateTime<Utc>) -> Self {
        Self {
            ts,
            ibstat_output: None,
            ibstatus_output: None,
            all_ports: Vec::new(),
            total_port_count: 0,
            unhealthy_ports: Vec::new(),
            health: HealthStateType::Healthy,
            reason: String::new(),
            reason_switch_fault: None,
            reason_port_drop: None,
            reason_port_flap: None,
            suggested_actions: None,
            error: None,
            error_ibstatus: None,
        }
    }

    pub(crate) fn skip(ts: DateTime<Utc>, reason: impl Into<String>) -> Self {
        let mut cr = Self::new(ts);
        cr.reason = reason.into();
        cr
    }

    pub fn is_healthy(&self) -> bool {
        self.health == HealthStateType::Healthy
    }

    /// Base reason followed by switch-fault, drop and flap reasons, in that
    /// order, joined with `"; "`.
    pub fn summary(&self) -> String {
        std::iter::once(self.reason.as_str())
            .chain(self.reason_switch_fault.as_deref())
            .chain(self.reason_port_drop.as_deref())
            .chain(self.reason_port_flap.as_deref())
            .filter(|r| !r.is_empty())
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn health_states(&self, component: &str) -> Vec<HealthState> {
        let mut extra_info = BTreeMap::new();
        if self.ibstat_output.is_some() {
            if let Ok(data) = serde_json::to_string(self) {
                extra_info.insert(EXTRA_INFO_DATA.to_string(), data);
            }
        }

        vec![HealthState {
            time: self.ts,
            component: component.to_string(),
            name: component.to_string(),
            health: self.health,
            reason: self.summary(),
            error: self.error.clone().unwrap_or_default(),
            suggested_actions: self.suggested_actions.clone(),
            extra_info,
        }]
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources = [
            ("ibstat", self.ibstat_output.as_ref()),
            ("ibstatus", self.ibstatus_output.as_ref()),
        ];
        if sources.iter().all(|(_, out)| out.is_none()) {
            return f.write_str("no data");
        }

        writeln!(
            f,
            "{:<10} {:<12} {:<14} {:<16} {:>6}  {}",
            "SOURCE", "DEVICE", "STATE", "PHYSICAL STATE", "RATE", "LINK LAYER"
        )?;
        for (source, out) in sources {
            let Some(out) = out else { continue };
            for p in &out.ports {
                writeln!(
                    f,
                    "{:<10} {:<12} {:<14} {:<16} {:>6}  {}",
                    source,
                    p.device,
                    p.state.as_str(),
                    p.physical_state,
                    p.rate,
                    p.link_layer
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LinkState;

    #[test]
    fn test_summary_order() {
        let mut cr = CheckResult::new(Utc::now());
        cr.reason = "only 0 port(s) are active".into();
        cr.reason_port_flap = Some("ib port flap -- mlx5_0 Down -> Active".into());
        cr.reason_switch_fault = Some("ib switch fault, all ports down".into());
        cr.reason_port_drop = Some("ib port drop -- mlx5_1 dropped 5 minutes ago".into());

        assert_eq!(
            cr.summary(),
            "only 0 port(s) are active; ib switch fault, all ports down; \
             ib port drop -- mlx5_1 dropped 5 minutes ago; ib port flap -- mlx5_0 Down -> Active"
        );
    }

    #[test]
    fn test_summary_without_temporal_reasons() {
        let cr = CheckResult::skip(Utc::now(), "ports or rate threshold not set, skipping");
        assert_eq!(cr.summary(), "ports or rate threshold not set, skipping");
    }

    #[test]
    fn test_health_state_data_only_with_primary_output() {
        let mut cr = CheckResult::skip(Utc::now(), "x");
        cr.ibstatus_output = Some(SourceOutput::default());
        cr.error = Some("ibstat exited with code Some(255)".into());
        cr.error_ibstatus = Some("ibstatus timed out".into());

        let hs = cr.health_states("accelerator-nvidia-infiniband").remove(0);
        assert!(hs.extra_info.is_empty());
        assert_eq!(hs.error, "ibstat exited with code Some(255)");

        let active = IbPort::new("mlx5_0", LinkState::Active, 400);
        cr.ibstat_output = Some(SourceOutput::new(vec![active]));
        let hs = cr.health_states("accelerator-nvidia-infiniband").remove(0);
        let data: serde_json::Value =
            serde_json::from_str(&hs.extra_info[EXTRA_INFO_DATA]).unwrap();
        assert_eq!(data["ibstat_output"]["ports"][0]["device"], "mlx5_0");
        assert!(data.get("error").is_none());
    }

    #[test]
    fn test_display_table() {
        let cr = CheckResult::new(Utc::now());
        assert_eq!(cr.to_string(), "no data");

        let mut port = IbPort::new("mlx5_0", LinkState::Active, 400);
        port.physical_state = "LinkUp".into();
        port.link_layer = "InfiniBand".into();
        let mut cr = CheckResult::new(Utc::now());
        cr.ibstat_output = Some(SourceOutput::new(vec![port]));

        let table = cr.to_string();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("SOURCE"));
        assert!(lines[1].starts_with("ibstat "));
        assert!(lines[1].contains("mlx5_0"));
        assert!(lines[1].contains("LinkUp"));
        assert!(lines[1].contains("400"));
    }
}
