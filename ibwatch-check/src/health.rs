use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthStateType {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepairActionType {
    HardwareInspection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedActions {
    pub repair_actions: Vec<RepairActionType>,
}

impl SuggestedActions {
    pub fn hardware_inspection() -> Self {
        Self {
            repair_actions: vec![RepairActionType::HardwareInspection],
        }
    }
}

/// Health record exposed to the enclosing agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthState {
    pub time: DateTime<Utc>,
    pub component: String,
    pub name: String,
    pub health: HealthStateType,
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_actions: Option<SuggestedActions>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_info: BTreeMap<String, String>,
}

impl HealthState {
    /// Returned before the first cycle has completed.
    pub fn no_data(component: &str) -> Self {
        Self {
            time: Utc::now(),
            component: component.to_string(),
            name: component.to_string(),
            health: HealthStateType::Healthy,
            reason: "no data yet".to_string(),
            error: String::new(),
            suggested_actions: None,
            extra_info: BTreeMap::new(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health == HealthStateType::Healthy
    }
}
