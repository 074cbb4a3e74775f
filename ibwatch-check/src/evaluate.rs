use crate::models::IbPort;

/// Returned when fewer ports than expected are active at the expected rate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("only {healthy} port(s) are active and >={at_least_rate} Gb/s, expect >={at_least_ports} port(s)")]
pub struct PolicyViolation {
    pub healthy: usize,
    pub at_least_ports: usize,
    pub at_least_rate: u64,
    /// Ports that are not active or below the expected rate.
    pub unhealthy: Vec<IbPort>,
}

/// A port counts as healthy when its link is active and its rate is at least
/// `at_least_rate`. Fails when fewer than `at_least_ports` ports are healthy.
pub fn evaluate_ports_and_rate(
    ports: &[IbPort],
    at_least_ports: usize,
    at_least_rate: u64,
) -> Result<(), PolicyViolation> {
    let (healthy, unhealthy): (Vec<&IbPort>, Vec<&IbPort>) = ports
        .iter()
        .partition(|p| p.state.is_active() && p.rate >= at_least_rate);

    if healthy.len() >= at_least_ports {
        return Ok(());
    }

    Err(PolicyViolation {
        healthy: healthy.len(),
        at_least_ports,
        at_least_rate,
        unhealthy: unhealthy.into_iter().cloned().collect(),
    })
}
