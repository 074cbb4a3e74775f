use crate::models::IbPort;

pub const REASON_SWITCH_FAULT: &str = "ib switch fault, all ports down";

/// Every reported port being unhealthy points at the switch rather than at
/// individual cables or adapters.
pub fn evaluate_switch_fault(
    unhealthy_ports: &[IbPort],
    total_port_count: usize,
) -> Option<String> {
    if unhealthy_ports.is_empty() || total_port_count == 0 {
        return None;
    }
    (unhealthy_ports.len() == total_port_count).then(|| REASON_SWITCH_FAULT.to_string())
}
