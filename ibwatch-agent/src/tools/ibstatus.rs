//! Parser for `ibstatus` output.
//!
//! ```text
//! Infiniband device 'mlx5_0' port 1 status:
//!         state:           4: ACTIVE
//!         phys state:      5: LinkUp
//!         rate:            400 Gb/sec (4X NDR)
//!         link_layer:      InfiniBand
//! ```

use super::ibstat::parse_rate;
use ibwatch_check::{IbPort, LinkState};

/// One entry per device, taken from port 1. States are normalized to the
/// `ibstat` spelling (`ACTIVE` becomes `Active`).
pub fn parse_ibstatus(output: &str) -> Vec<IbPort> {
    let mut ports = Vec::new();
    let mut current: Option<IbPort> = None;

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("Infiniband device '") {
            ports.extend(current.take());
            let Some((device, tail)) = rest.split_once('\'') else {
                continue;
            };
            let port_num = tail
                .trim()
                .strip_prefix("port ")
                .and_then(|t| t.split_whitespace().next());
            if port_num == Some("1") {
                current = Some(IbPort::new(device, LinkState::Other(String::new()), 0));
            }
            continue;
        }

        let Some(port) = current.as_mut() else {
            continue;
        };
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "state" => port.state = LinkState::parse(strip_code(value)),
            "phys state" => port.physical_state = strip_code(value).to_string(),
            "rate" => port.rate = parse_rate(value),
            "link_layer" => port.link_layer = value.to_string(),
            _ => {}
        }
    }
    ports.extend(current);
    ports
}

/// `"4: ACTIVE"` -> `"ACTIVE"`.
fn strip_code(value: &str) -> &str {
    value.split_once(':').map(|(_, v)| v.trim()).unwrap_or(value)
}
