//! Parser for `ibstat` output.
//!
//! ```text
//! CA 'mlx5_0'
//!         CA type: MT4129
//!         Number of ports: 1
//!         Port 1:
//!                 State: Active
//!                 Physical state: LinkUp
//!                 Rate: 400
//!                 Link layer: InfiniBand
//! ```

use ibwatch_check::{IbPort, LinkState};

/// One entry per CA, taken from its first port.
pub fn parse_ibstat(output: &str) -> Vec<IbPort> {
    let mut ports = Vec::new();
    let mut current: Option<IbPort> = None;
    let mut in_port_one = false;

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("CA '") {
            ports.extend(current.take());
            let device = rest.trim_end_matches('\'');
            current = Some(IbPort::new(device, LinkState::Other(String::new()), 0));
            in_port_one = false;
            continue;
        }

        if let Some(num) = line.strip_prefix("Port ").and_then(|l| l.strip_suffix(':')) {
            in_port_one = num.trim() == "1";
            continue;
        }

        let (Some(port), true) = (current.as_mut(), in_port_one) else {
            continue;
        };
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "State" => port.state = LinkState::parse(value),
            "Physical state" => port.physical_state = value.to_string(),
            "Rate" => port.rate = parse_rate(value),
            "Link layer" => port.link_layer = value.to_string(),
            _ => {}
        }
    }
    ports.extend(current);
    ports
}

/// `"400"`, `"2.5"` or `"400 Gb/sec (4X NDR)"`, truncated to whole Gb/s.
pub(crate) fn parse_rate(value: &str) -> u64 {
    value
        .split_whitespace()
        .next()
        .and_then(|v| v.parse::<f64>().ok())
        .map(|r| r as u64)
        .unwrap_or(0)
}
