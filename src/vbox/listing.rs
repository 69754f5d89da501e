//! Parsers for VBoxManage list output.
//!
//! Both parsers follow the layout printed by VBoxManage 6.x exactly. Any
//! change in that layout should only need changes here.

use super::network::Network;
use super::trim_quotes;
use crate::error::{Error, Result};

/// Offset of the value in a `natnetwork list` field line. Every label is
/// padded to this width, e.g. `"Name:        "`.
pub const FIELD_VALUE_OFFSET: usize = 13;

/// Lines per network stanza in `natnetwork list` output, including the two
/// blank separator lines.
pub const NETWORK_STANZA_LINES: usize = 7;

/// Label of the first line of a network stanza.
const NAME_LABEL: &str = "Name:";

/// Label of the second line of a network stanza.
const NETWORK_LABEL: &str = "Network:";

const NETWORK_LIST: &str = "natnetwork list";

/// Parse `VBoxManage natnetwork list` output.
///
/// As of VBoxManage 6.0.8r130520 the format is:
///
/// ```text
/// NAT Networks:
///
/// Name:        KubeNet
/// Network:     10.0.2.0/24
/// Gateway:     10.0.2.1
/// IPv6:        No
/// Enabled:     Yes
///
///
/// Name:        NatNetwork
/// Network:     10.0.2.0/24
/// Gateway:     10.0.2.1
/// IPv6:        No
/// Enabled:     Yes
///
/// 2 networks found
/// ```
///
/// With no networks, only the header, one blank line and `0 networks found`
/// are printed. The footer count decides how many stanzas are read.
pub fn parse_network_list(output: &str) -> Result<Vec<Network>> {
    let lines: Vec<&str> = output
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect();
    let num_lines = lines.len();

    // Bare minimum is header, blank, footer, and the empty tail after the
    // final newline.
    if num_lines < 4 {
        return Err(Error::parse(NETWORK_LIST, "too few lines"));
    }

    let count = leading_count(lines[num_lines - 2])
        .ok_or_else(|| Error::parse(NETWORK_LIST, "missing network count"))?;

    let body = &lines[2..num_lines - 2];
    if count > body.len() / NETWORK_STANZA_LINES + 1 {
        return Err(Error::parse(NETWORK_LIST, "fewer networks than reported"));
    }

    let mut networks = Vec::with_capacity(count);

    for index in 0..count {
        let start = index * NETWORK_STANZA_LINES;
        let name = field(body, start, NAME_LABEL)?;
        let cidr = field(body, start + 1, NETWORK_LABEL)?;
        networks.push(Network::new(name, cidr));
    }

    Ok(networks)
}

/// Read the value of the fixed-width field at `body[index]`.
fn field(body: &[&str], index: usize, label: &str) -> Result<String> {
    let line = body
        .get(index)
        .ok_or_else(|| Error::parse(NETWORK_LIST, "fewer networks than reported"))?;

    if !line.starts_with(label) {
        return Err(Error::parse(
            NETWORK_LIST,
            format!("expected '{}' at line {}", label, index + 3),
        ));
    }

    line.get(FIELD_VALUE_OFFSET..)
        .map(str::to_string)
        .ok_or_else(|| Error::parse(NETWORK_LIST, format!("truncated '{}' line", label)))
}

/// Leading decimal integer of `line`, after optional whitespace.
fn leading_count(line: &str) -> Option<usize> {
    let line = line.trim_start();
    let end = line
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(line.len());
    line[..end].parse().ok()
}

/// One entry of `VBoxManage list vms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineListing {
    /// Qualified machine name, without quotes.
    pub name: String,
    /// VirtualBox UUID, without braces.
    pub uuid: String,
}

/// Parse `VBoxManage list vms` output.
///
/// Each line looks like `"zintakova-node1" {7c3a5f8e-...}`. Lines that do not
/// split into exactly two whitespace-separated tokens are dropped, which
/// includes machines whose names contain spaces.
pub fn parse_vm_list(output: &str) -> Vec<MachineListing> {
    output
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.as_slice() {
                [name, uuid] => Some(MachineListing {
                    name: trim_quotes(name).to_string(),
                    uuid: uuid
                        .trim_start_matches('{')
                        .trim_end_matches('}')
                        .to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}
