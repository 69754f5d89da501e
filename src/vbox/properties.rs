//! Guest property parsing and dispatch.
//!
//! The guest additions inside a kutti machine publish properties that tell us
//! what the machine is doing. `VBoxManage guestproperty enumerate` prints
//! either an error:
//!
//! ```text
//! VBoxManage: error: Could not find a registered machine named 'xxx'
//! ```
//!
//! or one line per property:
//!
//! ```text
//! Name: /VirtualBox/GuestInfo/Net/0/V4/IP, value: 10.0.2.15, timestamp: 1568552111298588000, flags:
//! ```
//!
//! Only a few property names mean anything to the driver. They are listed in
//! [`PROPERTY_ACTIONS`]; everything else is ignored.

use once_cell::sync::Lazy;
use regex::Regex;

/// IPv4 address of the first network interface.
pub const PROP_IP_ADDRESS: &str = "/VirtualBox/GuestInfo/Net/0/V4/IP";
/// IPv4 address of the second network interface.
pub const PROP_IP_ADDRESS_2: &str = "/VirtualBox/GuestInfo/Net/1/V4/IP";
/// IPv4 address of the third network interface.
pub const PROP_IP_ADDRESS_3: &str = "/VirtualBox/GuestInfo/Net/2/V4/IP";
/// Present once a user session exists, i.e. the guest has booted.
pub const PROP_LOGGED_IN_USERS: &str = "/VirtualBox/GuestInfo/OS/LoggedInUsers";
/// `localhost:<port>` address for SSH, set when the SSH port is forwarded.
pub const PROP_SSH_ADDRESS: &str = "/kutti/VMInfo/SSHAddress";
/// DHCP address recorded when the machine was created.
pub const PROP_SAVED_IP_ADDRESS: &str = "/kutti/VMInfo/SavedIPAddress";

/// Interface address properties, in the order they are probed.
pub const IP_ADDRESS_PROPERTIES: [&str; 3] =
    [PROP_IP_ADDRESS, PROP_IP_ADDRESS_2, PROP_IP_ADDRESS_3];

/// Patterns passed to `guestproperty enumerate`.
pub const ENUMERATE_PATTERNS: &str =
    "/VirtualBox/GuestInfo/Net/0/*|/kutti/*|/VirtualBox/GuestInfo/OS/LoggedInUsers";

/// What `guestproperty get` prints when a property is not set.
const NO_VALUE: &str = "No value set!";

/// Prefix of a `guestproperty get` value line.
const VALUE_PREFIX: &str = "Value: ";

static ERROR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"error: (.*)\n").expect("valid regex"));

static PROPERTY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Name: (.*), value: (.*), timestamp: (.*), flags:(.*)\n").expect("valid regex")
});

static IPV4_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(([0-9]|[1-9][0-9]|1[0-9]{2}|2[0-4][0-9]|25[0-5])\.){3}([0-9]|[1-9][0-9]|1[0-9]{2}|2[0-4][0-9]|25[0-5])$",
    )
    .expect("valid regex")
});

/// One guest property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRecord {
    /// Property name.
    pub name: String,
    /// Property value, as printed.
    pub value: String,
}

/// Result of parsing `guestproperty enumerate` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyListing {
    /// VBoxManage reported an error, usually an unknown machine.
    Error(String),
    /// Properties, in output order.
    Records(Vec<PropertyRecord>),
}

/// Parse `guestproperty enumerate` output.
///
/// An `error:` line anywhere in the output wins; no records are extracted
/// in that case.
pub fn parse_properties(output: &str) -> PropertyListing {
    if let Some(captures) = ERROR_PATTERN.captures(output) {
        return PropertyListing::Error(captures[1].to_string());
    }

    let records = PROPERTY_PATTERN
        .captures_iter(output)
        .map(|c| PropertyRecord {
            name: c[1].to_string(),
            value: c[2].to_string(),
        })
        .collect();

    PropertyListing::Records(records)
}

/// Parse `guestproperty get` output.
///
/// Returns `None` when the property is not set.
pub fn parse_property_value(output: &str) -> Option<String> {
    if output.trim_end() == NO_VALUE {
        return None;
    }
    output.strip_prefix(VALUE_PREFIX).map(trim_value)
}

/// Trim the whitespace VBoxManage leaves around property values.
pub fn trim_value(value: &str) -> String {
    value.trim().to_string()
}

/// Properties that change what the driver knows about a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyAction {
    /// The guest has a logged-in session: it is running.
    MarkRunning,
    /// The guest carries its saved IP address.
    CacheSavedIp,
}

/// Well-known property names and what each one means.
pub const PROPERTY_ACTIONS: &[(&str, PropertyAction)] = &[
    (PROP_LOGGED_IN_USERS, PropertyAction::MarkRunning),
    (PROP_SAVED_IP_ADDRESS, PropertyAction::CacheSavedIp),
];

/// State change produced by one property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyEffect {
    /// Machine status becomes Running.
    Running,
    /// Saved IP address becomes the given value.
    SavedIp(String),
}

impl PropertyAction {
    /// Look up the action for a property name.
    pub fn for_name(name: &str) -> Option<Self> {
        PROPERTY_ACTIONS
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, action)| *action)
    }

    /// Effect of seeing this property with `value`.
    ///
    /// Values are not validated; whatever the guest published is used.
    pub fn apply(self, value: &str) -> PropertyEffect {
        match self {
            PropertyAction::MarkRunning => PropertyEffect::Running,
            PropertyAction::CacheSavedIp => PropertyEffect::SavedIp(trim_value(value)),
        }
    }
}

/// Effects of a list of records, in order. Unknown names are skipped.
pub fn effects(records: &[PropertyRecord]) -> Vec<PropertyEffect> {
    records
        .iter()
        .filter_map(|r| PropertyAction::for_name(&r.name).map(|a| a.apply(&r.value)))
        .collect()
}

/// Whether `candidate` is a dotted-quad IPv4 address starting with `prefix`.
pub fn is_acceptable_ip(candidate: &str, prefix: &str) -> bool {
    IPV4_PATTERN.is_match(candidate) && candidate.starts_with(prefix)
}
