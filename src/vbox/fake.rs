//! In-memory stand-in for VBoxManage used by tests.
//!
//! Keeps just enough VirtualBox state (machines, guest properties, NAT
//! networks, DHCP servers, forwarding rules) to answer the commands the
//! driver issues, in the same text formats the real tool prints.

use super::properties::PROP_LOGGED_IN_USERS;
use super::VBoxManage;
use crate::error::{Error, Result};
use crate::runner::CommandRunner;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Default)]
pub(crate) struct FakeMachine {
    pub(crate) running: bool,
    pub(crate) nic_network: Option<String>,
    pub(crate) hostname: Option<String>,
    pub(crate) properties: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct FakeNetwork {
    cidr: String,
    rules: Vec<String>,
}

#[derive(Debug)]
struct State {
    version: String,
    calls: Vec<String>,
    failures: Vec<String>,
    failure_counts: HashMap<String, u32>,
    machines: BTreeMap<String, FakeMachine>,
    networks: BTreeMap<String, FakeNetwork>,
    dhcp_servers: BTreeSet<String>,
    boot_properties: Vec<(String, String)>,
    hidden_gets: HashMap<String, u32>,
}

/// Scripted VBoxManage.
#[derive(Clone)]
pub(crate) struct FakeVBox {
    state: Arc<Mutex<State>>,
}

impl FakeVBox {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                version: "6.1.50r161033\n".to_string(),
                calls: Vec::new(),
                failures: Vec::new(),
                failure_counts: HashMap::new(),
                machines: BTreeMap::new(),
                networks: BTreeMap::new(),
                dhcp_servers: BTreeSet::new(),
                boot_properties: vec![(PROP_LOGGED_IN_USERS.to_string(), "1".to_string())],
                hidden_gets: HashMap::new(),
            })),
        }
    }

    /// A VBoxManage handle backed by this fake.
    pub(crate) fn handle(&self) -> VBoxManage {
        VBoxManage::new("VBoxManage", Arc::new(self.clone()))
    }

    /// Every call so far, arguments joined by spaces.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Calls whose text starts with `prefix`.
    pub(crate) fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub(crate) fn set_version(&self, version: &str) {
        self.state.lock().version = version.to_string();
    }

    /// Fail every call starting with `prefix`.
    pub(crate) fn fail_on(&self, prefix: &str) {
        self.state.lock().failures.push(prefix.to_string());
    }

    /// Fail the next `times` calls starting with `prefix`.
    pub(crate) fn fail_times(&self, prefix: &str, times: u32) {
        self.state
            .lock()
            .failure_counts
            .insert(prefix.to_string(), times);
    }

    pub(crate) fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failures.clear();
        state.failure_counts.clear();
    }

    /// Guest properties published when a machine starts.
    pub(crate) fn publish_on_boot(&self, name: &str, value: &str) {
        self.state
            .lock()
            .boot_properties
            .push((name.to_string(), value.to_string()));
    }

    /// Make `guestproperty get` for `name` report no value `times` times.
    pub(crate) fn hide_property(&self, name: &str, times: u32) {
        self.state.lock().hidden_gets.insert(name.to_string(), times);
    }

    /// Register a stopped machine directly.
    pub(crate) fn add_machine(&self, qname: &str) {
        self.state
            .lock()
            .machines
            .insert(qname.to_string(), FakeMachine::default());
    }

    pub(crate) fn set_property(&self, qname: &str, name: &str, value: &str) {
        if let Some(m) = self.state.lock().machines.get_mut(qname) {
            m.properties.insert(name.to_string(), value.to_string());
        }
    }

    pub(crate) fn property(&self, qname: &str, name: &str) -> Option<String> {
        self.state
            .lock()
            .machines
            .get(qname)
            .and_then(|m| m.properties.get(name).cloned())
    }

    pub(crate) fn has_machine(&self, qname: &str) -> bool {
        self.state.lock().machines.contains_key(qname)
    }

    pub(crate) fn is_running(&self, qname: &str) -> bool {
        self.state
            .lock()
            .machines
            .get(qname)
            .map(|m| m.running)
            .unwrap_or(false)
    }

    pub(crate) fn hostname(&self, qname: &str) -> Option<String> {
        self.state
            .lock()
            .machines
            .get(qname)
            .and_then(|m| m.hostname.clone())
    }

    pub(crate) fn nic_network(&self, qname: &str) -> Option<String> {
        self.state
            .lock()
            .machines
            .get(qname)
            .and_then(|m| m.nic_network.clone())
    }

    pub(crate) fn add_network(&self, name: &str) {
        let mut state = self.state.lock();
        state.networks.insert(
            name.to_string(),
            FakeNetwork {
                cidr: "192.168.125.0/24".to_string(),
                rules: Vec::new(),
            },
        );
        state.dhcp_servers.insert(name.to_string());
    }

    pub(crate) fn has_network(&self, name: &str) -> bool {
        self.state.lock().networks.contains_key(name)
    }

    pub(crate) fn has_dhcp_server(&self, name: &str) -> bool {
        self.state.lock().dhcp_servers.contains(name)
    }

    pub(crate) fn rules(&self, network: &str) -> Vec<String> {
        self.state
            .lock()
            .networks
            .get(network)
            .map(|n| n.rules.clone())
            .unwrap_or_default()
    }
}

fn failed(command: &str, output: impl Into<String>) -> Error {
    Error::command_failed(format!("VBoxManage {}", command), "exit status: 1", output)
}

fn not_registered(qname: &str) -> Error {
    failed(
        "",
        format!(
            "VBoxManage: error: Could not find a registered machine named '{}'\n",
            qname
        ),
    )
}

/// Value following `flag` in `args`.
fn flag<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

impl State {
    fn machine(&mut self, qname: &str) -> Result<&mut FakeMachine> {
        self.machines
            .get_mut(qname)
            .ok_or_else(|| not_registered(qname))
    }

    fn injected_failure(&mut self, call: &str) -> bool {
        if self.failures.iter().any(|p| call.starts_with(p.as_str())) {
            return true;
        }
        for (prefix, remaining) in self.failure_counts.iter_mut() {
            if *remaining > 0 && call.starts_with(prefix.as_str()) {
                *remaining -= 1;
                return true;
            }
        }
        false
    }

    fn handle(&mut self, args: &[String]) -> Result<String> {
        let words: Vec<&str> = args.iter().map(String::as_str).collect();
        match words.as_slice() {
            ["--version"] => Ok(self.version.clone()),
            ["list", "vms"] => Ok(self
                .machines
                .keys()
                .enumerate()
                .map(|(i, q)| format!("\"{}\" {{00000000-0000-0000-0000-{:012}}}\n", q, i))
                .collect()),
            ["import", _ova, ..] => {
                let qname = flag(args, "--vmname").unwrap_or_default().to_string();
                if self.machines.contains_key(&qname) {
                    return Err(failed(
                        "import",
                        format!("VBoxManage: error: Machine '{}' already exists\n", qname),
                    ));
                }
                self.machines.insert(qname, FakeMachine::default());
                Ok("0%...10%...100%\n".to_string())
            }
            ["modifyvm", qname, "--nic1", "natnetwork", "--nat-network1", net] => {
                let net = net.to_string();
                self.machine(qname)?.nic_network = Some(net);
                Ok(String::new())
            }
            ["startvm", qname, "--type", "headless"] => {
                let boot = self.boot_properties.clone();
                let machine = self.machine(qname)?;
                if machine.running {
                    return Err(failed("startvm", "VBoxManage: error: already running\n"));
                }
                machine.running = true;
                machine.properties.extend(boot);
                Ok(format!(
                    "Waiting for VM \"{}\" to power on...\nVM \"{}\" has been successfully started.\n",
                    qname, qname
                ))
            }
            ["controlvm", qname, "acpipowerbutton" | "poweroff"] => {
                let machine = self.machine(qname)?;
                if !machine.running {
                    return Err(failed(
                        "controlvm",
                        "VBoxManage: error: Machine is not currently running\n",
                    ));
                }
                machine.running = false;
                Ok(String::new())
            }
            ["unregistervm", qname, "--delete"] => {
                let qname = qname.to_string();
                self.machines
                    .remove(&qname)
                    .map(|_| String::new())
                    .ok_or_else(|| not_registered(&qname))
            }
            ["guestproperty", "enumerate", qname, ..] => {
                let machine = self.machine(qname)?;
                Ok(machine
                    .properties
                    .iter()
                    .enumerate()
                    .map(|(i, (k, v))| {
                        format!("Name: {}, value: {}, timestamp: {}, flags:\n", k, v, 1000 + i)
                    })
                    .collect())
            }
            ["guestproperty", "get", qname, name] => {
                let name = name.to_string();
                let hidden = match self.hidden_gets.get_mut(&name) {
                    Some(n) if *n > 0 => {
                        *n -= 1;
                        true
                    }
                    _ => false,
                };
                let machine = self.machine(qname)?;
                match machine.properties.get(&name) {
                    Some(v) if !hidden => Ok(format!("Value: {}\n", v)),
                    _ => Ok("No value set!\n".to_string()),
                }
            }
            ["guestproperty", "set", qname, name, value] => {
                let (name, value) = (name.to_string(), value.to_string());
                self.machine(qname)?.properties.insert(name, value);
                Ok(String::new())
            }
            ["guestproperty", "unset", qname, name] => {
                let name = name.to_string();
                self.machine(qname)?.properties.remove(&name);
                Ok(String::new())
            }
            ["guestproperty", "wait", qname, name, ..] => {
                let name = name.to_string();
                let machine = self.machine(qname)?;
                match machine.properties.get(&name) {
                    Some(v) if machine.running => {
                        Ok(format!("Name: {}, value: {}, flags: \n", name, v))
                    }
                    _ => Err(failed("guestproperty", "Time out or interruption\n")),
                }
            }
            ["guestcontrol", qname, .., "run", "--", _sudo, _script, newname] => {
                let newname = newname.to_string();
                let machine = self.machine(qname)?;
                if !machine.running {
                    return Err(failed(
                        "guestcontrol",
                        "VBoxManage: error: Machine is not running\n",
                    ));
                }
                machine.hostname = Some(newname);
                Ok(String::new())
            }
            ["natnetwork", "add", ..] => {
                let name = flag(args, "--netname").unwrap_or_default().to_string();
                let cidr = flag(args, "--network").unwrap_or_default().to_string();
                if self.networks.contains_key(&name) {
                    return Err(failed(
                        "natnetwork",
                        "VBoxManage: error: NATNetwork server already exists\n",
                    ));
                }
                self.networks.insert(
                    name,
                    FakeNetwork {
                        cidr,
                        rules: Vec::new(),
                    },
                );
                Ok(String::new())
            }
            ["natnetwork", "remove", "--netname", name] => {
                let name = name.to_string();
                self.networks
                    .remove(&name)
                    .map(|_| String::new())
                    .ok_or_else(|| {
                        failed("natnetwork", "VBoxManage: error: NATNetwork does not exist\n")
                    })
            }
            ["natnetwork", "list", pattern] => {
                let suffix = pattern.trim_start_matches('*');
                let matching: Vec<_> = self
                    .networks
                    .iter()
                    .filter(|(n, _)| n.ends_with(suffix))
                    .collect();
                let mut out = String::from("NAT Networks:\n\n");
                for (i, (name, net)) in matching.iter().enumerate() {
                    if i > 0 {
                        out.push_str("\n\n");
                    }
                    out.push_str(&format!(
                        "Name:        {}\nNetwork:     {}\nGateway:     192.168.125.1\nIPv6:        No\nEnabled:     Yes\n",
                        name, net.cidr
                    ));
                }
                if !matching.is_empty() {
                    out.push('\n');
                }
                out.push_str(&format!("{} networks found\n", matching.len()));
                Ok(out)
            }
            ["natnetwork", "modify", "--netname", name, "--port-forward-4", "delete", rule] => {
                let rule = rule.to_string();
                let network = self
                    .networks
                    .get_mut(*name)
                    .ok_or_else(|| failed("natnetwork", "VBoxManage: error: no such network\n"))?;
                let before = network.rules.len();
                network
                    .rules
                    .retain(|r| r.split(':').next() != Some(rule.as_str()));
                if network.rules.len() == before {
                    return Err(failed("natnetwork", "VBoxManage: error: no such rule\n"));
                }
                Ok(String::new())
            }
            ["natnetwork", "modify", "--netname", name, "--port-forward-4", rule] => {
                let rule = rule.to_string();
                let network = self
                    .networks
                    .get_mut(*name)
                    .ok_or_else(|| failed("natnetwork", "VBoxManage: error: no such network\n"))?;
                let rule_name = rule.split(':').next().unwrap_or_default().to_string();
                if network
                    .rules
                    .iter()
                    .any(|r| r.split(':').next() == Some(rule_name.as_str()))
                {
                    return Err(failed("natnetwork", "VBoxManage: error: rule exists\n"));
                }
                network.rules.push(rule);
                Ok(String::new())
            }
            ["dhcpserver", "add", ..] => {
                let name = flag(args, "--netname").unwrap_or_default().to_string();
                if !self.dhcp_servers.insert(name) {
                    return Err(failed("dhcpserver", "VBoxManage: error: DHCP server exists\n"));
                }
                Ok(String::new())
            }
            ["dhcpserver", "remove", "--netname", name] => {
                if !self.dhcp_servers.remove(*name) {
                    return Err(failed(
                        "dhcpserver",
                        "VBoxManage: error: DHCP server does not exist\n",
                    ));
                }
                Ok(String::new())
            }
            _ => Err(failed(
                args.first().map(String::as_str).unwrap_or_default(),
                format!("fake VBoxManage: unsupported call {:?}\n", args),
            )),
        }
    }
}

impl CommandRunner for FakeVBox {
    fn run(&self, _program: &Path, args: &[String]) -> Result<String> {
        let mut state = self.state.lock();
        let call = args.join(" ");
        state.calls.push(call.clone());

        if state.injected_failure(&call) {
            return Err(failed(
                args.first().map(String::as_str).unwrap_or_default(),
                "VBoxManage: error: injected failure\n",
            ));
        }

        state.handle(args)
    }
}
