//! Insertion-ordered store of datacenter hosts.

use indexmap::IndexMap;

use crate::core::host::Host;

/// Hosts of a datacenter in registration order.
///
/// Every placement loop traverses hosts in this order, which keeps the placement decisions
/// deterministic.
pub struct HostPool {
    hosts: IndexMap<u32, Host>,
}

impl HostPool {
    pub fn new() -> Self {
        Self { hosts: IndexMap::new() }
    }

    pub fn add_host(&mut self, host: Host) {
        self.hosts.insert(host.id, host);
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn contains(&self, host_id: u32) -> bool {
        self.hosts.contains_key(&host_id)
    }

    /// Host ids in registration order.
    pub fn ids(&self) -> Vec<u32> {
        self.hosts.keys().cloned().collect()
    }

    pub fn get(&self, host_id: u32) -> &Host {
        self.hosts
            .get(&host_id)
            .unwrap_or_else(|| panic!("Unknown host {}", host_id))
    }

    pub fn get_mut(&mut self, host_id: u32) -> &mut Host {
        self.hosts
            .get_mut(&host_id)
            .unwrap_or_else(|| panic!("Unknown host {}", host_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &Host)> {
        self.hosts.iter()
    }
}

impl Default for HostPool {
    fn default() -> Self {
        Self::new()
    }
}
