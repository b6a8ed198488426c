//! Keyed mutual exclusion for the at-most-one-in-flight-per-device rule.
//!
//! Device identity maps to the run currently holding the lease. Acquisition
//! is a single atomic entry operation, so two concurrent submissions for the
//! same device cannot both win; different devices never contend.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use synapse_state::RunId;

/// Device identity to in-flight run lease map.
#[derive(Debug, Default)]
pub struct DeviceLeaseMap {
    leases: DashMap<String, Option<RunId>>,
}

impl DeviceLeaseMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the device. Returns false if another run already holds it.
    /// The reservation is unbound until [`DeviceLeaseMap::bind`] attaches
    /// the run id.
    pub fn reserve(&self, device: &str) -> bool {
        match self.leases.entry(device.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(None);
                true
            }
        }
    }

    /// Attach the run id to a held reservation.
    pub fn bind(&self, device: &str, run_id: &RunId) {
        if let Some(mut lease) = self.leases.get_mut(device) {
            *lease = Some(run_id.clone());
        }
    }

    /// Release the device.
    pub fn release(&self, device: &str) {
        self.leases.remove(device);
    }

    /// The run currently holding the device, if any.
    pub fn holder(&self, device: &str) -> Option<RunId> {
        self.leases.get(device).and_then(|l| l.clone())
    }

    /// Whether any run holds the device.
    pub fn is_held(&self, device: &str) -> bool {
        self.leases.contains_key(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_reservation_is_refused() {
        let leases = DeviceLeaseMap::new();
        assert!(leases.reserve("leaf01"));
        assert!(!leases.reserve("leaf01"));
    }

    #[test]
    fn different_devices_do_not_contend() {
        let leases = DeviceLeaseMap::new();
        assert!(leases.reserve("leaf01"));
        assert!(leases.reserve("leaf02"));
    }

    #[test]
    fn release_allows_reacquisition() {
        let leases = DeviceLeaseMap::new();
        assert!(leases.reserve("leaf01"));
        leases.release("leaf01");
        assert!(leases.reserve("leaf01"));
    }

    #[test]
    fn bind_records_the_holder() {
        let leases = DeviceLeaseMap::new();
        let run_id = RunId::new();
        assert!(leases.reserve("spine01"));
        assert!(leases.holder("spine01").is_none());
        leases.bind("spine01", &run_id);
        assert_eq!(leases.holder("spine01"), Some(run_id));
    }
}
