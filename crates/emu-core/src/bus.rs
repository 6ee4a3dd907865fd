//! Guest address-space dispatch.
//!
//! The bus owns a flat mapping table built at wiring time. Lookups are a
//! linear scan guarded by a last-hit hint, which is enough for the small
//! mapping counts real machines have while keeping the fetch path free
//! of allocation and hashing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::access::{CpuErrorKind, MemAccess, MemResponse};
use crate::device::Device;

/// A named half-open range `[base, base + size)` of guest addresses.
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    pub name: String,
    pub base: u64,
    pub size: u64,
}

impl MemoryRegion {
    #[must_use]
    pub fn new(name: &str, base: u64, size: u64) -> Self {
        Self {
            name: name.to_string(),
            base,
            size,
        }
    }
}

/// End address of a region, or `None` when the region is empty or the end
/// would wrap past the top of the address space.
#[must_use]
pub fn region_end(base: u64, size: u64) -> Option<u64> {
    if size == 0 {
        return None;
    }
    base.checked_add(size)
}

/// True when the regions overlap. Invalid regions count as overlapping so
/// validation rejects them either way.
#[must_use]
pub fn regions_overlap(a: &MemoryRegion, b: &MemoryRegion) -> bool {
    match (region_end(a.base, a.size), region_end(b.base, b.size)) {
        (Some(end_a), Some(end_b)) => a.base < end_b && b.base < end_a,
        _ => true,
    }
}

/// Validates a mapping set: every region non-empty and non-wrapping, any
/// two regions disjoint.
pub fn validate_mappings(mappings: &[MemoryRegion]) -> Result<(), String> {
    for mapping in mappings {
        if region_end(mapping.base, mapping.size).is_none() {
            return Err(format!("invalid mapping: {}", mapping.name));
        }
    }
    for i in 0..mappings.len() {
        for j in (i + 1)..mappings.len() {
            if regions_overlap(&mappings[i], &mappings[j]) {
                return Err(format!(
                    "overlapping mappings: {} and {}",
                    mappings[i].name, mappings[j].name
                ));
            }
        }
    }
    Ok(())
}

struct DeviceMapping {
    name: String,
    device: Arc<dyn Device>,
    base: u64,
    size: u64,
    /// Precomputed `base + size`.
    end: u64,
}

const NO_HIT: usize = usize::MAX;

/// Dispatches guest accesses to the owning device.
///
/// Registration happens single-threaded at wiring time; afterwards the
/// bus is shared immutably between the CPU worker and the operator. The
/// last-hit cache is therefore an atomic index *hint*: stale values are
/// revalidated against the mapping bounds before use.
pub struct MemoryBus {
    mappings: Vec<DeviceMapping>,
    /// Unique devices in registration order, for `sync_all`.
    devices: Vec<Arc<dyn Device>>,
    last_hit: AtomicUsize,
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mappings: Vec::new(),
            devices: Vec::new(),
            last_hit: AtomicUsize::new(NO_HIT),
        }
    }

    /// Binds `[base, base + size)` to `device`. Idempotent for an
    /// identical `(device, base, size)` triple. Invalidates the last-hit
    /// cache.
    pub fn register(&mut self, device: Arc<dyn Device>, base: u64, size: u64, name: &str) {
        let duplicate = self
            .mappings
            .iter()
            .any(|m| Arc::ptr_eq(&m.device, &device) && m.base == base && m.size == size);
        if duplicate {
            return;
        }
        if !self.devices.iter().any(|d| Arc::ptr_eq(d, &device)) {
            self.devices.push(Arc::clone(&device));
        }
        self.mappings.push(DeviceMapping {
            name: name.to_string(),
            device,
            base,
            size,
            end: base + size,
        });
        self.last_hit.store(NO_HIT, Ordering::Relaxed);
    }

    fn find_mapping(&self, address: u64) -> Option<&DeviceMapping> {
        let hint = self.last_hit.load(Ordering::Relaxed);
        if let Some(mapping) = self.mappings.get(hint) {
            if address >= mapping.base && address < mapping.end {
                return Some(mapping);
            }
        }
        for (index, mapping) in self.mappings.iter().enumerate() {
            if address >= mapping.base && address < mapping.end {
                self.last_hit.store(index, Ordering::Relaxed);
                return Some(mapping);
            }
        }
        None
    }

    /// Device owning `address`, if any.
    #[must_use]
    pub fn device_at(&self, address: u64) -> Option<Arc<dyn Device>> {
        self.find_mapping(address).map(|m| Arc::clone(&m.device))
    }

    /// Device bound to a mapping with the given name. Linear scan; used
    /// at wiring time, never on the fetch path.
    #[must_use]
    pub fn device_by_name(&self, name: &str) -> Option<Arc<dyn Device>> {
        self.mappings
            .iter()
            .find(|m| m.name == name)
            .map(|m| Arc::clone(&m.device))
    }

    /// Unique devices in registration order.
    #[must_use]
    pub fn devices(&self) -> &[Arc<dyn Device>] {
        &self.devices
    }

    pub fn read(&self, access: &MemAccess) -> MemResponse {
        match self.find_mapping(access.address) {
            Some(mapping) => {
                let mut local = *access;
                local.address = access.address - mapping.base;
                mapping.device.read(&local)
            }
            None => MemResponse::fault(CpuErrorKind::AccessFault, access),
        }
    }

    pub fn write(&self, access: &MemAccess) -> MemResponse {
        match self.find_mapping(access.address) {
            Some(mapping) => {
                let mut local = *access;
                local.address = access.address - mapping.base;
                mapping.device.write(&local)
            }
            None => MemResponse::fault(CpuErrorKind::AccessFault, access),
        }
    }

    /// Advance every unique device to `current_cycle`, in registration
    /// order. Called from the CPU worker after each burst.
    pub fn sync_all(&self, current_cycle: u64) {
        for device in &self.devices {
            device.sync(current_cycle);
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}
