//! Bus access descriptors and the fault model shared by every component.

/// Direction of a bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    /// Instruction fetch. Carried separately so trace output can exclude it.
    Fetch,
}

/// Classification of a CPU or bus fault. `None` means no error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpuErrorKind {
    #[default]
    None,
    /// The executor could not decode the instruction.
    InvalidOp,
    /// No device owns the address, or the device rejected the access shape.
    AccessFault,
    /// A device exists but could not service the request.
    DeviceFault,
    /// The guest executed its halt instruction.
    Halt,
}

/// Context for a fault: enough to reconstruct the offending access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuErrorDetail {
    pub kind: CpuErrorKind,
    pub address: u64,
    pub size: u32,
    pub data: u64,
}

/// One request on the memory bus.
///
/// `address` is a guest address at the bus boundary; devices see it
/// rebased to their mapping. `data` is meaningful for writes only.
#[derive(Debug, Clone, Copy)]
pub struct MemAccess {
    pub address: u64,
    /// Width in bytes. Devices accept a subset of {1, 2, 4, 8}.
    pub size: u32,
    pub kind: AccessKind,
    pub data: u64,
}

impl MemAccess {
    #[must_use]
    pub fn read(address: u64, size: u32) -> Self {
        Self {
            address,
            size,
            kind: AccessKind::Read,
            data: 0,
        }
    }

    #[must_use]
    pub fn write(address: u64, size: u32, data: u64) -> Self {
        Self {
            address,
            size,
            kind: AccessKind::Write,
            data,
        }
    }

    #[must_use]
    pub fn fetch(address: u64, size: u32) -> Self {
        Self {
            address,
            size,
            kind: AccessKind::Fetch,
            data: 0,
        }
    }

    /// True when the width is one a memory-like device accepts.
    #[must_use]
    pub fn has_valid_size(&self) -> bool {
        matches!(self.size, 1 | 2 | 4 | 8)
    }
}

/// Outcome of a bus access.
#[derive(Debug, Clone, Copy)]
pub struct MemResponse {
    pub success: bool,
    pub data: u64,
    /// Additive latency contribution from the device, in cycles.
    pub latency_cycles: u32,
    pub error: CpuErrorDetail,
}

impl MemResponse {
    /// Successful response carrying `data`.
    #[must_use]
    pub fn ok(data: u64) -> Self {
        Self {
            success: true,
            data,
            latency_cycles: 0,
            error: CpuErrorDetail::default(),
        }
    }

    /// Failed response recording the faulting access.
    #[must_use]
    pub fn fault(kind: CpuErrorKind, access: &MemAccess) -> Self {
        Self {
            success: false,
            data: 0,
            latency_cycles: 0,
            error: CpuErrorDetail {
                kind,
                address: access.address,
                size: access.size,
                data: access.data,
            },
        }
    }
}

/// Result of one executor burst.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepResult {
    pub success: bool,
    pub instructions: u64,
    pub cycles: u64,
}
