//! Byte-array memory device backing ROM and RAM regions.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Mutex;

use emu_core::{CpuErrorKind, Device, DeviceKind, MemAccess, MemResponse, SyncState};

/// A contiguous region of byte storage. Read-only instances fault on
/// every write and report themselves as ROM.
pub struct MemoryDevice {
    storage: Mutex<Vec<u8>>,
    read_only: bool,
    sync: SyncState,
}

fn access_in_bounds(storage_len: usize, access: &MemAccess) -> bool {
    if !access.has_valid_size() {
        return false;
    }
    let len = storage_len as u64;
    access.address < len && u64::from(access.size) <= len - access.address
}

fn read_le(storage: &[u8], address: u64, size: u32) -> u64 {
    let mut value = 0u64;
    for i in 0..size {
        value |= u64::from(storage[(address + u64::from(i)) as usize]) << (8 * i);
    }
    value
}

fn write_le(storage: &mut [u8], address: u64, size: u32, data: u64) {
    let mut value = data;
    for i in 0..size {
        storage[(address + u64::from(i)) as usize] = (value & 0xff) as u8;
        value >>= 8;
    }
}

impl MemoryDevice {
    /// Zero-filled storage of `size` bytes.
    #[must_use]
    pub fn new(size: u64, read_only: bool) -> Self {
        Self {
            storage: Mutex::new(vec![0; size as usize]),
            read_only,
            sync: SyncState::new(),
        }
    }

    /// Streams a file into storage starting at `offset`. Returns the byte
    /// count copied; the image is truncated to the remaining capacity.
    pub fn load_image(&self, path: &Path, offset: u64) -> io::Result<u64> {
        let mut storage = self.storage.lock().unwrap();
        if offset >= storage.len() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("image offset 0x{offset:x} past end of storage"),
            ));
        }
        let mut file = File::open(path)?;
        let dest = &mut storage[offset as usize..];
        let mut total = 0usize;
        while total < dest.len() {
            let count = file.read(&mut dest[total..])?;
            if count == 0 {
                break;
            }
            total += count;
        }
        Ok(total as u64)
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.storage.lock().unwrap().len() as u64
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl Device for MemoryDevice {
    fn kind(&self) -> DeviceKind {
        if self.read_only {
            DeviceKind::Rom
        } else {
            DeviceKind::Ram
        }
    }

    fn read(&self, access: &MemAccess) -> MemResponse {
        let storage = self.storage.lock().unwrap();
        if !access_in_bounds(storage.len(), access) {
            return MemResponse::fault(CpuErrorKind::AccessFault, access);
        }
        MemResponse::ok(read_le(&storage, access.address, access.size))
    }

    fn write(&self, access: &MemAccess) -> MemResponse {
        let mut storage = self.storage.lock().unwrap();
        if !access_in_bounds(storage.len(), access) {
            return MemResponse::fault(CpuErrorKind::AccessFault, access);
        }
        if self.read_only {
            return MemResponse::fault(CpuErrorKind::AccessFault, access);
        }
        write_le(&mut storage, access.address, access.size, access.data);
        MemResponse::ok(0)
    }

    fn sync_state(&self) -> &SyncState {
        &self.sync
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn round_trip_every_width() {
        let ram = MemoryDevice::new(64, false);
        for &(size, value) in &[
            (1u32, 0xA5u64),
            (2, 0xBEEF),
            (4, 0x1122_3344),
            (8, 0x0102_0304_0506_0708),
        ] {
            let write = MemAccess::write(8, size, value);
            assert!(ram.write(&write).success);
            let read = ram.read(&MemAccess::read(8, size));
            assert!(read.success);
            assert_eq!(read.data, value, "width {size}");
        }
    }

    #[test]
    fn values_are_little_endian() {
        let ram = MemoryDevice::new(16, false);
        assert!(ram.write(&MemAccess::write(0, 4, 0x0403_0201)).success);
        for i in 0..4u64 {
            let byte = ram.read(&MemAccess::read(i, 1));
            assert_eq!(byte.data, i + 1);
        }
    }

    #[test]
    fn rejects_bad_sizes_and_out_of_range() {
        let ram = MemoryDevice::new(16, false);
        let odd = ram.read(&MemAccess::read(0, 3));
        assert_eq!(odd.error.kind, CpuErrorKind::AccessFault);

        let past_end = ram.read(&MemAccess::read(13, 4));
        assert!(!past_end.success);
        assert_eq!(past_end.error.address, 13);
        assert_eq!(past_end.error.size, 4);

        // A straddling write must not touch storage.
        assert!(!ram.write(&MemAccess::write(15, 2, 0xFFFF)).success);
        assert_eq!(ram.read(&MemAccess::read(15, 1)).data, 0);
    }

    #[test]
    fn rom_faults_on_write_and_keeps_contents() {
        let rom = MemoryDevice::new(16, true);
        {
            let mut storage = rom.storage.lock().unwrap();
            storage[4] = 0x7E;
        }
        let response = rom.write(&MemAccess::write(4, 1, 0x00));
        assert_eq!(response.error.kind, CpuErrorKind::AccessFault);
        assert_eq!(rom.read(&MemAccess::read(4, 1)).data, 0x7E);
        assert_eq!(rom.kind(), DeviceKind::Rom);
    }

    #[test]
    fn load_image_copies_from_offset_and_truncates() {
        let file = tempfile_with(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let ram = MemoryDevice::new(8, false);
        let loaded = ram.load_image(file.path(), 4).unwrap();
        assert_eq!(loaded, 4);
        assert_eq!(ram.read(&MemAccess::read(4, 4)).data, 0x0403_0201);

        let missing = ram.load_image(Path::new("/nonexistent/rom.bin"), 0);
        assert!(missing.is_err());

        let bad_offset = ram.load_image(file.path(), 8);
        assert!(bad_offset.is_err());
    }

    struct TempFile {
        path: std::path::PathBuf,
    }

    impl TempFile {
        fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for TempFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn tempfile_with(bytes: &[u8]) -> TempFile {
        let path = std::env::temp_dir().join(format!(
            "emu-devices-test-{}-{:p}.bin",
            std::process::id(),
            bytes
        ));
        let mut file = File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        TempFile { path }
    }
}
