use crate::mem::addr::Addr;

/// Flat byte array modelling the 32-bit physical space; relies on lazy
/// allocation within the OS to avoid actually causing memory pressure.
/// This is the ground truth every cache level synchronizes against.
#[derive(Debug, Clone)]
pub struct FlatMemory {
    bytes: Vec<u8>,
}

impl FlatMemory {
    pub fn new() -> Self {
        Self::with_size(1 << 32)
    }

    /// Smaller footprint for tests; accesses must stay in range.
    pub fn with_size(size: usize) -> Self {
        Self {
            bytes: vec![0u8; size],
        }
    }

    pub fn read_word(&self, addr: Addr) -> u32 {
        assert!(addr % 4 == 0, "misaligned word read");
        let at = addr as usize;
        u32::from_le_bytes(self.bytes[at..at + 4].try_into().unwrap())
    }

    pub fn write_word(&mut self, addr: Addr, value: u32) {
        assert!(addr % 4 == 0, "misaligned word write");
        let at = addr as usize;
        self.bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn read_line(&self, addr: Addr, len: usize) -> &[u8] {
        let at = addr as usize;
        &self.bytes[at..at + len]
    }

    pub fn write_line(&mut self, addr: Addr, data: &[u8]) {
        let at = addr as usize;
        self.bytes[at..at + data.len()].copy_from_slice(data);
    }
}

impl Default for FlatMemory {
    fn default() -> Self {
        Self::new()
    }
}
