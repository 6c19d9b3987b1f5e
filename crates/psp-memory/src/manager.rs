//! Memory system implementation

use crate::constants::*;
use parking_lot::RwLock;
use psp_core::config::MemoryConfig;
use psp_core::error::MemoryError;
use std::sync::Arc;

/// Which physical range an address falls in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    Scratchpad,
    Video,
    Main,
}

/// Memory region descriptor plus its backing store
pub struct MemoryRegion {
    pub kind: RegionKind,
    /// Base address
    pub base: u32,
    /// Size in bytes
    pub size: u32,
    /// Region name
    pub name: &'static str,
    data: RwLock<Box<[u8]>>,
}

impl MemoryRegion {
    fn new(kind: RegionKind, base: u32, size: u32, name: &'static str) -> Self {
        Self {
            kind,
            base,
            size,
            name,
            data: RwLock::new(vec![0u8; size as usize].into_boxed_slice()),
        }
    }

    /// True if `addr` (already masked) lies in this region
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr - self.base < self.size
    }
}

impl std::fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegion")
            .field("kind", &self.kind)
            .field("base", &format_args!("0x{:08x}", self.base))
            .field("size", &format_args!("0x{:x}", self.size))
            .field("name", &self.name)
            .finish()
    }
}

/// Result of translating a guest address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostAddress {
    pub region: RegionKind,
    /// Byte offset into the region's backing store
    pub offset: usize,
}

/// Guest physical memory of the PSP
///
/// Shared between the kernel and the CPU engine behind an `Arc`; every
/// region is guarded by its own lock.
#[derive(Debug)]
pub struct MemorySystem {
    regions: Vec<MemoryRegion>,
}

impl MemorySystem {
    /// Create the memory system with the default layout
    pub fn new() -> Arc<Self> {
        Self::with_config(&MemoryConfig::default())
    }

    /// Create the memory system for a config
    pub fn with_config(config: &MemoryConfig) -> Arc<Self> {
        let mut regions = vec![
            MemoryRegion::new(RegionKind::Main, MAIN_MEM_BASE, MAIN_MEM_SIZE, "Main Memory"),
            MemoryRegion::new(RegionKind::Video, VIDEO_MEM_BASE, VIDEO_MEM_SIZE, "Video Memory"),
        ];
        if config.scratchpad {
            regions.push(MemoryRegion::new(
                RegionKind::Scratchpad,
                SCRATCHPAD_BASE,
                SCRATCHPAD_SIZE,
                "Scratchpad",
            ));
        }

        for region in &regions {
            tracing::debug!(
                "Mapped {} at 0x{:08x} (0x{:x} bytes)",
                region.name,
                region.base,
                region.size
            );
        }

        Arc::new(Self { regions })
    }

    /// Get memory regions
    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    fn region_for(&self, addr: u32) -> Option<&MemoryRegion> {
        let masked = addr & ADDRESS_MASK;
        self.regions.iter().find(|r| r.contains(masked))
    }

    /// Translate a guest address
    pub fn translate(&self, addr: u32) -> Result<HostAddress, MemoryError> {
        match self.region_for(addr) {
            Some(region) => Ok(HostAddress {
                region: region.kind,
                offset: ((addr & ADDRESS_MASK) - region.base) as usize,
            }),
            None => {
                tracing::error!("Translation of unmapped address 0x{:08x}", addr);
                Err(MemoryError::InvalidAddress(addr))
            }
        }
    }

    /// Check that `len` bytes starting at `addr` stay inside one region
    pub fn check_range(&self, addr: u32, len: u32) -> Result<(), MemoryError> {
        self.locate(addr, len).map(|_| ())
    }

    /// True if `addr` translates
    pub fn is_valid(&self, addr: u32) -> bool {
        self.region_for(addr).is_some()
    }

    fn locate(&self, addr: u32, len: u32) -> Result<(&MemoryRegion, usize), MemoryError> {
        let region = self.region_for(addr).ok_or_else(|| {
            tracing::error!("Access to unmapped address 0x{:08x}", addr);
            MemoryError::InvalidAddress(addr)
        })?;
        let offset = (addr & ADDRESS_MASK) - region.base;
        if u64::from(offset) + u64::from(len) > u64::from(region.size) {
            tracing::error!(
                "Access of 0x{:x} bytes at 0x{:08x} runs past the end of {}",
                len,
                addr,
                region.name
            );
            return Err(MemoryError::InvalidAddress(addr));
        }
        Ok((region, offset as usize))
    }

    /// Copy data from memory
    pub fn read_bytes(&self, addr: u32, size: u32) -> Result<Vec<u8>, MemoryError> {
        let (region, offset) = self.locate(addr, size)?;
        let data = region.data.read();
        Ok(data[offset..offset + size as usize].to_vec())
    }

    /// Copy memory into a caller buffer
    pub fn read_into(&self, addr: u32, out: &mut [u8]) -> Result<(), MemoryError> {
        let (region, offset) = self.locate(addr, out.len() as u32)?;
        let data = region.data.read();
        out.copy_from_slice(&data[offset..offset + out.len()]);
        Ok(())
    }

    /// Copy data to memory
    pub fn write_bytes(&self, addr: u32, bytes: &[u8]) -> Result<(), MemoryError> {
        let (region, offset) = self.locate(addr, bytes.len() as u32)?;
        let mut data = region.data.write();
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Fill `size` bytes with `value`
    pub fn fill(&self, addr: u32, value: u8, size: u32) -> Result<(), MemoryError> {
        let (region, offset) = self.locate(addr, size)?;
        let mut data = region.data.write();
        data[offset..offset + size as usize].fill(value);
        Ok(())
    }

    /// Read a u8
    pub fn read_u8(&self, addr: u32) -> Result<u8, MemoryError> {
        let mut buf = [0u8; 1];
        self.read_into(addr, &mut buf)?;
        Ok(buf[0])
    }

    /// Read a little-endian u32 (the Allegrex runs little-endian)
    #[inline]
    pub fn read_u32(&self, addr: u32) -> Result<u32, MemoryError> {
        let mut buf = [0u8; 4];
        self.read_into(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Write a little-endian u32
    #[inline]
    pub fn write_u32(&self, addr: u32, value: u32) -> Result<(), MemoryError> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    /// Read a little-endian u64
    #[inline]
    pub fn read_u64(&self, addr: u32) -> Result<u64, MemoryError> {
        let mut buf = [0u8; 8];
        self.read_into(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Write a little-endian u64
    #[inline]
    pub fn write_u64(&self, addr: u32, value: u64) -> Result<(), MemoryError> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    /// Read a NUL terminated string, at most [`MAX_CSTRING_LEN`] bytes.
    ///
    /// Stops early at the end of the region. Invalid UTF-8 is replaced.
    pub fn read_cstring(&self, addr: u32) -> Result<String, MemoryError> {
        let (region, offset) = self.locate(addr, 1)?;
        let data = region.data.read();
        let end = (offset + MAX_CSTRING_LEN as usize).min(data.len());
        let bytes = &data[offset..end];
        let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..len]).into_owned())
    }
}
