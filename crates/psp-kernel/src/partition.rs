//! Memory partitions
//!
//! A partition owns a fixed guest address range and hands out
//! non-overlapping blocks from either end of it. Free space is never
//! stored; it is the gaps between the allocated blocks, so freeing a
//! block merges its range with its neighbours for free.

use psp_core::error::KernelError;
use std::collections::BTreeMap;

/// Partition number as seen by the guest
pub type PartitionId = u32;

/// Where a block is placed inside the free space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocDirection {
    /// Lowest fitting address
    Low,
    /// Highest fitting address
    High,
    /// Exactly at the given address
    Addr(u32),
}

/// An allocated range inside a partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBlock {
    pub name: String,
    pub address: u32,
    pub size: u32,
}

impl MemoryBlock {
    /// First address past the block
    pub fn upper_bound(&self) -> u32 {
        self.address + self.size
    }
}

/// A region allocator over `[base, base + size)`
#[derive(Debug)]
pub struct Partition {
    id: PartitionId,
    name: String,
    base: u32,
    size: u32,
    blocks: BTreeMap<u32, MemoryBlock>,
}

fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

fn align_down(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        value
    } else {
        value / alignment * alignment
    }
}

impl Partition {
    pub fn new(id: PartitionId, name: &str, base: u32, size: u32) -> Self {
        Self {
            id,
            name: name.to_string(),
            base,
            size,
            blocks: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Total capacity in bytes
    pub fn size(&self) -> u32 {
        self.size
    }

    fn end(&self) -> u64 {
        u64::from(self.base) + u64::from(self.size)
    }

    /// Free gaps as `[start, end)` pairs, ascending
    fn gaps(&self) -> Vec<(u64, u64)> {
        let mut gaps = Vec::with_capacity(self.blocks.len() + 1);
        let mut cursor = u64::from(self.base);
        for block in self.blocks.values() {
            let start = u64::from(block.address);
            if start > cursor {
                gaps.push((cursor, start));
            }
            cursor = u64::from(block.upper_bound());
        }
        if self.end() > cursor {
            gaps.push((cursor, self.end()));
        }
        gaps
    }

    /// Allocate `size` bytes
    pub fn allocate(
        &mut self,
        name: &str,
        direction: AllocDirection,
        alignment: u32,
        size: u32,
    ) -> Result<MemoryBlock, KernelError> {
        if size == 0 {
            return Err(KernelError::IllegalMemSize(size));
        }

        let len = u64::from(size);
        let alignment = u64::from(alignment);
        let gaps = self.gaps();

        let address = match direction {
            AllocDirection::Low => gaps.iter().find_map(|&(start, end)| {
                let candidate = align_up(start, alignment);
                (candidate + len <= end).then_some(candidate)
            }),
            AllocDirection::High => gaps.iter().rev().find_map(|&(start, end)| {
                let top = end.checked_sub(len)?;
                let candidate = align_down(top, alignment);
                (candidate >= start).then_some(candidate)
            }),
            AllocDirection::Addr(addr) => {
                let addr = u64::from(addr);
                gaps.iter()
                    .any(|&(start, end)| addr >= start && addr + len <= end)
                    .then_some(addr)
            }
        };

        let Some(address) = address else {
            tracing::debug!(
                "Partition {} cannot fit 0x{:x} bytes ({:?}) for '{}'",
                self.name,
                size,
                direction,
                name
            );
            return Err(KernelError::OutOfMemory);
        };

        let block = MemoryBlock {
            name: name.to_string(),
            address: address as u32,
            size,
        };
        tracing::trace!(
            "Partition {}: '{}' at 0x{:08x} (0x{:x} bytes)",
            self.name,
            name,
            block.address,
            size
        );
        self.blocks.insert(block.address, block.clone());
        Ok(block)
    }

    /// Return a block to the partition
    pub fn free(&mut self, block: &MemoryBlock) -> Result<(), KernelError> {
        match self.blocks.get(&block.address) {
            Some(owned) if owned.size == block.size => {
                self.blocks.remove(&block.address);
                tracing::trace!("Partition {}: freed '{}' at 0x{:08x}", self.name, block.name, block.address);
                Ok(())
            }
            _ => {
                tracing::error!(
                    "Partition {}: free of unowned block '{}' at 0x{:08x} (double free?)",
                    self.name,
                    block.name,
                    block.address
                );
                Err(KernelError::IllegalMemBlock(block.address))
            }
        }
    }

    /// Bytes handed out
    pub fn used_bytes(&self) -> u32 {
        self.blocks.values().map(|b| b.size).sum()
    }

    /// Bytes still available
    pub fn free_bytes(&self) -> u32 {
        self.size - self.used_bytes()
    }

    /// Largest contiguous free range
    pub fn max_free_block(&self) -> u32 {
        self.gaps()
            .iter()
            .map(|&(start, end)| (end - start) as u32)
            .max()
            .unwrap_or(0)
    }

    /// Allocated blocks, ascending by address
    pub fn blocks(&self) -> impl Iterator<Item = &MemoryBlock> {
        self.blocks.values()
    }

    /// True if `address` is inside the partition range
    pub fn contains(&self, address: u32) -> bool {
        u64::from(address) >= u64::from(self.base) && u64::from(address) < self.end()
    }
}
