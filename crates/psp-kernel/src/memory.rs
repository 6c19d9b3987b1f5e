//! Guest partition memory (SysMemUserForUser)
//!
//! Blocks the guest allocates directly out of a partition. Each one is a
//! kernel object so the guest can free it by id.

use crate::kernel::Kernel;
use crate::objects::{KernelObject, ObjectId, ObjectKind, ObjectType};
use crate::partition::{AllocDirection, MemoryBlock, PartitionId};
use psp_core::error::KernelError;
use std::sync::Arc;

/// Placement requested by sceKernelAllocPartitionMemory
pub mod block_type {
    pub const LOW: u32 = 0;
    pub const HIGH: u32 = 1;
    pub const ADDR: u32 = 2;
}

const BLOCK_ALIGNMENT: u32 = 0x100;

/// A guest-visible partition allocation
pub struct PartitionMemory {
    id: ObjectId,
    partition: PartitionId,
    block: MemoryBlock,
}

impl PartitionMemory {
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn block(&self) -> &MemoryBlock {
        &self.block
    }

    pub fn address(&self) -> u32 {
        self.block.address
    }
}

impl ObjectKind for PartitionMemory {
    const TYPE: ObjectType = ObjectType::PartitionMemory;
}

impl KernelObject for PartitionMemory {
    fn object_type(&self) -> ObjectType {
        ObjectType::PartitionMemory
    }

    fn id(&self) -> ObjectId {
        self.id
    }

    fn name(&self) -> &str {
        &self.block.name
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

fn direction(kind: u32, address: u32) -> Result<AllocDirection, KernelError> {
    match kind {
        block_type::LOW => Ok(AllocDirection::Low),
        block_type::HIGH => Ok(AllocDirection::High),
        block_type::ADDR => Ok(AllocDirection::Addr(address)),
        _ => Err(KernelError::IllegalArgument),
    }
}

/// SysMemUserForUser syscall implementations
pub mod syscalls {
    use super::*;

    /// sceKernelAllocPartitionMemory
    pub fn sce_kernel_alloc_partition_memory(
        kernel: &mut Kernel,
        partition_id: PartitionId,
        name: &str,
        kind: u32,
        size: u32,
        address: u32,
    ) -> Result<ObjectId, KernelError> {
        let direction = direction(kind, address)?;
        if size == 0 {
            return Err(KernelError::IllegalMemSize(size));
        }
        let alignment = match direction {
            AllocDirection::Addr(_) => 1,
            _ => BLOCK_ALIGNMENT,
        };
        let block = kernel
            .partition_mut(partition_id)?
            .allocate(name, direction, alignment, size)?;

        let id = kernel.objects.next_id();
        tracing::debug!(
            "Partition {} block '{}' 0x{:x} at 0x{:08x} (0x{:x} bytes)",
            partition_id,
            name,
            id,
            block.address,
            size
        );
        kernel.objects.register(Arc::new(PartitionMemory {
            id,
            partition: partition_id,
            block,
        }));
        Ok(id)
    }

    /// sceKernelFreePartitionMemory
    pub fn sce_kernel_free_partition_memory(kernel: &mut Kernel, id: ObjectId) -> Result<(), KernelError> {
        let memory = kernel.objects.get::<PartitionMemory>(id)?;
        kernel.partition_mut(memory.partition)?.free(&memory.block)?;
        kernel.objects.unregister::<PartitionMemory>(id)
    }

    /// sceKernelGetBlockHeadAddr
    pub fn sce_kernel_get_block_head_addr(kernel: &Kernel, id: ObjectId) -> Result<u32, KernelError> {
        Ok(kernel.objects.get::<PartitionMemory>(id)?.address())
    }

    /// sceKernelMaxFreeMemSize, measured on the user partition
    pub fn sce_kernel_max_free_mem_size(kernel: &Kernel) -> Result<u32, KernelError> {
        let id = kernel.config.thread_partition;
        kernel
            .partition(id)
            .map(|p| p.max_free_block())
            .ok_or(KernelError::IllegalPartition(id))
    }

    /// sceKernelTotalFreeMemSize, measured on the user partition
    pub fn sce_kernel_total_free_mem_size(kernel: &Kernel) -> Result<u32, KernelError> {
        let id = kernel.config.thread_partition;
        kernel
            .partition(id)
            .map(|p| p.free_bytes())
            .ok_or(KernelError::IllegalPartition(id))
    }
}

#[cfg(test)]
mod tests {
    use super::block_type::*;
    use super::syscalls::*;
    use super::*;
    use crate::kernel::tests::boot;

    #[test]
    fn test_alloc_and_free() {
        let mut kernel = boot();
        let total = sce_kernel_total_free_mem_size(&kernel).unwrap();

        let low = sce_kernel_alloc_partition_memory(&mut kernel, 2, "low", LOW, 0x1000, 0).unwrap();
        let high = sce_kernel_alloc_partition_memory(&mut kernel, 2, "high", HIGH, 0x1000, 0).unwrap();
        assert_eq!(sce_kernel_get_block_head_addr(&kernel, low).unwrap(), 0x0880_0000);
        assert_eq!(sce_kernel_get_block_head_addr(&kernel, high).unwrap(), 0x09FF_F000);
        assert_eq!(sce_kernel_total_free_mem_size(&kernel).unwrap(), total - 0x2000);
        assert_eq!(sce_kernel_max_free_mem_size(&kernel).unwrap(), total - 0x2000);

        sce_kernel_free_partition_memory(&mut kernel, low).unwrap();
        sce_kernel_free_partition_memory(&mut kernel, high).unwrap();
        assert_eq!(sce_kernel_total_free_mem_size(&kernel).unwrap(), total);
        assert_eq!(
            sce_kernel_free_partition_memory(&mut kernel, low),
            Err(KernelError::UnknownMemoryBlock(low))
        );
    }

    #[test]
    fn test_alloc_at_address() {
        let mut kernel = boot();
        let id = sce_kernel_alloc_partition_memory(&mut kernel, 2, "fixed", ADDR, 0x80, 0x0881_0010).unwrap();
        assert_eq!(sce_kernel_get_block_head_addr(&kernel, id).unwrap(), 0x0881_0010);
        assert_eq!(
            sce_kernel_alloc_partition_memory(&mut kernel, 2, "overlap", ADDR, 0x80, 0x0881_0000),
            Err(KernelError::OutOfMemory)
        );
    }

    #[test]
    fn test_alloc_errors() {
        let mut kernel = boot();
        assert_eq!(
            sce_kernel_alloc_partition_memory(&mut kernel, 7, "x", LOW, 0x100, 0),
            Err(KernelError::IllegalPartition(7))
        );
        assert_eq!(
            sce_kernel_alloc_partition_memory(&mut kernel, 2, "x", 5, 0x100, 0),
            Err(KernelError::IllegalArgument)
        );
        assert_eq!(
            sce_kernel_alloc_partition_memory(&mut kernel, 2, "x", LOW, 0, 0),
            Err(KernelError::IllegalMemSize(0))
        );
        assert_eq!(
            sce_kernel_alloc_partition_memory(&mut kernel, 2, "x", LOW, 0x200_0000, 0),
            Err(KernelError::OutOfMemory)
        );
    }
}
