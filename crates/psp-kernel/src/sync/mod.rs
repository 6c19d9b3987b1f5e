//! Synchronization primitives

pub mod event_flag;
pub mod msgpipe;
pub mod mutex;
pub mod semaphore;

use psp_core::error::KernelError;
use psp_memory::MemorySystem;
use std::collections::VecDeque;

/// Waiters are served by thread priority instead of arrival order
pub const ATTR_THPRI: u32 = 0x100;

/// Longest object name stored in a status block, terminator included
pub const NAME_LEN: usize = 32;

/// Queue a waiter, either FIFO or ordered by priority (FIFO among equals)
pub(crate) fn enqueue<W>(queue: &mut VecDeque<W>, waiter: W, by_priority: bool, priority: impl Fn(&W) -> u32) {
    if by_priority {
        let mine = priority(&waiter);
        let position = queue
            .iter()
            .position(|w| priority(w) > mine)
            .unwrap_or(queue.len());
        queue.insert(position, waiter);
    } else {
        queue.push_back(waiter);
    }
}

/// Remove the waiter entry of `thread`; false if it was not queued
pub(crate) fn remove_from<W>(queue: &mut VecDeque<W>, matches: impl Fn(&W) -> bool) -> bool {
    match queue.iter().position(matches) {
        Some(index) => {
            queue.remove(index);
            true
        }
        None => false,
    }
}

/// Write a `Sce*Info` status block: size word, 32 byte name, then `fields`
pub(crate) fn write_status(
    memory: &MemorySystem,
    address: u32,
    name: &str,
    fields: &[u32],
) -> Result<(), KernelError> {
    let size = (4 + NAME_LEN + fields.len() * 4) as u32;
    let mut block = Vec::with_capacity(size as usize);
    block.extend_from_slice(&size.to_le_bytes());

    let mut name_bytes = [0u8; NAME_LEN];
    let len = name.len().min(NAME_LEN - 1);
    name_bytes[..len].copy_from_slice(&name.as_bytes()[..len]);
    block.extend_from_slice(&name_bytes);

    for field in fields {
        block.extend_from_slice(&field.to_le_bytes());
    }
    memory.write_bytes(address, &block)?;
    Ok(())
}

/// Write a word to an optional guest pointer
pub(crate) fn write_optional(memory: &MemorySystem, address: u32, value: u32) -> Result<(), KernelError> {
    if address != 0 {
        memory.write_u32(address, value)?;
    }
    Ok(())
}
