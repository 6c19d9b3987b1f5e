//! Contract between the kernel and the CPU execution engine
//!
//! The kernel never runs guest code itself. It asks the engine for an
//! execution context when a thread starts, pokes result registers when a
//! waiting thread wakes, and hands the context back when the thread dies.

use std::collections::HashMap;

/// Opaque handle to an execution context owned by the engine
pub type ContextId = u32;

/// Number of general purpose registers in a context
pub const NUM_REGISTERS: usize = 32;

/// MIPS register indices used by the kernel
pub mod regs {
    pub const V0: usize = 2;
    pub const A0: usize = 4;
    pub const A1: usize = 5;
    pub const A2: usize = 6;
    pub const A3: usize = 7;
    pub const T0: usize = 8;
    pub const K0: usize = 26;
    pub const GP: usize = 28;
    pub const SP: usize = 29;
    pub const RA: usize = 31;
}

/// Execution context management offered by the CPU engine
pub trait ExecutionContexts: Send {
    /// Create a context that will start at `entry` with the given registers
    fn allocate_context(&mut self, entry: u32, registers: &[u32; NUM_REGISTERS]) -> ContextId;

    /// Destroy a context. Unknown ids are ignored.
    fn release_context(&mut self, context: ContextId);

    /// Write one general purpose register of a context
    fn set_register(&mut self, context: ContextId, index: usize, value: u32);

    /// Read one general purpose register of a context, 0 if unknown
    fn register(&self, context: ContextId, index: usize) -> u32;
}

/// Saved state of one context in a [`ContextStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedContext {
    pub entry: u32,
    pub registers: [u32; NUM_REGISTERS],
}

/// In-process context table, used when no execution engine is attached
#[derive(Debug, Default)]
pub struct ContextStore {
    contexts: HashMap<ContextId, SavedContext>,
    next_id: ContextId,
}

impl ContextStore {
    pub fn new() -> Self {
        Self {
            contexts: HashMap::new(),
            next_id: 1,
        }
    }

    /// Look up a context
    pub fn get(&self, context: ContextId) -> Option<&SavedContext> {
        self.contexts.get(&context)
    }

    /// Number of live contexts
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

impl ExecutionContexts for ContextStore {
    fn allocate_context(&mut self, entry: u32, registers: &[u32; NUM_REGISTERS]) -> ContextId {
        let id = self.next_id.max(1);
        self.next_id = id.wrapping_add(1);
        self.contexts.insert(
            id,
            SavedContext {
                entry,
                registers: *registers,
            },
        );
        tracing::trace!("Allocated context {} at entry 0x{:08x}", id, entry);
        id
    }

    fn release_context(&mut self, context: ContextId) {
        if self.contexts.remove(&context).is_none() {
            tracing::warn!("Release of unknown context {}", context);
        }
    }

    fn set_register(&mut self, context: ContextId, index: usize, value: u32) {
        match self.contexts.get_mut(&context) {
            Some(saved) if index < NUM_REGISTERS => saved.registers[index] = value,
            Some(_) => tracing::warn!("Register index {} out of range", index),
            None => tracing::warn!("set_register on unknown context {}", context),
        }
    }

    fn register(&self, context: ContextId, index: usize) -> u32 {
        self.contexts
            .get(&context)
            .and_then(|c| c.registers.get(index).copied())
            .unwrap_or(0)
    }
}
