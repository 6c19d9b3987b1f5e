//! Guest memory for the oxidized-psp HLE kernel
//!
//! This crate owns the host buffers behind the PSP physical address
//! ranges (main memory, video memory, scratchpad) and translates guest
//! addresses into them.

pub mod constants;
pub mod manager;

pub use constants::*;
pub use manager::{HostAddress, MemoryRegion, MemorySystem, RegionKind};
