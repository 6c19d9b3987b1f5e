//! Memory layout constants

/// Mask applied to every guest address before translation.
/// Strips the cache/kernel mirror bits.
pub const ADDRESS_MASK: u32 = 0x3FFF_FFFF;

/// Main memory base address
pub const MAIN_MEM_BASE: u32 = 0x0800_0000;
/// Main memory size (32 MiB)
pub const MAIN_MEM_SIZE: u32 = 0x0200_0000;

/// Video memory base address
pub const VIDEO_MEM_BASE: u32 = 0x0400_0000;
/// Video memory size (2 MiB)
pub const VIDEO_MEM_SIZE: u32 = 0x0020_0000;

/// Scratchpad base address
pub const SCRATCHPAD_BASE: u32 = 0x0001_0000;
/// Scratchpad size (16 KiB)
pub const SCRATCHPAD_SIZE: u32 = 0x0000_4000;

/// Longest C string the kernel will read out of guest memory
pub const MAX_CSTRING_LEN: u32 = 0x100;
