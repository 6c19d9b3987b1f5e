//! Guest time
//!
//! The kernel keeps its own deterministic clock. One tick is one
//! microsecond of guest time and only the dispatch loop moves it.

/// Ticks per second of guest time
pub const TICKS_PER_SECOND: u64 = 1_000_000;

/// Monotonic tick counter
#[derive(Debug, Default, Clone, Copy)]
pub struct Clock {
    now: u64,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current tick count
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn advance(&mut self, ticks: u64) -> u64 {
        self.now = self.now.saturating_add(ticks);
        self.now
    }
}

/// Time syscall implementations
pub mod syscalls {
    use crate::kernel::Kernel;

    /// sceKernelGetSystemTimeLow
    pub fn sce_kernel_get_system_time_low(kernel: &Kernel) -> u32 {
        kernel.now() as u32
    }

    /// sceKernelGetSystemTimeWide
    pub fn sce_kernel_get_system_time_wide(kernel: &Kernel) -> u64 {
        kernel.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advance() {
        let mut clock = Clock::new();
        assert_eq!(clock.now(), 0);
        assert_eq!(clock.advance(150), 150);
        clock.advance(u64::MAX);
        assert_eq!(clock.now(), u64::MAX);
    }
}
