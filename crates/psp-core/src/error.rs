//! Error types for the oxidized-psp kernel

use thiserror::Error;

/// Main error type for the host side of the emulator
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Unsupported feature: {0}")]
    Unsupported(String),
}

/// Guest memory errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Out of memory")]
    OutOfMemory,

    #[error("Invalid address: 0x{0:08x}")]
    InvalidAddress(u32),

    #[error("Access of {len} bytes at 0x{addr:08x} crosses the end of its region")]
    OutOfBounds { addr: u32, len: u32 },
}

/// Kernel errors
///
/// Every variant maps onto the status code the real OS hands back to the
/// guest, see [`KernelError::code`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    // Unknown ids
    #[error("Unknown thread id: 0x{0:x}")]
    UnknownThread(u32),

    #[error("Unknown semaphore id: 0x{0:x}")]
    UnknownSemaphore(u32),

    #[error("Unknown event flag id: 0x{0:x}")]
    UnknownEventFlag(u32),

    #[error("Unknown message pipe id: 0x{0:x}")]
    UnknownMessagePipe(u32),

    #[error("Unknown callback id: 0x{0:x}")]
    UnknownCallback(u32),

    #[error("Unknown mutex id: 0x{0:x}")]
    UnknownMutex(u32),

    #[error("Unknown memory block id: 0x{0:x}")]
    UnknownMemoryBlock(u32),

    // Bad arguments
    #[error("Illegal argument")]
    IllegalArgument,

    #[error("Illegal priority: {0}")]
    IllegalPriority(i32),

    #[error("Illegal stack size: 0x{0:x}")]
    IllegalStackSize(u32),

    #[error("Illegal thread for this operation: 0x{0:x}")]
    IllegalThread(u32),

    #[error("Illegal partition: {0}")]
    IllegalPartition(u32),

    #[error("Illegal size: 0x{0:x}")]
    IllegalSize(u32),

    #[error("Illegal count: {0}")]
    IllegalCount(i32),

    #[error("Illegal memory size: 0x{0:x}")]
    IllegalMemSize(u32),

    #[error("Illegal memory block at 0x{0:08x}")]
    IllegalMemBlock(u32),

    #[error("Operation not allowed outside a thread context")]
    IllegalContext,

    #[error("Guest memory fault: {0}")]
    Memory(#[from] MemoryError),

    // Resources
    #[error("Out of memory")]
    OutOfMemory,

    #[error("Resource busy")]
    ResourceBusy,

    // Wait results
    #[error("Wait timed out")]
    Timeout,

    #[error("Wait cancelled")]
    WaitCancelled,

    #[error("Waited object was deleted")]
    WaitDeleted,

    #[error("Not implemented")]
    NotImplemented,

    // Thread state
    #[error("Thread is dormant")]
    Dormant,

    #[error("Thread is not dormant")]
    NotDormant,

    #[error("Thread is suspended")]
    Suspended,

    #[error("Thread is not suspended")]
    NotSuspended,

    // Object state
    #[error("Semaphore count is zero")]
    SemaZero,

    #[error("Semaphore count overflow")]
    SemaOverflow,

    #[error("Event flag condition not satisfied")]
    EvfCond,

    #[error("Event flag does not allow multiple waiters")]
    EvfMulti,

    #[error("Illegal event flag pattern")]
    EvfIlpat,

    #[error("Message pipe is full")]
    MppFull,

    #[error("Message pipe is empty")]
    MppEmpty,

    #[error("Mutex is locked")]
    MutexLocked,

    #[error("Mutex is not locked")]
    MutexUnlocked,

    #[error("Mutex lock count overflow")]
    MutexLockOverflow,

    #[error("Mutex unlock count underflow")]
    MutexUnlockUnderflow,

    #[error("Mutex does not allow recursive locking")]
    MutexRecursive,

    /// Internal scheduler anomaly. Logged and skipped, never returned to a guest.
    #[error("Thread 0x{0:x} is already scheduled")]
    AlreadyScheduled(u32),
}

/// Status code returned to the guest for unimplemented syscalls
pub const NOT_IMPLEMENTED_STATUS: i32 = 0x8002_0002_u32 as i32;

impl KernelError {
    /// Guest-visible status code for this error
    pub fn code(&self) -> i32 {
        let code: u32 = match self {
            Self::UnknownThread(_) => 0x8002_0198,
            Self::UnknownSemaphore(_) => 0x8002_0199,
            Self::UnknownEventFlag(_) => 0x8002_019A,
            Self::UnknownMessagePipe(_) => 0x8002_019E,
            Self::UnknownCallback(_) => 0x8002_01A1,
            Self::UnknownMutex(_) => 0x8002_01C3,
            Self::UnknownMemoryBlock(_) => 0x8002_00CB,
            Self::IllegalArgument => 0x8002_00D2,
            Self::IllegalPriority(_) => 0x8002_0193,
            Self::IllegalStackSize(_) => 0x8002_0194,
            Self::IllegalThread(_) => 0x8002_0197,
            Self::IllegalPartition(_) => 0x8002_00D6,
            Self::IllegalSize(_) => 0x8002_01BC,
            Self::IllegalCount(_) => 0x8002_01BD,
            Self::IllegalMemSize(_) => 0x8002_01B7,
            Self::IllegalMemBlock(_) => 0x8002_01B6,
            Self::IllegalContext => 0x8002_0064,
            Self::Memory(MemoryError::OutOfMemory) => 0x8002_0190,
            Self::Memory(_) => 0x8002_00D3,
            Self::OutOfMemory => 0x8002_0190,
            Self::ResourceBusy => 0x8001_0010,
            Self::Timeout => 0x8002_01A8,
            Self::WaitCancelled => 0x8002_01A9,
            Self::WaitDeleted => 0x8002_01B5,
            Self::NotImplemented => return NOT_IMPLEMENTED_STATUS,
            Self::Dormant => 0x8002_01A2,
            Self::NotDormant => 0x8002_01A4,
            Self::Suspended => 0x8002_01A3,
            Self::NotSuspended => 0x8002_01A5,
            Self::SemaZero => 0x8002_01AD,
            Self::SemaOverflow => 0x8002_01AE,
            Self::EvfCond => 0x8002_01AF,
            Self::EvfMulti => 0x8002_01B0,
            Self::EvfIlpat => 0x8002_01B1,
            Self::MppFull => 0x8002_01B3,
            Self::MppEmpty => 0x8002_01B4,
            Self::MutexLocked => 0x8002_01C4,
            Self::MutexUnlocked => 0x8002_01C5,
            Self::MutexLockOverflow => 0x8002_01C6,
            Self::MutexUnlockUnderflow => 0x8002_01C7,
            Self::MutexRecursive => 0x8002_01C8,
            // Never surfaces to the guest; report a generic kernel error if it does.
            Self::AlreadyScheduled(_) => 0x8002_0001,
        };
        code as i32
    }

    /// True for the "unknown id" family of errors
    pub fn is_invalid_handle(&self) -> bool {
        matches!(
            self,
            Self::UnknownThread(_)
                | Self::UnknownSemaphore(_)
                | Self::UnknownEventFlag(_)
                | Self::UnknownMessagePipe(_)
                | Self::UnknownCallback(_)
                | Self::UnknownMutex(_)
                | Self::UnknownMemoryBlock(_)
        )
    }
}

/// Result type alias for host-side operations
pub type Result<T> = std::result::Result<T, EmulatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MemoryError::InvalidAddress(0x12345678);
        assert_eq!(format!("{}", err), "Invalid address: 0x12345678");

        let err = KernelError::UnknownMessagePipe(0x42);
        assert_eq!(format!("{}", err), "Unknown message pipe id: 0x42");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(KernelError::Timeout.code() as u32, 0x8002_01A8);
        assert_eq!(KernelError::UnknownMessagePipe(1).code() as u32, 0x8002_019E);
        assert_eq!(KernelError::OutOfMemory.code() as u32, 0x8002_0190);
        assert_eq!(KernelError::NotImplemented.code(), NOT_IMPLEMENTED_STATUS);
        assert!(KernelError::ResourceBusy.code() < 0);
    }

    #[test]
    fn test_memory_error_codes() {
        let err: KernelError = MemoryError::InvalidAddress(0).into();
        assert_eq!(err.code() as u32, 0x8002_00D3);
        let err: KernelError = MemoryError::OutOfMemory.into();
        assert_eq!(err.code(), KernelError::OutOfMemory.code());
    }

    #[test]
    fn test_invalid_handle_family() {
        assert!(KernelError::UnknownThread(3).is_invalid_handle());
        assert!(KernelError::UnknownMemoryBlock(3).is_invalid_handle());
        assert!(!KernelError::Timeout.is_invalid_handle());
    }

    #[test]
    fn test_error_conversion() {
        let emu_err: EmulatorError = KernelError::ResourceBusy.into();
        assert!(matches!(emu_err, EmulatorError::Kernel(_)));

        let emu_err: EmulatorError = MemoryError::OutOfMemory.into();
        assert!(matches!(emu_err, EmulatorError::Memory(_)));
    }
}
