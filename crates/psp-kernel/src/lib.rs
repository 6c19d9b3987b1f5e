//! PSP kernel emulation (HLE) for oxidized-psp
//!
//! This crate reproduces the PSP operating system personality (threads,
//! priorities, synchronization primitives and memory partitions) at the
//! syscall level, without running any of the OS machine code.

pub mod callback;
pub mod kernel;
pub mod memory;
pub mod objects;
pub mod partition;
pub mod scheduler;
pub mod sync;
pub mod syscall;
pub mod syscall_numbers;
pub mod thread;
pub mod time;
pub mod wait;

pub use kernel::{Dispatch, DispatchAction, Kernel};
pub use objects::{ObjectId, ObjectManager};
pub use partition::{AllocDirection, MemoryBlock, Partition};
pub use scheduler::ReadyQueue;
pub use syscall::{SyscallArgs, SyscallHandler, SyscallReturn};
pub use thread::{Thread, ThreadId, ThreadStatus};
pub use wait::{WaitDescriptor, WaitKind, WaitOutcome};
