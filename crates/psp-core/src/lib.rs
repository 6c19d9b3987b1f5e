//! Core types for the oxidized-psp HLE kernel
//!
//! This crate provides the foundational types, error handling,
//! configuration, and logging infrastructure shared by the memory
//! system and the kernel, plus the contract the CPU execution engine
//! implements for the kernel.

pub mod config;
pub mod cpu;
pub mod error;
pub mod logging;

pub use config::Config;
pub use cpu::{ContextId, ContextStore, ExecutionContexts};
pub use error::{EmulatorError, KernelError, MemoryError, Result};
