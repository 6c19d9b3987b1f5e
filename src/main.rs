//! oxidized-psp - PSP HLE kernel host
//!
//! Boots the kernel with the configured memory layout and starts the guest
//! main thread. Without an execution engine attached the thread only gets
//! a context in the in-process store, which is enough to check a layout.

use anyhow::Context;
use psp_core::config::Config;
use psp_core::{logging, ContextStore};
use psp_kernel::thread::ThreadAttributes;
use psp_kernel::{DispatchAction, Kernel};
use psp_memory::MemorySystem;
use std::path::PathBuf;

fn load_config() -> anyhow::Result<Config> {
    match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => Config::load_from(&path).with_context(|| format!("loading {}", path.display())),
        None => Ok(Config::load()?),
    }
}

fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    logging::init(&config.debug)?;

    tracing::info!("Starting oxidized-psp HLE kernel");

    let memory = MemorySystem::with_config(&config.memory);
    for region in memory.regions() {
        tracing::debug!("Guest region {:?} at 0x{:08x} (0x{:x} bytes)", region.kind, region.base, region.size);
    }

    let mut kernel = Kernel::new(&config.kernel, memory, Box::new(ContextStore::new()));
    let main = kernel
        .create_thread(
            "user_main",
            config.kernel.module_entry,
            0x20,
            config.kernel.default_stack_size,
            ThreadAttributes::USER,
        )
        .context("creating the main thread")?;
    kernel.start_thread(main, 0, 0).context("starting the main thread")?;

    match kernel.dispatch() {
        Some(dispatch) if dispatch.action == DispatchAction::Resume => {
            tracing::info!("Main thread 0x{:x} runs on context {}", dispatch.thread, dispatch.context);
        }
        other => anyhow::bail!("main thread was not dispatched: {:?}", other),
    }

    for partition in kernel.partitions() {
        tracing::info!(
            "Partition {} '{}': 0x{:x} of 0x{:x} bytes free",
            partition.id(),
            partition.name(),
            partition.free_bytes(),
            partition.size()
        );
    }

    Ok(())
}
