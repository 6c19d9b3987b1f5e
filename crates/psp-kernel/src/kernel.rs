//! Kernel state container and dispatch loop entry point

use crate::callback::{CallbackDelivery, CallbackInvocation};
use crate::objects::ObjectManager;
use crate::partition::{Partition, PartitionId};
use crate::scheduler::ReadyQueue;
use crate::thread::{Thread, ThreadId, ThreadStatus};
use crate::time::Clock;
use psp_core::config::KernelConfig;
use psp_core::cpu::{ContextId, ContextStore, ExecutionContexts};
use psp_core::error::KernelError;
use psp_memory::MemorySystem;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What the engine should do with the dispatched context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchAction {
    /// Continue the thread where it left off
    Resume,
    /// Run a callback on the thread's context, then report back through
    /// [`Kernel::finish_callback`]. The kernel saves the context's registers
    /// first and puts them back when the callback finishes.
    RunCallback(CallbackInvocation),
}

/// Thread picked by [`Kernel::dispatch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub thread: ThreadId,
    pub context: ContextId,
    pub action: DispatchAction,
}

/// The HLE kernel
///
/// Owns every kernel object, the memory partitions, the thread table and
/// the ready queue. All mutation goes through `&mut Kernel` on the thread
/// that runs the dispatch loop.
pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) memory: Arc<MemorySystem>,
    pub(crate) cpu: Box<dyn ExecutionContexts>,
    pub(crate) objects: ObjectManager,
    pub(crate) partitions: BTreeMap<PartitionId, Partition>,
    /// Started threads, in start order
    pub(crate) threads: Vec<ThreadId>,
    pub(crate) ready: ReadyQueue,
    pub(crate) current: Option<ThreadId>,
    pub(crate) clock: Clock,
    /// Callback currently running on a thread's context
    pub(crate) delivering: Option<CallbackDelivery>,
}

impl Kernel {
    /// Create a kernel over the given memory and CPU engine
    pub fn new(config: &KernelConfig, memory: Arc<MemorySystem>, cpu: Box<dyn ExecutionContexts>) -> Self {
        let mut partitions = BTreeMap::new();
        for p in &config.partitions {
            tracing::debug!(
                "Partition {} '{}' at 0x{:08x} (0x{:x} bytes)",
                p.id,
                p.name,
                p.base,
                p.size
            );
            if partitions
                .insert(p.id, Partition::new(p.id, &p.name, p.base, p.size))
                .is_some()
            {
                tracing::warn!("Partition {} configured twice, keeping the last one", p.id);
            }
        }

        Self {
            config: config.clone(),
            memory,
            cpu,
            objects: ObjectManager::new(),
            partitions,
            threads: Vec::new(),
            ready: ReadyQueue::new(),
            current: None,
            clock: Clock::new(),
            delivering: None,
        }
    }

    /// Kernel with the default layout and an in-process context store
    pub fn with_defaults() -> Self {
        Self::new(
            &KernelConfig::default(),
            MemorySystem::new(),
            Box::new(ContextStore::new()),
        )
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn memory(&self) -> &Arc<MemorySystem> {
        &self.memory
    }

    pub fn cpu(&self) -> &dyn ExecutionContexts {
        self.cpu.as_ref()
    }

    pub fn cpu_mut(&mut self) -> &mut dyn ExecutionContexts {
        self.cpu.as_mut()
    }

    pub fn objects(&self) -> &ObjectManager {
        &self.objects
    }

    pub fn partition(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.get(&id)
    }

    pub fn partition_mut(&mut self, id: PartitionId) -> Result<&mut Partition, KernelError> {
        self.partitions
            .get_mut(&id)
            .ok_or(KernelError::IllegalPartition(id))
    }

    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values()
    }

    /// Started threads that have not been deleted
    pub fn thread_table(&self) -> &[ThreadId] {
        &self.threads
    }

    pub fn ready_queue(&self) -> &ReadyQueue {
        &self.ready
    }

    /// Current tick count
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Look up a thread
    pub fn thread(&self, id: ThreadId) -> Result<Arc<Thread>, KernelError> {
        self.objects.get::<Thread>(id)
    }

    /// Thread the CPU is running, if any
    pub fn current_thread(&self) -> Option<ThreadId> {
        self.current
    }

    /// Current thread, or `IllegalContext` outside thread context
    pub fn current_thread_id(&self) -> Result<ThreadId, KernelError> {
        self.current.ok_or(KernelError::IllegalContext)
    }

    /// Map the guest's "0 means me" convention
    pub fn resolve_thread(&self, id: ThreadId) -> Result<ThreadId, KernelError> {
        if id == 0 {
            self.current_thread_id()
        } else {
            Ok(id)
        }
    }

    /// Pick the next thread to run.
    ///
    /// Pending callbacks of threads in callback-aware waits go first. Otherwise
    /// the running thread is put back in the ready queue (so only a strictly
    /// higher-priority thread displaces it) and the queue head runs.
    pub fn dispatch(&mut self) -> Option<Dispatch> {
        if let Some(delivery) = &self.delivering {
            tracing::warn!(
                "Dispatch while callback 0x{:x} still runs on thread 0x{:x}",
                delivery.callback,
                delivery.thread
            );
            return None;
        }

        self.preempt_current();

        if let Some(dispatch) = self.next_callback_delivery() {
            return Some(dispatch);
        }

        while let Some(entry) = self.ready.pop_head() {
            let thread = match self.thread(entry.thread) {
                Ok(thread) => thread,
                Err(_) => {
                    tracing::error!("Ready queue held unknown thread 0x{:x}", entry.thread);
                    continue;
                }
            };

            let context = {
                let mut inner = thread.inner();
                inner.status = ThreadStatus::RUNNING;
                inner.context
            };
            match context {
                Some(context) => {
                    self.current = Some(entry.thread);
                    tracing::trace!("Dispatching thread 0x{:x}", entry.thread);
                    return Some(Dispatch {
                        thread: entry.thread,
                        context,
                        action: DispatchAction::Resume,
                    });
                }
                None => tracing::error!("Ready thread 0x{:x} has no context", entry.thread),
            }
        }

        None
    }

    /// Move the running thread back to the ready queue
    fn preempt_current(&mut self) {
        let Some(id) = self.current.take() else {
            return;
        };
        let Ok(thread) = self.thread(id) else {
            return;
        };

        let priority = {
            let mut inner = thread.inner();
            if inner.status != ThreadStatus::RUNNING {
                return;
            }
            inner.status = ThreadStatus::READY;
            inner.priority
        };
        self.schedule(id, priority);
    }

    /// Put a thread in the ready queue. A thread that is already queued
    /// keeps its slot.
    pub(crate) fn schedule(&mut self, id: ThreadId, priority: u32) {
        if let Err(e) = self.ready.insert(id, priority) {
            tracing::error!("Skipping ready queue insert: {}", e);
        }
    }
}
