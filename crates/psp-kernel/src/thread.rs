//! Thread management (sceKernel*Thread*)

use crate::kernel::Kernel;
use crate::objects::{KernelObject, ObjectId, ObjectKind, ObjectType};
use crate::partition::{AllocDirection, MemoryBlock};
use crate::wait::{WaitDescriptor, WaitKind, WaitOutcome};
use bitflags::bitflags;
use parking_lot::{Mutex, MutexGuard};
use psp_core::cpu::{regs, ContextId, NUM_REGISTERS};
use psp_core::error::KernelError;
use std::collections::VecDeque;
use std::sync::Arc;

/// Thread ID type
pub type ThreadId = ObjectId;

/// Valid thread priorities; lower values run first
pub const PRIORITY_MIN: u32 = 1;
pub const PRIORITY_MAX: u32 = 126;

/// Stack and TLS placement granularity
pub const STACK_ALIGNMENT: u32 = 0x100;

/// Exit status recorded for threads killed by another thread
pub const TERMINATED_EXIT_STATUS: i32 = 0x8002_01AC_u32 as i32;

bitflags! {
    /// Thread state bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ThreadStatus: u32 {
        const RUNNING   = 0x01;
        const READY     = 0x02;
        const WAITING   = 0x04;
        const SUSPENDED = 0x08;
        /// Dormant: created or exited
        const STOPPED   = 0x10;
        const DEAD      = 0x20;

        const WAIT_SUSPENDED = Self::WAITING.bits() | Self::SUSPENDED.bits();
    }
}

bitflags! {
    /// Thread creation attributes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ThreadAttributes: u32 {
        const VFPU          = 0x0000_4000;
        const SCRATCH_SRAM  = 0x0000_8000;
        const NO_FILL_STACK = 0x0010_0000;
        const CLEAR_STACK   = 0x0020_0000;
        const USER          = 0x8000_0000;
        const USBWLAN       = 0xA000_0000;
        const VSH           = 0xC000_0000;
    }
}

/// A guest thread
pub struct Thread {
    id: ThreadId,
    name: String,
    entry: u32,
    attributes: ThreadAttributes,
    initial_priority: u32,
    inner: Mutex<ThreadInner>,
}

/// Mutable thread state
#[derive(Debug)]
pub struct ThreadInner {
    pub status: ThreadStatus,
    pub priority: u32,
    pub gp: u32,
    pub exit_code: i32,
    pub stack: Option<MemoryBlock>,
    pub tls: Option<MemoryBlock>,
    pub context: Option<ContextId>,
    pub wait: Option<WaitDescriptor>,
    /// Threads joined on this one, in arrival order
    pub exit_waiters: VecDeque<ThreadId>,
    pub wakeup_count: u32,
    /// Callbacks owned by this thread
    pub callbacks: Vec<ObjectId>,
    /// Run pending callbacks at the next dispatch even though not waiting
    pub check_callbacks: bool,
    /// Result handed over by the last wake
    pub wake_result: i32,
}

impl Thread {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ThreadId,
        name: &str,
        entry: u32,
        priority: u32,
        attributes: ThreadAttributes,
        stack: MemoryBlock,
        tls: Option<MemoryBlock>,
        gp: u32,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            entry,
            attributes,
            initial_priority: priority,
            inner: Mutex::new(ThreadInner {
                status: ThreadStatus::STOPPED,
                priority,
                gp,
                exit_code: 0,
                stack: Some(stack),
                tls,
                context: None,
                wait: None,
                exit_waiters: VecDeque::new(),
                wakeup_count: 0,
                callbacks: Vec::new(),
                check_callbacks: false,
                wake_result: 0,
            }),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn entry(&self) -> u32 {
        self.entry
    }

    pub fn attributes(&self) -> ThreadAttributes {
        self.attributes
    }

    pub fn initial_priority(&self) -> u32 {
        self.initial_priority
    }

    /// Lock the mutable state
    pub fn inner(&self) -> MutexGuard<'_, ThreadInner> {
        self.inner.lock()
    }

    pub fn status(&self) -> ThreadStatus {
        self.inner.lock().status
    }

    pub fn priority(&self) -> u32 {
        self.inner.lock().priority
    }

    pub fn gp(&self) -> u32 {
        self.inner.lock().gp
    }

    pub fn exit_code(&self) -> i32 {
        self.inner.lock().exit_code
    }

    pub fn context(&self) -> Option<ContextId> {
        self.inner.lock().context
    }

    pub fn wait_kind(&self) -> Option<WaitKind> {
        self.inner.lock().wait.as_ref().map(|w| w.kind)
    }

    pub fn wake_result(&self) -> i32 {
        self.inner.lock().wake_result
    }

    pub fn stack_block(&self) -> Option<MemoryBlock> {
        self.inner.lock().stack.clone()
    }

    pub fn tls_block(&self) -> Option<MemoryBlock> {
        self.inner.lock().tls.clone()
    }

    pub fn exit_waiter_count(&self) -> usize {
        self.inner.lock().exit_waiters.len()
    }

    pub fn is_dormant(&self) -> bool {
        self.status()
            .intersects(ThreadStatus::STOPPED | ThreadStatus::DEAD)
    }
}

impl ObjectKind for Thread {
    const TYPE: ObjectType = ObjectType::Thread;
}

impl KernelObject for Thread {
    fn object_type(&self) -> ObjectType {
        ObjectType::Thread
    }

    fn id(&self) -> ObjectId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn remove_waiter(&self, thread: ThreadId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.exit_waiters.len();
        inner.exit_waiters.retain(|&t| t != thread);
        inner.exit_waiters.len() != before
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

fn check_priority(priority: u32) -> Result<(), KernelError> {
    if (PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
        Ok(())
    } else {
        Err(KernelError::IllegalPriority(priority as i32))
    }
}

impl Kernel {
    /// Create a dormant thread with its stack and TLS block
    pub fn create_thread(
        &mut self,
        name: &str,
        entry: u32,
        priority: u32,
        stack_size: u32,
        attributes: ThreadAttributes,
    ) -> Result<ThreadId, KernelError> {
        check_priority(priority)?;
        if stack_size < self.config.min_stack_size {
            return Err(KernelError::IllegalStackSize(stack_size));
        }
        let stack_size = stack_size
            .checked_add(STACK_ALIGNMENT - 1)
            .ok_or(KernelError::IllegalStackSize(stack_size))?
            & !(STACK_ALIGNMENT - 1);

        let gp = self
            .current
            .and_then(|id| self.thread(id).ok())
            .map(|t| t.gp())
            .unwrap_or(self.config.module_gp);
        let tls_size = self.config.tls_size;
        let partition = self.partition_mut(self.config.thread_partition)?;

        let stack = partition.allocate(
            &format!("stack:{}", name),
            AllocDirection::High,
            STACK_ALIGNMENT,
            stack_size,
        )?;
        let tls = if tls_size > 0 {
            match partition.allocate(&format!("tls:{}", name), AllocDirection::High, STACK_ALIGNMENT, tls_size) {
                Ok(block) => Some(block),
                Err(e) => {
                    partition.free(&stack)?;
                    return Err(e);
                }
            }
        } else {
            None
        };

        if !attributes.contains(ThreadAttributes::NO_FILL_STACK) {
            if let Err(e) = self.memory.fill(stack.address, 0xFF, stack.size) {
                tracing::warn!("Stack of '{}' is outside guest memory: {}", name, e);
            }
        }

        let id = self.objects.next_id();
        tracing::debug!(
            "Created thread '{}' (0x{:x}) entry 0x{:08x} priority {} stack 0x{:08x}+0x{:x}",
            name,
            id,
            entry,
            priority,
            stack.address,
            stack.size
        );
        let thread = Arc::new(Thread::new(id, name, entry, priority, attributes, stack, tls, gp));
        self.objects.register(thread);
        Ok(id)
    }

    /// Make a dormant thread runnable
    pub fn start_thread(&mut self, id: ThreadId, arg_len: u32, arg_ptr: u32) -> Result<(), KernelError> {
        let thread = self.thread(id)?;

        let (registers, priority) = {
            let inner = thread.inner();
            if inner.status != ThreadStatus::STOPPED {
                return Err(KernelError::NotDormant);
            }
            let mut registers = [0u32; NUM_REGISTERS];
            registers[regs::A0] = arg_len;
            registers[regs::A1] = arg_ptr;
            registers[regs::A2] = 0;
            registers[regs::K0] = inner.tls.as_ref().map(|b| b.address).unwrap_or(0);
            registers[regs::GP] = inner.gp;
            registers[regs::SP] = inner.stack.as_ref().map(|b| b.upper_bound()).unwrap_or(0);
            (registers, inner.priority)
        };

        let context = self.cpu.allocate_context(thread.entry(), &registers);
        {
            let mut inner = thread.inner();
            inner.context = Some(context);
            inner.status = ThreadStatus::READY;
        }

        if !self.threads.contains(&id) {
            self.threads.push(id);
        }
        self.schedule(id, priority);
        tracing::info!(
            "Started thread '{}' (0x{:x}) at 0x{:08x}",
            thread.name(),
            id,
            thread.entry()
        );
        Ok(())
    }

    /// Kill a thread and release everyone joined on it. Exiting a dead thread is a no-op.
    pub fn exit_thread(&mut self, id: ThreadId, exit_code: i32) -> Result<(), KernelError> {
        let thread = self.thread(id)?;

        let (waiters, abandoned) = {
            let mut inner = thread.inner();
            if inner.status.contains(ThreadStatus::DEAD) {
                return Ok(());
            }
            inner.status = ThreadStatus::DEAD;
            inner.exit_code = exit_code;
            (std::mem::take(&mut inner.exit_waiters), inner.wait.take())
        };

        self.ready.remove(id);
        if let Some(wait) = abandoned {
            self.detach_waiter(id, &wait);
        }
        if self.current == Some(id) {
            self.current = None;
        }
        tracing::info!("Thread '{}' (0x{:x}) exited with 0x{:x}", thread.name(), id, exit_code);

        self.wake_all(waiters, 0);
        Ok(())
    }

    /// Exit if needed, then free the thread's memory and context
    pub fn delete_thread(&mut self, id: ThreadId) -> Result<(), KernelError> {
        let thread = self.thread(id)?;
        self.exit_thread(id, 0)?;

        let (stack, tls, context, callbacks) = {
            let mut inner = thread.inner();
            (
                inner.stack.take(),
                inner.tls.take(),
                inner.context.take(),
                std::mem::take(&mut inner.callbacks),
            )
        };

        if let Some(stack) = &stack {
            if thread.attributes().contains(ThreadAttributes::CLEAR_STACK) {
                if let Err(e) = self.memory.fill(stack.address, 0, stack.size) {
                    tracing::warn!("Cannot clear stack of '{}': {}", thread.name(), e);
                }
            }
        }
        let partition = self.partition_mut(self.config.thread_partition)?;
        for block in stack.iter().chain(tls.iter()) {
            partition.free(block)?;
        }

        if let Some(context) = context {
            self.cpu.release_context(context);
        }
        for callback in callbacks {
            self.remove_callback(callback);
        }

        self.objects.unregister::<Thread>(id)?;
        self.threads.retain(|&t| t != id);
        tracing::debug!("Deleted thread '{}' (0x{:x})", thread.name(), id);
        Ok(())
    }

    /// Change a thread's current priority
    pub fn change_thread_priority(&mut self, id: ThreadId, priority: u32) -> Result<(), KernelError> {
        check_priority(priority)?;
        let thread = self.thread(id)?;

        let status = {
            let mut inner = thread.inner();
            if inner.status.contains(ThreadStatus::DEAD) {
                return Err(KernelError::Dormant);
            }
            inner.priority = priority;
            inner.status
        };

        if status == ThreadStatus::READY {
            self.ready.remove(id);
            self.schedule(id, priority);
        }
        Ok(())
    }

    /// Put a thread on hold. A waiting thread keeps waiting.
    pub fn suspend_thread(&mut self, id: ThreadId) -> Result<(), KernelError> {
        if self.current == Some(id) {
            return Err(KernelError::IllegalThread(id));
        }
        let thread = self.thread(id)?;

        {
            let mut inner = thread.inner();
            if inner.status.intersects(ThreadStatus::STOPPED | ThreadStatus::DEAD) {
                return Err(KernelError::Dormant);
            }
            if inner.status.contains(ThreadStatus::SUSPENDED) {
                return Err(KernelError::Suspended);
            }
            if inner.status.contains(ThreadStatus::WAITING) {
                inner.status = ThreadStatus::WAIT_SUSPENDED;
            } else {
                inner.status = ThreadStatus::SUSPENDED;
            }
        }

        self.ready.remove(id);
        tracing::debug!("Suspended thread 0x{:x}", id);
        Ok(())
    }

    /// Undo [`Kernel::suspend_thread`]
    pub fn resume_thread(&mut self, id: ThreadId) -> Result<(), KernelError> {
        let thread = self.thread(id)?;

        let runnable = {
            let mut inner = thread.inner();
            if !inner.status.contains(ThreadStatus::SUSPENDED) {
                return Err(KernelError::NotSuspended);
            }
            inner.status.remove(ThreadStatus::SUSPENDED);
            if inner.status.is_empty() {
                inner.status = ThreadStatus::READY;
                Some(inner.priority)
            } else {
                None
            }
        };

        if let Some(priority) = runnable {
            self.schedule(id, priority);
        }
        tracing::debug!("Resumed thread 0x{:x}", id);
        Ok(())
    }

    /// Sleep until woken; consumes a pending wakeup instead if there is one
    pub fn sleep_thread(&mut self, callbacks: bool) -> Result<WaitOutcome<i32>, KernelError> {
        let id = self.current_thread_id()?;
        let thread = self.thread(id)?;
        {
            let mut inner = thread.inner();
            if inner.wakeup_count > 0 {
                inner.wakeup_count -= 1;
                return Ok(WaitOutcome::Completed(0));
            }
        }

        self.begin_wait(WaitDescriptor::new(WaitKind::Sleep, 0).with_callbacks(callbacks))?;
        Ok(WaitOutcome::Blocked)
    }

    /// Wake a sleeping thread, or bank the wakeup for its next sleep
    pub fn wakeup_thread(&mut self, id: ThreadId) -> Result<(), KernelError> {
        let thread = self.thread(id)?;

        let sleeping = {
            let mut inner = thread.inner();
            if inner.status.intersects(ThreadStatus::STOPPED | ThreadStatus::DEAD) {
                return Err(KernelError::Dormant);
            }
            let sleeping = matches!(inner.wait.as_ref(), Some(w) if w.kind == WaitKind::Sleep);
            if !sleeping {
                inner.wakeup_count += 1;
            }
            sleeping
        };

        if sleeping {
            self.wake_thread(id, 0);
        }
        Ok(())
    }

    /// Drop banked wakeups, returning how many there were
    pub fn cancel_wakeup(&mut self, id: ThreadId) -> Result<u32, KernelError> {
        let thread = self.thread(id)?;
        let mut inner = thread.inner();
        Ok(std::mem::take(&mut inner.wakeup_count))
    }

    /// Block the current thread for `ticks`
    pub fn delay_thread(&mut self, ticks: u64, callbacks: bool) -> Result<WaitOutcome<i32>, KernelError> {
        self.begin_wait(
            WaitDescriptor::new(WaitKind::Delay, 0)
                .with_timeout(ticks.max(1), 0)
                .with_callbacks(callbacks),
        )?;
        Ok(WaitOutcome::Blocked)
    }

    /// Wait for a thread to exit
    pub fn wait_thread_end(
        &mut self,
        id: ThreadId,
        timeout: u64,
        timeout_address: u32,
        callbacks: bool,
    ) -> Result<WaitOutcome<i32>, KernelError> {
        if self.current == Some(id) {
            return Err(KernelError::IllegalThread(id));
        }
        let target = self.thread(id)?;
        if target.is_dormant() {
            return Ok(WaitOutcome::Completed(0));
        }

        let me = self.begin_wait(
            WaitDescriptor::new(WaitKind::Join, id)
                .with_timeout(timeout, timeout_address)
                .with_callbacks(callbacks),
        )?;
        target.inner().exit_waiters.push_back(me);
        Ok(WaitOutcome::Blocked)
    }

    /// Kill another thread
    pub fn terminate_thread(&mut self, id: ThreadId) -> Result<(), KernelError> {
        if self.current == Some(id) {
            return Err(KernelError::IllegalThread(id));
        }
        let thread = self.thread(id)?;
        if thread.is_dormant() {
            return Err(KernelError::Dormant);
        }
        self.exit_thread(id, TERMINATED_EXIT_STATUS)
    }

    /// Exit code of a dormant thread
    pub fn thread_exit_status(&self, id: ThreadId) -> Result<i32, KernelError> {
        let thread = self.thread(id)?;
        if !thread.is_dormant() {
            return Err(KernelError::NotDormant);
        }
        Ok(thread.exit_code())
    }
}

/// Thread syscall implementations
pub mod syscalls {
    use super::*;

    /// sceKernelCreateThread
    pub fn sce_kernel_create_thread(
        kernel: &mut Kernel,
        name: &str,
        entry: u32,
        priority: u32,
        stack_size: u32,
        attributes: u32,
    ) -> Result<ThreadId, KernelError> {
        let attributes = ThreadAttributes::from_bits_retain(attributes);
        kernel.create_thread(name, entry, priority, stack_size, attributes)
    }

    /// sceKernelStartThread
    pub fn sce_kernel_start_thread(
        kernel: &mut Kernel,
        thread_id: ThreadId,
        arg_len: u32,
        arg_ptr: u32,
    ) -> Result<(), KernelError> {
        kernel.start_thread(thread_id, arg_len, arg_ptr)
    }

    /// sceKernelDeleteThread
    pub fn sce_kernel_delete_thread(kernel: &mut Kernel, thread_id: ThreadId) -> Result<(), KernelError> {
        if thread_id == 0 || kernel.current_thread() == Some(thread_id) {
            return Err(KernelError::IllegalThread(thread_id));
        }
        if !kernel.thread(thread_id)?.is_dormant() {
            return Err(KernelError::NotDormant);
        }
        kernel.delete_thread(thread_id)
    }

    /// sceKernelExitThread
    pub fn sce_kernel_exit_thread(kernel: &mut Kernel, exit_code: i32) -> Result<(), KernelError> {
        let id = kernel.current_thread_id()?;
        kernel.exit_thread(id, exit_code)
    }

    /// sceKernelExitDeleteThread
    pub fn sce_kernel_exit_delete_thread(kernel: &mut Kernel, exit_code: i32) -> Result<(), KernelError> {
        let id = kernel.current_thread_id()?;
        kernel.exit_thread(id, exit_code)?;
        kernel.delete_thread(id)
    }

    /// sceKernelTerminateThread
    pub fn sce_kernel_terminate_thread(kernel: &mut Kernel, thread_id: ThreadId) -> Result<(), KernelError> {
        if thread_id == 0 {
            return Err(KernelError::IllegalThread(thread_id));
        }
        kernel.terminate_thread(thread_id)
    }

    /// sceKernelTerminateDeleteThread
    pub fn sce_kernel_terminate_delete_thread(
        kernel: &mut Kernel,
        thread_id: ThreadId,
    ) -> Result<(), KernelError> {
        sce_kernel_terminate_thread(kernel, thread_id)?;
        kernel.delete_thread(thread_id)
    }

    /// sceKernelChangeThreadPriority. Priority 0 restores the creation priority.
    pub fn sce_kernel_change_thread_priority(
        kernel: &mut Kernel,
        thread_id: ThreadId,
        priority: u32,
    ) -> Result<(), KernelError> {
        let id = kernel.resolve_thread(thread_id)?;
        let priority = if priority == 0 {
            kernel.thread(id)?.initial_priority()
        } else {
            priority
        };
        kernel.change_thread_priority(id, priority)
    }

    /// sceKernelGetThreadId
    pub fn sce_kernel_get_thread_id(kernel: &Kernel) -> Result<ThreadId, KernelError> {
        kernel.current_thread_id()
    }

    /// sceKernelGetThreadCurrentPriority
    pub fn sce_kernel_get_thread_current_priority(kernel: &Kernel) -> Result<u32, KernelError> {
        let id = kernel.current_thread_id()?;
        Ok(kernel.thread(id)?.priority())
    }

    /// sceKernelGetThreadExitStatus
    pub fn sce_kernel_get_thread_exit_status(kernel: &Kernel, thread_id: ThreadId) -> Result<i32, KernelError> {
        let id = kernel.resolve_thread(thread_id)?;
        kernel.thread_exit_status(id)
    }

    /// sceKernelWaitThreadEnd / sceKernelWaitThreadEndCB
    pub fn sce_kernel_wait_thread_end(
        kernel: &mut Kernel,
        thread_id: ThreadId,
        timeout_address: u32,
        callbacks: bool,
    ) -> Result<WaitOutcome<i32>, KernelError> {
        let timeout = kernel.read_timeout(timeout_address)?;
        kernel.wait_thread_end(thread_id, timeout, timeout_address, callbacks)
    }

    /// sceKernelSleepThread / sceKernelSleepThreadCB
    pub fn sce_kernel_sleep_thread(kernel: &mut Kernel, callbacks: bool) -> Result<WaitOutcome<i32>, KernelError> {
        kernel.sleep_thread(callbacks)
    }

    /// sceKernelWakeupThread
    pub fn sce_kernel_wakeup_thread(kernel: &mut Kernel, thread_id: ThreadId) -> Result<(), KernelError> {
        let id = kernel.resolve_thread(thread_id)?;
        kernel.wakeup_thread(id)
    }

    /// sceKernelCancelWakeupThread
    pub fn sce_kernel_cancel_wakeup_thread(kernel: &mut Kernel, thread_id: ThreadId) -> Result<u32, KernelError> {
        let id = kernel.resolve_thread(thread_id)?;
        kernel.cancel_wakeup(id)
    }

    /// sceKernelSuspendThread
    pub fn sce_kernel_suspend_thread(kernel: &mut Kernel, thread_id: ThreadId) -> Result<(), KernelError> {
        if thread_id == 0 {
            return Err(KernelError::IllegalThread(thread_id));
        }
        kernel.suspend_thread(thread_id)
    }

    /// sceKernelResumeThread
    pub fn sce_kernel_resume_thread(kernel: &mut Kernel, thread_id: ThreadId) -> Result<(), KernelError> {
        if thread_id == 0 {
            return Err(KernelError::IllegalThread(thread_id));
        }
        kernel.resume_thread(thread_id)
    }

    /// sceKernelDelayThread / sceKernelDelayThreadCB
    pub fn sce_kernel_delay_thread(
        kernel: &mut Kernel,
        micros: u32,
        callbacks: bool,
    ) -> Result<WaitOutcome<i32>, KernelError> {
        kernel.delay_thread(u64::from(micros), callbacks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tests::{boot, run_as};

    #[test]
    fn test_create_thread_allocates_stack_and_tls() {
        let mut kernel = boot();
        let id = kernel
            .create_thread("worker", 0x0880_0100, 0x20, 0x1000, ThreadAttributes::USER)
            .unwrap();
        let thread = kernel.thread(id).unwrap();

        assert_eq!(thread.status(), ThreadStatus::STOPPED);
        let stack = thread.stack_block().unwrap();
        let tls = thread.tls_block().unwrap();
        assert_eq!(stack.size, 0x1000);
        assert_eq!(tls.size, 0x4000);
        assert_eq!(tls.upper_bound(), stack.address);

        // Filled with 0xFF
        assert_eq!(kernel.memory().read_u32(stack.address).unwrap(), 0xFFFF_FFFF);
    }

    #[test]
    fn test_create_thread_validation() {
        let mut kernel = boot();
        assert_eq!(
            kernel.create_thread("t", 0, 0, 0x1000, ThreadAttributes::empty()),
            Err(KernelError::IllegalPriority(0))
        );
        assert_eq!(
            kernel.create_thread("t", 0, 127, 0x1000, ThreadAttributes::empty()),
            Err(KernelError::IllegalPriority(127))
        );
        assert_eq!(
            kernel.create_thread("t", 0, 0x20, 0x100, ThreadAttributes::empty()),
            Err(KernelError::IllegalStackSize(0x100))
        );
    }

    #[test]
    fn test_create_thread_out_of_memory_does_not_leak() {
        let mut kernel = boot();
        let partition = kernel.config().thread_partition;
        let free = kernel.partition(partition).unwrap().free_bytes();

        // Stack fits, TLS does not
        let stack_size = free - 0x100;
        assert_eq!(
            kernel.create_thread("big", 0, 0x20, stack_size, ThreadAttributes::empty()),
            Err(KernelError::OutOfMemory)
        );
        assert_eq!(kernel.partition(partition).unwrap().free_bytes(), free);
    }

    #[test]
    fn test_start_sets_registers() {
        let mut kernel = boot();
        let id = kernel
            .create_thread("worker", 0x0880_0100, 0x20, 0x1000, ThreadAttributes::empty())
            .unwrap();
        kernel.start_thread(id, 8, 0x0880_2000).unwrap();

        let thread = kernel.thread(id).unwrap();
        let context = thread.context().unwrap();
        let cpu = kernel.cpu();
        assert_eq!(cpu.register(context, regs::A0), 8);
        assert_eq!(cpu.register(context, regs::A1), 0x0880_2000);
        assert_eq!(cpu.register(context, regs::K0), thread.tls_block().unwrap().address);
        assert_eq!(cpu.register(context, regs::SP), thread.stack_block().unwrap().upper_bound());
        assert_eq!(thread.status(), ThreadStatus::READY);
        assert!(kernel.ready_queue().contains(id));

        assert_eq!(kernel.start_thread(id, 0, 0), Err(KernelError::NotDormant));
    }

    #[test]
    fn test_delete_frees_memory() {
        let mut kernel = boot();
        let partition = kernel.config().thread_partition;
        let free = kernel.partition(partition).unwrap().free_bytes();

        let id = kernel
            .create_thread("worker", 0x0880_0100, 0x20, 0x1000, ThreadAttributes::CLEAR_STACK)
            .unwrap();
        kernel.start_thread(id, 0, 0).unwrap();
        let stack = kernel.thread(id).unwrap().stack_block().unwrap();
        kernel.delete_thread(id).unwrap();

        assert_eq!(kernel.partition(partition).unwrap().free_bytes(), free);
        assert!(!kernel.ready_queue().contains(id));
        assert!(kernel.thread(id).is_err());
        assert!(!kernel.thread_table().contains(&id));
        assert_eq!(kernel.memory().read_u32(stack.address).unwrap(), 0);
    }

    #[test]
    fn test_change_priority_requeues() {
        let mut kernel = boot();
        let a = kernel.create_thread("a", 0, 0x20, 0x1000, ThreadAttributes::empty()).unwrap();
        let b = kernel.create_thread("b", 0, 0x20, 0x1000, ThreadAttributes::empty()).unwrap();
        kernel.start_thread(a, 0, 0).unwrap();
        kernel.start_thread(b, 0, 0).unwrap();
        assert_eq!(kernel.ready_queue().head().unwrap().thread, b);

        kernel.change_thread_priority(a, 0x10).unwrap();
        assert_eq!(kernel.ready_queue().head().unwrap().thread, a);
        assert_eq!(
            kernel.change_thread_priority(a, 200),
            Err(KernelError::IllegalPriority(200))
        );
    }

    #[test]
    fn test_sleep_and_wakeup_counting() {
        let mut kernel = boot();
        let id = run_as(&mut kernel, "sleeper", 0x20);

        // Banked wakeup is consumed without blocking
        kernel.wakeup_thread(id).unwrap();
        assert_eq!(kernel.sleep_thread(false).unwrap(), WaitOutcome::Completed(0));

        assert_eq!(kernel.sleep_thread(false).unwrap(), WaitOutcome::Blocked);
        assert_eq!(kernel.thread(id).unwrap().wait_kind(), Some(WaitKind::Sleep));

        kernel.wakeup_thread(id).unwrap();
        assert_eq!(kernel.thread(id).unwrap().status(), ThreadStatus::READY);

        kernel.wakeup_thread(id).unwrap();
        kernel.wakeup_thread(id).unwrap();
        assert_eq!(kernel.cancel_wakeup(id).unwrap(), 2);
        assert_eq!(kernel.cancel_wakeup(id).unwrap(), 0);
    }

    #[test]
    fn test_delay_completes_with_zero() {
        let mut kernel = boot();
        let id = run_as(&mut kernel, "delayer", 0x20);

        assert!(kernel.delay_thread(100, false).unwrap().is_blocked());
        assert_eq!(kernel.advance_clock(99), 0);
        assert_eq!(kernel.advance_clock(1), 1);

        let thread = kernel.thread(id).unwrap();
        assert_eq!(thread.status(), ThreadStatus::READY);
        assert_eq!(thread.wake_result(), 0);
    }

    #[test]
    fn test_suspend_resume_waiting_thread() {
        let mut kernel = boot();
        let id = run_as(&mut kernel, "sleeper", 0x20);
        kernel.sleep_thread(false).unwrap();

        kernel.suspend_thread(id).unwrap();
        assert_eq!(kernel.thread(id).unwrap().status(), ThreadStatus::WAIT_SUSPENDED);
        assert_eq!(kernel.suspend_thread(id), Err(KernelError::Suspended));

        // Wake while suspended parks the thread as suspended
        kernel.wakeup_thread(id).unwrap();
        assert_eq!(kernel.thread(id).unwrap().status(), ThreadStatus::SUSPENDED);
        assert!(!kernel.ready_queue().contains(id));

        kernel.resume_thread(id).unwrap();
        assert_eq!(kernel.thread(id).unwrap().status(), ThreadStatus::READY);
        assert!(kernel.ready_queue().contains(id));
        assert_eq!(kernel.resume_thread(id), Err(KernelError::NotSuspended));
    }

    #[test]
    fn test_terminate_and_exit_status() {
        let mut kernel = boot();
        let id = kernel.create_thread("victim", 0, 0x20, 0x1000, ThreadAttributes::empty()).unwrap();
        assert_eq!(kernel.terminate_thread(id), Err(KernelError::Dormant));

        kernel.start_thread(id, 0, 0).unwrap();
        assert_eq!(kernel.thread_exit_status(id), Err(KernelError::NotDormant));
        kernel.terminate_thread(id).unwrap();
        assert_eq!(kernel.thread_exit_status(id), Ok(TERMINATED_EXIT_STATUS));
    }
}
