//! Semaphore (sceKernel*Sema*)

use crate::kernel::Kernel;
use crate::objects::{KernelObject, ObjectId, ObjectKind, ObjectType};
use crate::sync::{enqueue, remove_from, write_optional, write_status, ATTR_THPRI};
use crate::thread::ThreadId;
use crate::wait::{WaitDescriptor, WaitKind, WaitOutcome};
use parking_lot::Mutex;
use psp_core::error::KernelError;
use std::collections::VecDeque;
use std::sync::Arc;

/// Counting semaphore
pub struct Semaphore {
    id: ObjectId,
    name: String,
    attr: u32,
    init_count: i32,
    max_count: i32,
    inner: Mutex<SemaphoreState>,
}

#[derive(Debug)]
struct SemaphoreState {
    count: i32,
    waiters: VecDeque<SemaWaiter>,
}

#[derive(Debug, Clone, Copy)]
struct SemaWaiter {
    thread: ThreadId,
    need: i32,
    priority: u32,
}

impl Semaphore {
    pub fn new(id: ObjectId, name: &str, attr: u32, init_count: i32, max_count: i32) -> Self {
        Self {
            id,
            name: name.to_string(),
            attr,
            init_count,
            max_count,
            inner: Mutex::new(SemaphoreState {
                count: init_count,
                waiters: VecDeque::new(),
            }),
        }
    }

    pub fn count(&self) -> i32 {
        self.inner.lock().count
    }

    pub fn max_count(&self) -> i32 {
        self.max_count
    }

    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Take `need` units if nobody is queued ahead and enough are available
    fn try_acquire(&self, need: i32) -> bool {
        let mut state = self.inner.lock();
        if state.waiters.is_empty() && state.count >= need {
            state.count -= need;
            true
        } else {
            false
        }
    }

    /// Serve queued waiters in order while the head can be satisfied
    fn satisfy_waiters(&self) -> Vec<ThreadId> {
        let mut state = self.inner.lock();
        let mut woken = Vec::new();
        while let Some(front) = state.waiters.front().copied() {
            if state.count < front.need {
                break;
            }
            state.count -= front.need;
            state.waiters.pop_front();
            woken.push(front.thread);
        }
        woken
    }

    fn drain_waiters(&self) -> Vec<ThreadId> {
        self.inner.lock().waiters.drain(..).map(|w| w.thread).collect()
    }
}

impl ObjectKind for Semaphore {
    const TYPE: ObjectType = ObjectType::Semaphore;
}

impl KernelObject for Semaphore {
    fn object_type(&self) -> ObjectType {
        ObjectType::Semaphore
    }

    fn id(&self) -> ObjectId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn remove_waiter(&self, thread: ThreadId) -> bool {
        remove_from(&mut self.inner.lock().waiters, |w| w.thread == thread)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

/// Semaphore syscall implementations
pub mod syscalls {
    use super::*;

    /// sceKernelCreateSema
    pub fn sce_kernel_create_sema(
        kernel: &mut Kernel,
        name: &str,
        attr: u32,
        init_count: i32,
        max_count: i32,
    ) -> Result<ObjectId, KernelError> {
        if max_count <= 0 || init_count < 0 || init_count > max_count {
            return Err(KernelError::IllegalCount(init_count));
        }
        let id = kernel.objects.next_id();
        kernel
            .objects
            .register(Arc::new(Semaphore::new(id, name, attr, init_count, max_count)));
        Ok(id)
    }

    /// sceKernelDeleteSema
    pub fn sce_kernel_delete_sema(kernel: &mut Kernel, id: ObjectId) -> Result<(), KernelError> {
        let sema = kernel.objects.get::<Semaphore>(id)?;
        let waiters = sema.drain_waiters();
        kernel.objects.unregister::<Semaphore>(id)?;
        kernel.wake_all(waiters, KernelError::WaitDeleted.code());
        Ok(())
    }

    /// sceKernelSignalSema
    pub fn sce_kernel_signal_sema(kernel: &mut Kernel, id: ObjectId, signal: i32) -> Result<(), KernelError> {
        let sema = kernel.objects.get::<Semaphore>(id)?;
        if signal < 0 {
            return Err(KernelError::IllegalCount(signal));
        }
        {
            let mut state = sema.inner.lock();
            if i64::from(state.count) + i64::from(signal) > i64::from(sema.max_count) {
                return Err(KernelError::SemaOverflow);
            }
            state.count += signal;
        }
        let woken = sema.satisfy_waiters();
        kernel.wake_all(woken, 0);
        Ok(())
    }

    /// sceKernelWaitSema / sceKernelWaitSemaCB
    pub fn sce_kernel_wait_sema(
        kernel: &mut Kernel,
        id: ObjectId,
        need: i32,
        timeout_address: u32,
        callbacks: bool,
    ) -> Result<WaitOutcome<i32>, KernelError> {
        let sema = kernel.objects.get::<Semaphore>(id)?;
        if need <= 0 || need > sema.max_count {
            return Err(KernelError::IllegalCount(need));
        }
        if sema.try_acquire(need) {
            return Ok(WaitOutcome::Completed(0));
        }

        let timeout = kernel.read_timeout(timeout_address)?;
        let priority = kernel.thread(kernel.current_thread_id()?)?.priority();
        let mut descriptor = WaitDescriptor::new(WaitKind::Semaphore, id)
            .with_timeout(timeout, timeout_address)
            .with_callbacks(callbacks);
        descriptor.argument = need as u32;
        let thread = kernel.begin_wait(descriptor)?;

        let by_priority = sema.attr & ATTR_THPRI != 0;
        enqueue(
            &mut sema.inner.lock().waiters,
            SemaWaiter { thread, need, priority },
            by_priority,
            |w| w.priority,
        );
        Ok(WaitOutcome::Blocked)
    }

    /// sceKernelPollSema
    pub fn sce_kernel_poll_sema(kernel: &mut Kernel, id: ObjectId, need: i32) -> Result<(), KernelError> {
        let sema = kernel.objects.get::<Semaphore>(id)?;
        if need <= 0 {
            return Err(KernelError::IllegalCount(need));
        }
        if sema.try_acquire(need) {
            Ok(())
        } else {
            Err(KernelError::SemaZero)
        }
    }

    /// sceKernelCancelSema. A negative count restores the initial count.
    pub fn sce_kernel_cancel_sema(
        kernel: &mut Kernel,
        id: ObjectId,
        new_count: i32,
        num_wait_address: u32,
    ) -> Result<(), KernelError> {
        let sema = kernel.objects.get::<Semaphore>(id)?;
        if new_count > sema.max_count {
            return Err(KernelError::IllegalCount(new_count));
        }

        let waiters = sema.drain_waiters();
        sema.inner.lock().count = if new_count < 0 { sema.init_count } else { new_count };
        write_optional(&kernel.memory, num_wait_address, waiters.len() as u32)?;
        kernel.wake_all(waiters, KernelError::WaitCancelled.code());
        Ok(())
    }

    /// sceKernelReferSemaStatus
    pub fn sce_kernel_refer_sema_status(kernel: &mut Kernel, id: ObjectId, info_address: u32) -> Result<(), KernelError> {
        let sema = kernel.objects.get::<Semaphore>(id)?;
        let (count, waiting) = {
            let state = sema.inner.lock();
            (state.count, state.waiters.len())
        };
        write_status(
            &kernel.memory,
            info_address,
            &sema.name,
            &[
                sema.attr,
                sema.init_count as u32,
                count as u32,
                sema.max_count as u32,
                waiting as u32,
            ],
        )
    }
}
