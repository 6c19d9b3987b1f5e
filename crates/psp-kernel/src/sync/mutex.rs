//! Mutex (sceKernel*Mutex*)

use crate::kernel::Kernel;
use crate::objects::{KernelObject, ObjectId, ObjectKind, ObjectType};
use crate::sync::{enqueue, remove_from, write_optional, write_status, ATTR_THPRI};
use crate::thread::ThreadId;
use crate::wait::{WaitDescriptor, WaitKind, WaitOutcome};
use parking_lot::Mutex;
use psp_core::error::KernelError;
use std::collections::VecDeque;
use std::sync::Arc;

/// The owner may lock again, incrementing the lock count
pub const ATTR_RECURSIVE: u32 = 0x200;

/// Guest mutex. Named to avoid clashing with `parking_lot::Mutex`.
pub struct KernelMutex {
    id: ObjectId,
    name: String,
    attr: u32,
    init_count: i32,
    inner: Mutex<MutexState>,
}

#[derive(Debug)]
struct MutexState {
    owner: Option<ThreadId>,
    lock_count: i32,
    waiters: VecDeque<MutexWaiter>,
}

#[derive(Debug, Clone, Copy)]
struct MutexWaiter {
    thread: ThreadId,
    count: i32,
    priority: u32,
}

/// What a lock attempt ended with
enum LockAttempt {
    Acquired,
    Contended,
}

impl KernelMutex {
    pub fn new(id: ObjectId, name: &str, attr: u32, init_count: i32, owner: Option<ThreadId>) -> Self {
        Self {
            id,
            name: name.to_string(),
            attr,
            init_count,
            inner: Mutex::new(MutexState {
                owner,
                lock_count: init_count,
                waiters: VecDeque::new(),
            }),
        }
    }

    pub fn is_recursive(&self) -> bool {
        self.attr & ATTR_RECURSIVE != 0
    }

    pub fn owner(&self) -> Option<ThreadId> {
        self.inner.lock().owner
    }

    pub fn lock_count(&self) -> i32 {
        self.inner.lock().lock_count
    }

    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    fn check_count(&self, count: i32) -> Result<(), KernelError> {
        if count <= 0 || (count > 1 && !self.is_recursive()) {
            return Err(KernelError::IllegalCount(count));
        }
        Ok(())
    }

    fn try_lock(&self, thread: ThreadId, count: i32) -> Result<LockAttempt, KernelError> {
        let mut state = self.inner.lock();
        match state.owner {
            None => {
                state.owner = Some(thread);
                state.lock_count = count;
                Ok(LockAttempt::Acquired)
            }
            Some(owner) if owner == thread => {
                if !self.is_recursive() {
                    return Err(KernelError::MutexRecursive);
                }
                state.lock_count = state
                    .lock_count
                    .checked_add(count)
                    .ok_or(KernelError::MutexLockOverflow)?;
                Ok(LockAttempt::Acquired)
            }
            Some(_) => Ok(LockAttempt::Contended),
        }
    }

    /// Drop `count` locks held by `thread`. When the mutex becomes free the
    /// first waiter takes it over and is returned.
    fn unlock(&self, thread: ThreadId, count: i32) -> Result<Option<ThreadId>, KernelError> {
        let mut state = self.inner.lock();
        if state.owner != Some(thread) {
            // TODO: check whether a non-owner unlock should be tolerated for
            // titles that release a mutex from a helper thread
            return Err(KernelError::MutexUnlocked);
        }
        if count > state.lock_count {
            return Err(KernelError::MutexUnlockUnderflow);
        }

        state.lock_count -= count;
        if state.lock_count > 0 {
            return Ok(None);
        }

        state.owner = None;
        let next = state.waiters.pop_front();
        if let Some(waiter) = next {
            state.owner = Some(waiter.thread);
            state.lock_count = waiter.count;
        }
        Ok(next.map(|w| w.thread))
    }

    fn drain_waiters(&self) -> Vec<ThreadId> {
        self.inner.lock().waiters.drain(..).map(|w| w.thread).collect()
    }
}

impl ObjectKind for KernelMutex {
    const TYPE: ObjectType = ObjectType::Mutex;
}

impl KernelObject for KernelMutex {
    fn object_type(&self) -> ObjectType {
        ObjectType::Mutex
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

/// Mutex syscall implementations
pub mod syscalls {
    use super::*;

    /// sceKernelCreateMutex. A positive initial count locks it for the caller.
    pub fn sce_kernel_create_mutex(
        kernel: &mut Kernel,
        name: &str,
        attr: u32,
        init_count: i32,
    ) -> Result<ObjectId, KernelError> {
        if init_count < 0 || (init_count > 1 && attr & ATTR_RECURSIVE == 0) {
            return Err(KernelError::IllegalCount(init_count));
        }
        let owner = if init_count > 0 {
            Some(kernel.current_thread_id()?)
        } else {
            None
        };

        let id = kernel.objects.next_id();
        kernel
            .objects
            .register(Arc::new(KernelMutex::new(id, name, attr, init_count, owner)));
        Ok(id)
    }

    /// sceKernelDeleteMutex
    pub fn sce_kernel_delete_mutex(kernel: &mut Kernel, id: ObjectId) -> Result<(), KernelError> {
        let mutex = kernel.objects.get::<KernelMutex>(id)?;
        let waiters = mutex.drain_waiters();
        kernel.objects.unregister::<KernelMutex>(id)?;
        kernel.wake_all(waiters, KernelError::WaitDeleted.code());
        Ok(())
    }

    /// sceKernelLockMutex / sceKernelLockMutexCB
    pub fn sce_kernel_lock_mutex(
        kernel: &mut Kernel,
        id: ObjectId,
        count: i32,
        timeout_address: u32,
        callbacks: bool,
    ) -> Result<WaitOutcome<i32>, KernelError> {
        let mutex = kernel.objects.get::<KernelMutex>(id)?;
        mutex.check_count(count)?;
        let current = kernel.current_thread_id()?;

        if let LockAttempt::Acquired = mutex.try_lock(current, count)? {
            return Ok(WaitOutcome::Completed(0));
        }

        let timeout = kernel.read_timeout(timeout_address)?;
        let priority = kernel.thread(current)?.priority();
        let mut descriptor = WaitDescriptor::new(WaitKind::Mutex, id)
            .with_timeout(timeout, timeout_address)
            .with_callbacks(callbacks);
        descriptor.argument = count as u32;
        let thread = kernel.begin_wait(descriptor)?;

        enqueue(
            &mut mutex.inner.lock().waiters,
            MutexWaiter {
                thread,
                count,
                priority,
            },
            mutex.attr & ATTR_THPRI != 0,
            |w| w.priority,
        );
        Ok(WaitOutcome::Blocked)
    }

    /// sceKernelTryLockMutex
    pub fn sce_kernel_try_lock_mutex(kernel: &mut Kernel, id: ObjectId, count: i32) -> Result<(), KernelError> {
        let mutex = kernel.objects.get::<KernelMutex>(id)?;
        mutex.check_count(count)?;
        let current = kernel.current_thread_id()?;

        match mutex.try_lock(current, count)? {
            LockAttempt::Acquired => Ok(()),
            LockAttempt::Contended => Err(KernelError::MutexLocked),
        }
    }

    /// sceKernelUnlockMutex
    pub fn sce_kernel_unlock_mutex(kernel: &mut Kernel, id: ObjectId, count: i32) -> Result<(), KernelError> {
        let mutex = kernel.objects.get::<KernelMutex>(id)?;
        if count <= 0 {
            return Err(KernelError::IllegalCount(count));
        }
        let current = kernel.current_thread_id()?;

        if let Some(next) = mutex.unlock(current, count)? {
            tracing::trace!("Mutex 0x{:x} handed to thread 0x{:x}", id, next);
            kernel.wake_thread(next, 0);
        }
        Ok(())
    }

    /// sceKernelCancelMutex. A positive count leaves the caller owning it.
    pub fn sce_kernel_cancel_mutex(
        kernel: &mut Kernel,
        id: ObjectId,
        new_count: i32,
        num_wait_address: u32,
    ) -> Result<(), KernelError> {
        let mutex = kernel.objects.get::<KernelMutex>(id)?;
        if new_count > 1 && !mutex.is_recursive() {
            return Err(KernelError::IllegalCount(new_count));
        }
        let owner = if new_count > 0 {
            Some(kernel.current_thread_id()?)
        } else {
            None
        };

        let waiters = mutex.drain_waiters();
        {
            let mut state = mutex.inner.lock();
            state.owner = owner;
            state.lock_count = new_count.max(0);
        }
        write_optional(&kernel.memory, num_wait_address, waiters.len() as u32)?;
        kernel.wake_all(waiters, KernelError::WaitCancelled.code());
        Ok(())
    }

    /// sceKernelReferMutexStatus
    pub fn sce_kernel_refer_mutex_status(
        kernel: &mut Kernel,
        id: ObjectId,
        info_address: u32,
    ) -> Result<(), KernelError> {
        let mutex = kernel.objects.get::<KernelMutex>(id)?;
        let (count, owner, waiting) = {
            let state = mutex.inner.lock();
            (state.lock_count, state.owner, state.waiters.len())
        };
        write_status(
            &kernel.memory,
            info_address,
            &mutex.name,
            &[
                mutex.attr,
                mutex.init_count as u32,
                count as u32,
                owner.map_or(u32::MAX, |t| t),
                waiting as u32,
            ],
        )
    }
}
