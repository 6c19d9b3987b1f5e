//! Callbacks (sceKernel*Callback*)
//!
//! A callback belongs to the thread that created it and only runs on that
//! thread, either while it sits in a callback-aware wait or after it asked
//! for pending callbacks with sceKernelCheckCallback.

use crate::kernel::{Dispatch, DispatchAction, Kernel};
use crate::objects::{KernelObject, ObjectId, ObjectKind, ObjectType};
use crate::thread::{Thread, ThreadId, ThreadStatus};
use parking_lot::Mutex;
use psp_core::cpu::{regs, NUM_REGISTERS};
use psp_core::error::KernelError;
use std::sync::Arc;

/// Callback run request handed to the CPU engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackInvocation {
    pub callback: ObjectId,
    pub entry: u32,
    /// a0..a2: notify count, notify argument, common argument
    pub arguments: [u32; 3],
}

/// A callback running on a borrowed thread context
#[derive(Debug, Clone)]
pub(crate) struct CallbackDelivery {
    pub(crate) thread: ThreadId,
    pub(crate) callback: ObjectId,
    /// Registers of the thread before the callback took its context
    saved: [u32; NUM_REGISTERS],
    /// The thread sat in a callback-aware wait when delivery started
    from_wait: bool,
}

/// A guest callback
pub struct Callback {
    id: ObjectId,
    name: String,
    owner: ThreadId,
    entry: u32,
    common_arg: u32,
    inner: Mutex<CallbackState>,
}

#[derive(Debug, Default)]
struct CallbackState {
    notify_count: u32,
    notify_arg: u32,
}

impl Callback {
    pub fn new(id: ObjectId, name: &str, owner: ThreadId, entry: u32, common_arg: u32) -> Self {
        Self {
            id,
            name: name.to_string(),
            owner,
            entry,
            common_arg,
            inner: Mutex::new(CallbackState::default()),
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn entry(&self) -> u32 {
        self.entry
    }

    pub fn common_arg(&self) -> u32 {
        self.common_arg
    }

    pub fn notify(&self, arg: u32) {
        let mut state = self.inner.lock();
        state.notify_count = state.notify_count.wrapping_add(1);
        state.notify_arg = arg;
    }

    pub fn notify_count(&self) -> u32 {
        self.inner.lock().notify_count
    }

    pub fn is_pending(&self) -> bool {
        self.inner.lock().notify_count > 0
    }

    /// Consume the pending notifications as `(count, arg)`
    fn take_notification(&self) -> Option<(u32, u32)> {
        let mut state = self.inner.lock();
        if state.notify_count == 0 {
            return None;
        }
        let count = std::mem::take(&mut state.notify_count);
        Some((count, state.notify_arg))
    }
}

impl ObjectKind for Callback {
    const TYPE: ObjectType = ObjectType::Callback;
}

impl KernelObject for Callback {
    fn object_type(&self) -> ObjectType {
        ObjectType::Callback
    }

    fn id(&self) -> ObjectId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

impl Kernel {
    /// Create a callback owned by the current thread
    pub fn create_callback(&mut self, name: &str, entry: u32, common_arg: u32) -> Result<ObjectId, KernelError> {
        let owner = self.current_thread_id()?;
        let thread = self.thread(owner)?;

        let id = self.objects.next_id();
        self.objects
            .register(Arc::new(Callback::new(id, name, owner, entry, common_arg)));
        thread.inner().callbacks.push(id);
        Ok(id)
    }

    pub fn delete_callback(&mut self, id: ObjectId) -> Result<(), KernelError> {
        let callback = self.objects.get::<Callback>(id)?;
        if let Ok(owner) = self.thread(callback.owner()) {
            owner.inner().callbacks.retain(|&c| c != id);
        }
        self.objects.unregister::<Callback>(id)
    }

    /// Unregister a callback whose owner is going away
    pub(crate) fn remove_callback(&mut self, id: ObjectId) {
        if let Err(e) = self.objects.unregister::<Callback>(id) {
            tracing::debug!("Callback 0x{:x} already gone: {}", id, e);
        }
    }

    pub fn notify_callback(&mut self, id: ObjectId, arg: u32) -> Result<(), KernelError> {
        let callback = self.objects.get::<Callback>(id)?;
        callback.notify(arg);
        tracing::trace!("Notified callback 0x{:x} (count {})", id, callback.notify_count());
        Ok(())
    }

    fn has_pending_callbacks(&self, thread: &Thread) -> bool {
        let callbacks = thread.inner().callbacks.clone();
        callbacks.into_iter().any(|id| {
            self.objects
                .get::<Callback>(id)
                .map(|c| c.is_pending())
                .unwrap_or(false)
        })
    }

    /// Arrange for the current thread's pending callbacks to run at the next
    /// dispatch. Returns whether any were pending.
    pub fn check_callbacks(&mut self) -> Result<bool, KernelError> {
        let id = self.current_thread_id()?;
        let thread = self.thread(id)?;
        let pending = self.has_pending_callbacks(&thread);
        if pending {
            thread.inner().check_callbacks = true;
        }
        Ok(pending)
    }

    /// Pick the highest-priority thread that can take a callback right now
    pub(crate) fn next_callback_delivery(&mut self) -> Option<Dispatch> {
        let (_, thread_id, callback_id) = self
            .threads
            .iter()
            .filter_map(|&id| {
                let thread = self.objects.get::<Thread>(id).ok()?;
                let (eligible, priority, callbacks) = {
                    let inner = thread.inner();
                    let waiting = inner.status.contains(ThreadStatus::WAITING)
                        && !inner.status.contains(ThreadStatus::SUSPENDED)
                        && inner.wait.as_ref().is_some_and(|w| w.callbacks);
                    let checking = inner.check_callbacks
                        && (inner.status == ThreadStatus::READY || inner.status == ThreadStatus::RUNNING);
                    (waiting || checking, inner.priority, inner.callbacks.clone())
                };
                if !eligible {
                    return None;
                }
                let callback = callbacks.into_iter().find(|&cb| {
                    self.objects
                        .get::<Callback>(cb)
                        .map(|c| c.is_pending())
                        .unwrap_or(false)
                })?;
                Some((priority, id, callback))
            })
            .min_by_key(|&(priority, _, _)| priority)?;

        let callback = self.objects.get::<Callback>(callback_id).ok()?;
        let (count, arg) = callback.take_notification()?;
        let thread = self.thread(thread_id).ok()?;

        let (context, was_ready, from_wait) = {
            let mut inner = thread.inner();
            let context = inner.context?;
            let was_ready = inner.status == ThreadStatus::READY;
            if was_ready {
                inner.status = ThreadStatus::RUNNING;
            }
            (context, was_ready, inner.status.contains(ThreadStatus::WAITING))
        };
        if was_ready {
            self.ready.remove(thread_id);
        }

        let saved = std::array::from_fn(|index| self.cpu.register(context, index));
        self.current = Some(thread_id);
        self.delivering = Some(CallbackDelivery {
            thread: thread_id,
            callback: callback_id,
            saved,
            from_wait,
        });
        tracing::debug!("Delivering callback 0x{:x} on thread 0x{:x}", callback_id, thread_id);

        Some(Dispatch {
            thread: thread_id,
            context,
            action: DispatchAction::RunCallback(CallbackInvocation {
                callback: callback_id,
                entry: callback.entry(),
                arguments: [count, arg, callback.common_arg()],
            }),
        })
    }

    /// Report that the delivered callback returned. A nonzero return deletes it.
    ///
    /// The thread gets its pre-callback registers back. If its wait ended
    /// while the callback ran, v0 carries the wait result.
    pub fn finish_callback(&mut self, return_value: i32) -> Result<(), KernelError> {
        let delivery = self.delivering.take().ok_or(KernelError::IllegalContext)?;
        let callback_id = delivery.callback;

        if return_value != 0 {
            tracing::debug!("Callback 0x{:x} returned 0x{:x}, deleting it", callback_id, return_value);
            if let Err(e) = self.delete_callback(callback_id) {
                tracing::debug!("Callback 0x{:x} deleted itself: {}", callback_id, e);
            }
        }

        let thread = self.thread(delivery.thread)?;
        let (context, still_waiting, wake_result) = {
            let inner = thread.inner();
            (inner.context, inner.status.contains(ThreadStatus::WAITING), inner.wake_result)
        };
        if let Some(context) = context {
            for (index, &value) in delivery.saved.iter().enumerate() {
                self.cpu.set_register(context, index, value);
            }
            if delivery.from_wait && !still_waiting {
                self.cpu.set_register(context, regs::V0, wake_result as u32);
            }
        }
        if delivery.from_wait {
            self.current = None;
        }
        if !self.has_pending_callbacks(&thread) {
            thread.inner().check_callbacks = false;
        }
        Ok(())
    }
}

/// Callback syscall implementations
pub mod syscalls {
    use super::*;

    /// sceKernelCreateCallback
    pub fn sce_kernel_create_callback(
        kernel: &mut Kernel,
        name: &str,
        entry: u32,
        common_arg: u32,
    ) -> Result<ObjectId, KernelError> {
        kernel.create_callback(name, entry, common_arg)
    }

    /// sceKernelDeleteCallback
    pub fn sce_kernel_delete_callback(kernel: &mut Kernel, id: ObjectId) -> Result<(), KernelError> {
        kernel.delete_callback(id)
    }

    /// sceKernelNotifyCallback
    pub fn sce_kernel_notify_callback(kernel: &mut Kernel, id: ObjectId, arg: u32) -> Result<(), KernelError> {
        kernel.notify_callback(id, arg)
    }

    /// sceKernelCheckCallback
    pub fn sce_kernel_check_callback(kernel: &mut Kernel) -> Result<bool, KernelError> {
        kernel.check_callbacks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tests::{boot, run_as};
    use crate::wait::WaitKind;

    #[test]
    fn test_callback_runs_during_cb_wait() {
        let mut kernel = boot();
        let id = run_as(&mut kernel, "owner", 0x20);
        let cb = kernel.create_callback("cb", 0x0880_4000, 0x77).unwrap();

        // Plain sleep: callbacks are not delivered
        kernel.sleep_thread(false).unwrap();
        kernel.notify_callback(cb, 5).unwrap();
        assert!(kernel.dispatch().is_none());
        kernel.wakeup_thread(id).unwrap();
        assert_eq!(kernel.dispatch().unwrap().thread, id);

        // CB sleep: delivered, thread keeps waiting
        kernel.sleep_thread(true).unwrap();
        let dispatch = kernel.dispatch().unwrap();
        assert_eq!(dispatch.thread, id);
        match dispatch.action {
            DispatchAction::RunCallback(invocation) => {
                assert_eq!(invocation.callback, cb);
                assert_eq!(invocation.entry, 0x0880_4000);
                assert_eq!(invocation.arguments, [1, 5, 0x77]);
            }
            DispatchAction::Resume => panic!("expected callback delivery"),
        }
        assert!(kernel.dispatch().is_none());

        kernel.finish_callback(0).unwrap();
        assert_eq!(kernel.thread(id).unwrap().wait_kind(), Some(WaitKind::Sleep));
        assert!(kernel.current_thread().is_none());
        assert!(kernel.objects().exists(cb));
        assert!(kernel.dispatch().is_none());
    }

    #[test]
    fn test_nonzero_return_deletes_callback() {
        let mut kernel = boot();
        let id = run_as(&mut kernel, "owner", 0x20);
        let cb = kernel.create_callback("cb", 0x0880_4000, 0).unwrap();
        kernel.notify_callback(cb, 1).unwrap();

        kernel.sleep_thread(true).unwrap();
        kernel.dispatch().unwrap();
        kernel.finish_callback(1).unwrap();

        assert!(!kernel.objects().exists(cb));
        assert!(kernel.thread(id).unwrap().inner().callbacks.is_empty());
    }

    #[test]
    fn test_check_callback_on_running_thread() {
        let mut kernel = boot();
        let id = run_as(&mut kernel, "owner", 0x20);
        assert!(!kernel.check_callbacks().unwrap());

        let cb = kernel.create_callback("cb", 0x0880_4000, 0).unwrap();
        kernel.notify_callback(cb, 9).unwrap();
        assert!(kernel.check_callbacks().unwrap());

        let dispatch = kernel.dispatch().unwrap();
        assert!(matches!(dispatch.action, DispatchAction::RunCallback(_)));
        kernel.finish_callback(0).unwrap();

        assert_eq!(kernel.current_thread(), Some(id));
        assert_eq!(kernel.dispatch().unwrap().action, DispatchAction::Resume);
    }

    #[test]
    fn test_suspended_waiter_gets_no_callback() {
        let mut kernel = boot();
        let id = run_as(&mut kernel, "owner", 0x20);
        let cb = kernel.create_callback("cb", 0x0880_4000, 0).unwrap();
        kernel.sleep_thread(true).unwrap();

        kernel.suspend_thread(id).unwrap();
        kernel.notify_callback(cb, 3).unwrap();
        assert!(kernel.dispatch().is_none());
        assert_eq!(kernel.thread(id).unwrap().status(), ThreadStatus::WAIT_SUSPENDED);
        assert_eq!(kernel.objects.get::<Callback>(cb).unwrap().notify_count(), 1);

        kernel.resume_thread(id).unwrap();
        let dispatch = kernel.dispatch().unwrap();
        assert_eq!(dispatch.thread, id);
        assert!(matches!(dispatch.action, DispatchAction::RunCallback(_)));
    }

    #[test]
    fn test_wait_ending_during_callback_keeps_registers() {
        let mut kernel = boot();
        let id = run_as(&mut kernel, "owner", 0x20);
        let context = kernel.thread(id).unwrap().context().unwrap();
        let cb = kernel.create_callback("cb", 0x0880_4000, 0).unwrap();
        kernel.cpu_mut().set_register(context, 16, 0xCAFE);
        kernel.cpu_mut().set_register(context, regs::V0, 0xBEEF);
        kernel.delay_thread(100, true).unwrap();
        kernel.notify_callback(cb, 1).unwrap();

        let dispatch = kernel.dispatch().unwrap();
        assert!(matches!(dispatch.action, DispatchAction::RunCallback(_)));

        // The callback body clobbers the borrowed context
        kernel.cpu_mut().set_register(context, 16, 0xDEAD);
        kernel.cpu_mut().set_register(context, regs::V0, 7);
        assert_eq!(kernel.advance_clock(100), 1);
        assert!(kernel.dispatch().is_none());

        kernel.finish_callback(0).unwrap();
        assert_eq!(kernel.cpu().register(context, 16), 0xCAFE);
        assert_eq!(kernel.cpu().register(context, regs::V0), 0);
        assert_eq!(kernel.thread(id).unwrap().status(), ThreadStatus::READY);
        assert!(kernel.current_thread().is_none());

        let dispatch = kernel.dispatch().unwrap();
        assert_eq!(dispatch.thread, id);
        assert_eq!(dispatch.action, DispatchAction::Resume);
    }

    #[test]
    fn test_callback_errors() {
        let mut kernel = boot();
        assert_eq!(
            kernel.create_callback("cb", 0, 0),
            Err(KernelError::IllegalContext)
        );
        assert_eq!(kernel.notify_callback(42, 0), Err(KernelError::UnknownCallback(42)));
        assert_eq!(kernel.finish_callback(0), Err(KernelError::IllegalContext));
    }
}
