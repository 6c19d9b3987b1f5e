//! Event flag (sceKernel*EventFlag*)
//!
//! Event flags hold a 32 bit pattern. Threads wait until some (OR) or all
//! (AND) of a set of bits are raised, optionally clearing them on success.

use crate::kernel::Kernel;
use crate::objects::{KernelObject, ObjectId, ObjectKind, ObjectType};
use crate::sync::{enqueue, remove_from, write_optional, write_status, ATTR_THPRI};
use crate::thread::ThreadId;
use crate::wait::{WaitDescriptor, WaitKind, WaitOutcome};
use parking_lot::Mutex;
use psp_core::error::KernelError;
use std::collections::VecDeque;
use std::sync::Arc;

/// Event flag wait modes
pub mod wait_mode {
    /// Wait for all of the specified bits
    pub const AND: u32 = 0x00;
    /// Wait for any of the specified bits
    pub const OR: u32 = 0x01;
    /// Clear the whole pattern after waiting
    pub const CLEAR_ALL: u32 = 0x10;
    /// Clear the matched bits after waiting
    pub const CLEAR_PAT: u32 = 0x20;

    pub(crate) const VALID: u32 = OR | CLEAR_ALL | CLEAR_PAT;
}

/// More than one thread may wait at a time
pub const ATTR_WAIT_MULTIPLE: u32 = 0x200;

fn matches(pattern: u32, bits: u32, mode: u32) -> bool {
    if mode & wait_mode::OR != 0 {
        pattern & bits != 0
    } else {
        pattern & bits == bits
    }
}

fn apply_clear(pattern: u32, bits: u32, mode: u32) -> u32 {
    if mode & wait_mode::CLEAR_ALL != 0 {
        0
    } else if mode & wait_mode::CLEAR_PAT != 0 {
        pattern & !bits
    } else {
        pattern
    }
}

/// PSP event flag
pub struct EventFlag {
    id: ObjectId,
    name: String,
    attr: u32,
    init_pattern: u32,
    inner: Mutex<EventFlagState>,
}

#[derive(Debug)]
struct EventFlagState {
    pattern: u32,
    waiters: VecDeque<EvfWaiter>,
}

#[derive(Debug, Clone, Copy)]
struct EvfWaiter {
    thread: ThreadId,
    bits: u32,
    mode: u32,
    out_address: u32,
    priority: u32,
}

impl EventFlag {
    pub fn new(id: ObjectId, name: &str, attr: u32, init_pattern: u32) -> Self {
        Self {
            id,
            name: name.to_string(),
            attr,
            init_pattern,
            inner: Mutex::new(EventFlagState {
                pattern: init_pattern,
                waiters: VecDeque::new(),
            }),
        }
    }

    pub fn pattern(&self) -> u32 {
        self.inner.lock().pattern
    }

    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Check the condition and clear on success. Returns the pattern seen
    /// and whether it matched.
    fn try_match(&self, bits: u32, mode: u32) -> (u32, bool) {
        let mut state = self.inner.lock();
        let seen = state.pattern;
        if matches(seen, bits, mode) {
            state.pattern = apply_clear(seen, bits, mode);
            (seen, true)
        } else {
            (seen, false)
        }
    }

    /// Release every waiter whose condition now holds, in queue order.
    /// Returns `(thread, out_address, pattern seen)` for each.
    fn satisfy_waiters(&self) -> Vec<(ThreadId, u32, u32)> {
        let mut state = self.inner.lock();
        let mut woken = Vec::new();
        let mut index = 0;
        while index < state.waiters.len() {
            let waiter = state.waiters[index];
            if matches(state.pattern, waiter.bits, waiter.mode) {
                woken.push((waiter.thread, waiter.out_address, state.pattern));
                state.pattern = apply_clear(state.pattern, waiter.bits, waiter.mode);
                state.waiters.remove(index);
            } else {
                index += 1;
            }
        }
        woken
    }

    fn drain_waiters(&self) -> Vec<ThreadId> {
        self.inner.lock().waiters.drain(..).map(|w| w.thread).collect()
    }
}

impl ObjectKind for EventFlag {
    const TYPE: ObjectType = ObjectType::EventFlag;
}

impl KernelObject for EventFlag {
    fn object_type(&self) -> ObjectType {
        ObjectType::EventFlag
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

fn check_wait_args(bits: u32, mode: u32) -> Result<(), KernelError> {
    if bits == 0 {
        return Err(KernelError::EvfIlpat);
    }
    if mode & !wait_mode::VALID != 0 {
        return Err(KernelError::IllegalArgument);
    }
    Ok(())
}

/// Event flag syscall implementations
pub mod syscalls {
    use super::*;

    /// sceKernelCreateEventFlag
    pub fn sce_kernel_create_event_flag(
        kernel: &mut Kernel,
        name: &str,
        attr: u32,
        init_pattern: u32,
    ) -> Result<ObjectId, KernelError> {
        let id = kernel.objects.next_id();
        kernel
            .objects
            .register(Arc::new(EventFlag::new(id, name, attr, init_pattern)));
        Ok(id)
    }

    /// sceKernelDeleteEventFlag
    pub fn sce_kernel_delete_event_flag(kernel: &mut Kernel, id: ObjectId) -> Result<(), KernelError> {
        let flag = kernel.objects.get::<EventFlag>(id)?;
        let waiters = flag.drain_waiters();
        kernel.objects.unregister::<EventFlag>(id)?;
        kernel.wake_all(waiters, KernelError::WaitDeleted.code());
        Ok(())
    }

    /// sceKernelSetEventFlag
    pub fn sce_kernel_set_event_flag(kernel: &mut Kernel, id: ObjectId, bits: u32) -> Result<(), KernelError> {
        let flag = kernel.objects.get::<EventFlag>(id)?;
        flag.inner.lock().pattern |= bits;

        for (thread, out_address, seen) in flag.satisfy_waiters() {
            if let Err(e) = write_optional(&kernel.memory, out_address, seen) {
                tracing::warn!("Event flag 0x{:x}: cannot report pattern to 0x{:x}: {}", id, thread, e);
            }
            kernel.wake_thread(thread, 0);
        }
        Ok(())
    }

    /// sceKernelClearEventFlag. Keeps only the bits set in `bits`.
    pub fn sce_kernel_clear_event_flag(kernel: &mut Kernel, id: ObjectId, bits: u32) -> Result<(), KernelError> {
        let flag = kernel.objects.get::<EventFlag>(id)?;
        flag.inner.lock().pattern &= bits;
        Ok(())
    }

    /// sceKernelWaitEventFlag / sceKernelWaitEventFlagCB
    #[allow(clippy::too_many_arguments)]
    pub fn sce_kernel_wait_event_flag(
        kernel: &mut Kernel,
        id: ObjectId,
        bits: u32,
        mode: u32,
        out_address: u32,
        timeout_address: u32,
        callbacks: bool,
    ) -> Result<WaitOutcome<i32>, KernelError> {
        let flag = kernel.objects.get::<EventFlag>(id)?;
        check_wait_args(bits, mode)?;
        if flag.attr & ATTR_WAIT_MULTIPLE == 0 && flag.waiter_count() > 0 {
            return Err(KernelError::EvfMulti);
        }

        let (seen, matched) = flag.try_match(bits, mode);
        if matched {
            write_optional(&kernel.memory, out_address, seen)?;
            return Ok(WaitOutcome::Completed(0));
        }

        let timeout = kernel.read_timeout(timeout_address)?;
        let priority = kernel.thread(kernel.current_thread_id()?)?.priority();
        let mut descriptor = WaitDescriptor::new(WaitKind::EventFlag, id)
            .with_timeout(timeout, timeout_address)
            .with_callbacks(callbacks);
        descriptor.argument = bits;
        descriptor.event_mode = mode;
        descriptor.result_address = out_address;
        let thread = kernel.begin_wait(descriptor)?;

        enqueue(
            &mut flag.inner.lock().waiters,
            EvfWaiter {
                thread,
                bits,
                mode,
                out_address,
                priority,
            },
            flag.attr & ATTR_THPRI != 0,
            |w| w.priority,
        );
        Ok(WaitOutcome::Blocked)
    }

    /// sceKernelPollEventFlag
    pub fn sce_kernel_poll_event_flag(
        kernel: &mut Kernel,
        id: ObjectId,
        bits: u32,
        mode: u32,
        out_address: u32,
    ) -> Result<(), KernelError> {
        let flag = kernel.objects.get::<EventFlag>(id)?;
        check_wait_args(bits, mode)?;
        if flag.attr & ATTR_WAIT_MULTIPLE == 0 && flag.waiter_count() > 0 {
            return Err(KernelError::EvfMulti);
        }

        let (seen, matched) = flag.try_match(bits, mode);
        write_optional(&kernel.memory, out_address, seen)?;
        if matched {
            Ok(())
        } else {
            Err(KernelError::EvfCond)
        }
    }

    /// sceKernelCancelEventFlag
    pub fn sce_kernel_cancel_event_flag(
        kernel: &mut Kernel,
        id: ObjectId,
        new_pattern: u32,
        num_wait_address: u32,
    ) -> Result<(), KernelError> {
        let flag = kernel.objects.get::<EventFlag>(id)?;
        let waiters = flag.drain_waiters();
        flag.inner.lock().pattern = new_pattern;
        write_optional(&kernel.memory, num_wait_address, waiters.len() as u32)?;
        kernel.wake_all(waiters, KernelError::WaitCancelled.code());
        Ok(())
    }

    /// sceKernelReferEventFlagStatus
    pub fn sce_kernel_refer_event_flag_status(
        kernel: &mut Kernel,
        id: ObjectId,
        info_address: u32,
    ) -> Result<(), KernelError> {
        let flag = kernel.objects.get::<EventFlag>(id)?;
        let (pattern, waiting) = {
            let state = flag.inner.lock();
            (state.pattern, state.waiters.len())
        };
        write_status(
            &kernel.memory,
            info_address,
            &flag.name,
            &[flag.attr, flag.init_pattern, pattern, waiting as u32],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::syscalls::*;
    use super::wait_mode::*;
    use super::*;
    use crate::kernel::tests::{boot, run_as};
    use crate::thread::ThreadStatus;

    const OUT: u32 = 0x0890_0000;

    #[test]
    fn test_fast_path_and_clear() {
        let mut kernel = boot();
        run_as(&mut kernel, "main", 0x20);
        let flag = sce_kernel_create_event_flag(&mut kernel, "evf", 0, 0b1011).unwrap();

        let outcome = sce_kernel_wait_event_flag(&mut kernel, flag, 0b0011, AND | CLEAR_PAT, OUT, 0, false).unwrap();
        assert_eq!(outcome, WaitOutcome::Completed(0));
        assert_eq!(kernel.memory().read_u32(OUT).unwrap(), 0b1011);
        assert_eq!(kernel.objects.get::<EventFlag>(flag).unwrap().pattern(), 0b1000);

        sce_kernel_poll_event_flag(&mut kernel, flag, 0b1001, OR | CLEAR_ALL, 0).unwrap();
        assert_eq!(kernel.objects.get::<EventFlag>(flag).unwrap().pattern(), 0);
    }

    #[test]
    fn test_argument_errors() {
        let mut kernel = boot();
        run_as(&mut kernel, "main", 0x20);
        let flag = sce_kernel_create_event_flag(&mut kernel, "evf", 0, 0).unwrap();

        assert_eq!(
            sce_kernel_wait_event_flag(&mut kernel, flag, 0, AND, 0, 0, false),
            Err(KernelError::EvfIlpat)
        );
        assert_eq!(
            sce_kernel_poll_event_flag(&mut kernel, flag, 1, 0x4, 0),
            Err(KernelError::IllegalArgument)
        );
        assert_eq!(
            sce_kernel_poll_event_flag(&mut kernel, flag, 1, AND, OUT),
            Err(KernelError::EvfCond)
        );
    }

    #[test]
    fn test_set_wakes_matching_waiters() {
        let mut kernel = boot();
        let flag = sce_kernel_create_event_flag(&mut kernel, "evf", ATTR_WAIT_MULTIPLE, 0).unwrap();

        let a = run_as(&mut kernel, "a", 0x20);
        sce_kernel_wait_event_flag(&mut kernel, flag, 0b01, OR | CLEAR_PAT, OUT, 0, false).unwrap();
        let b = run_as(&mut kernel, "b", 0x20);
        sce_kernel_wait_event_flag(&mut kernel, flag, 0b11, AND, OUT + 4, 0, false).unwrap();

        run_as(&mut kernel, "main", 0x10);
        sce_kernel_set_event_flag(&mut kernel, flag, 0b10).unwrap();
        assert_eq!(kernel.thread(a).unwrap().status(), ThreadStatus::WAITING);
        assert_eq!(kernel.thread(b).unwrap().status(), ThreadStatus::WAITING);

        // `a` wakes first and clears bit 0, so `b` keeps waiting
        sce_kernel_set_event_flag(&mut kernel, flag, 0b01).unwrap();
        assert_eq!(kernel.thread(a).unwrap().status(), ThreadStatus::READY);
        assert_eq!(kernel.memory().read_u32(OUT).unwrap(), 0b11);
        assert_eq!(kernel.thread(b).unwrap().status(), ThreadStatus::WAITING);

        sce_kernel_set_event_flag(&mut kernel, flag, 0b01).unwrap();
        assert_eq!(kernel.thread(b).unwrap().status(), ThreadStatus::READY);
        assert_eq!(kernel.memory().read_u32(OUT + 4).unwrap(), 0b11);
    }

    #[test]
    fn test_single_waiter_flag() {
        let mut kernel = boot();
        let flag = sce_kernel_create_event_flag(&mut kernel, "evf", 0, 0).unwrap();
        run_as(&mut kernel, "a", 0x20);
        sce_kernel_wait_event_flag(&mut kernel, flag, 1, AND, 0, 0, false).unwrap();
        run_as(&mut kernel, "b", 0x20);
        assert_eq!(
            sce_kernel_wait_event_flag(&mut kernel, flag, 1, AND, 0, 0, false),
            Err(KernelError::EvfMulti)
        );
    }

    #[test]
    fn test_cancel_clear_and_refer() {
        let mut kernel = boot();
        let flag = sce_kernel_create_event_flag(&mut kernel, "evf", 0, 0xF0).unwrap();
        let a = run_as(&mut kernel, "a", 0x20);
        sce_kernel_wait_event_flag(&mut kernel, flag, 1, AND, 0, 0, false).unwrap();

        run_as(&mut kernel, "main", 0x20);
        sce_kernel_cancel_event_flag(&mut kernel, flag, 0xFF, OUT).unwrap();
        assert_eq!(kernel.memory().read_u32(OUT).unwrap(), 1);
        assert_eq!(kernel.thread(a).unwrap().wake_result(), KernelError::WaitCancelled.code());

        sce_kernel_clear_event_flag(&mut kernel, flag, 0x0F).unwrap();
        let info = 0x0890_0100;
        sce_kernel_refer_event_flag_status(&mut kernel, flag, info).unwrap();
        assert_eq!(kernel.memory().read_u32(info + 40).unwrap(), 0xF0);
        assert_eq!(kernel.memory().read_u32(info + 44).unwrap(), 0x0F);
        assert_eq!(kernel.memory().read_u32(info + 48).unwrap(), 0);

        sce_kernel_delete_event_flag(&mut kernel, flag).unwrap();
        assert_eq!(
            sce_kernel_set_event_flag(&mut kernel, flag, 1),
            Err(KernelError::UnknownEventFlag(flag))
        );
    }
}
