//! Syscall dispatcher
//!
//! Guest imports are bound to NIDs. The table below maps each NID the kernel
//! knows about to its handler; NIDs that are recognized but not emulated keep
//! an entry without a handler so they log by name.

use crate::callback::syscalls as callback_sc;
use crate::kernel::Kernel;
use crate::memory::syscalls as memory_sc;
use crate::sync::event_flag::syscalls as evf_sc;
use crate::sync::msgpipe::syscalls as mpp_sc;
use crate::sync::mutex::syscalls as mutex_sc;
use crate::sync::semaphore::syscalls as sema_sc;
use crate::syscall_numbers::*;
use crate::thread::syscalls as thread_sc;
use crate::time::syscalls as time_sc;
use crate::wait::WaitOutcome;
use once_cell::sync::Lazy;
use psp_core::cpu::{regs, ContextId, ExecutionContexts};
use psp_core::error::{KernelError, NOT_IMPLEMENTED_STATUS};
use std::collections::HashMap;

/// Number of argument registers (a0-a3, t0-t3)
pub const NUM_ARGS: usize = 8;

/// Syscall arguments as read from the caller's registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyscallArgs([u32; NUM_ARGS]);

impl SyscallArgs {
    pub fn new(args: [u32; NUM_ARGS]) -> Self {
        Self(args)
    }

    /// Read a0-a3 and t0-t3 from a context
    pub fn from_context(cpu: &dyn ExecutionContexts, context: ContextId) -> Self {
        let mut args = [0u32; NUM_ARGS];
        for (i, arg) in args.iter_mut().enumerate() {
            *arg = cpu.register(context, regs::A0 + i);
        }
        Self(args)
    }

    pub fn get(&self, index: usize) -> u32 {
        self.0[index]
    }

    pub fn signed(&self, index: usize) -> i32 {
        self.0[index] as i32
    }
}

/// How the caller continues after a syscall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallReturn {
    /// Resume the caller with this value in v0
    Value(i32),
    /// Put the value in v0, then run the dispatcher; the call may have made a
    /// higher-priority thread ready
    Yield(i32),
    /// The caller blocked or exited. A blocked caller gets v0 when it wakes.
    Reschedule,
}

impl SyscallReturn {
    /// Value for the caller's v0, if it gets one now
    pub fn value(&self) -> Option<i32> {
        match *self {
            Self::Value(v) | Self::Yield(v) => Some(v),
            Self::Reschedule => None,
        }
    }

    /// Whether the dispatcher has to pick the next thread
    pub fn needs_dispatch(&self) -> bool {
        !matches!(self, Self::Value(_))
    }
}

impl From<WaitOutcome<i32>> for SyscallReturn {
    fn from(outcome: WaitOutcome<i32>) -> Self {
        match outcome {
            WaitOutcome::Completed(v) => Self::Value(v),
            WaitOutcome::Blocked => Self::Reschedule,
        }
    }
}

/// Result of a handler; errors reach the guest as their status code
pub type HandlerResult = Result<SyscallReturn, KernelError>;

/// Handler signature shared by every table entry
pub type SyscallFn = fn(&mut Kernel, &SyscallArgs) -> HandlerResult;

/// One NID in the table
#[derive(Clone, Copy)]
pub struct SyscallEntry {
    pub name: &'static str,
    /// `None` for functions that are recognized but not emulated
    pub handler: Option<SyscallFn>,
}

fn name_arg(kernel: &Kernel, address: u32) -> Result<String, KernelError> {
    Ok(kernel.memory().read_cstring(address)?)
}

fn ok(value: u32) -> HandlerResult {
    Ok(SyscallReturn::Value(value as i32))
}

fn yielded() -> HandlerResult {
    Ok(SyscallReturn::Yield(0))
}

// Threads

fn create_thread(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    let name = name_arg(k, a.get(0))?;
    ok(thread_sc::sce_kernel_create_thread(k, &name, a.get(1), a.get(2), a.get(3), a.get(4))?)
}

fn delete_thread(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    thread_sc::sce_kernel_delete_thread(k, a.get(0))?;
    ok(0)
}

fn start_thread(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    thread_sc::sce_kernel_start_thread(k, a.get(0), a.get(1), a.get(2))?;
    yielded()
}

fn exit_thread(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    thread_sc::sce_kernel_exit_thread(k, a.signed(0))?;
    Ok(SyscallReturn::Reschedule)
}

fn exit_delete_thread(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    thread_sc::sce_kernel_exit_delete_thread(k, a.signed(0))?;
    Ok(SyscallReturn::Reschedule)
}

fn terminate_thread(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    thread_sc::sce_kernel_terminate_thread(k, a.get(0))?;
    yielded()
}

fn terminate_delete_thread(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    thread_sc::sce_kernel_terminate_delete_thread(k, a.get(0))?;
    yielded()
}

fn change_thread_priority(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    thread_sc::sce_kernel_change_thread_priority(k, a.get(0), a.get(1))?;
    yielded()
}

fn wait_thread_end(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    Ok(thread_sc::sce_kernel_wait_thread_end(k, a.get(0), a.get(1), false)?.into())
}

fn wait_thread_end_cb(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    Ok(thread_sc::sce_kernel_wait_thread_end(k, a.get(0), a.get(1), true)?.into())
}

fn get_thread_id(k: &mut Kernel, _a: &SyscallArgs) -> HandlerResult {
    ok(thread_sc::sce_kernel_get_thread_id(k)?)
}

fn get_thread_current_priority(k: &mut Kernel, _a: &SyscallArgs) -> HandlerResult {
    ok(thread_sc::sce_kernel_get_thread_current_priority(k)?)
}

fn get_thread_exit_status(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    Ok(SyscallReturn::Value(thread_sc::sce_kernel_get_thread_exit_status(k, a.get(0))?))
}

fn sleep_thread(k: &mut Kernel, _a: &SyscallArgs) -> HandlerResult {
    Ok(thread_sc::sce_kernel_sleep_thread(k, false)?.into())
}

fn sleep_thread_cb(k: &mut Kernel, _a: &SyscallArgs) -> HandlerResult {
    Ok(thread_sc::sce_kernel_sleep_thread(k, true)?.into())
}

fn wakeup_thread(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    thread_sc::sce_kernel_wakeup_thread(k, a.get(0))?;
    yielded()
}

fn cancel_wakeup_thread(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    ok(thread_sc::sce_kernel_cancel_wakeup_thread(k, a.get(0))?)
}

fn suspend_thread(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    thread_sc::sce_kernel_suspend_thread(k, a.get(0))?;
    ok(0)
}

fn resume_thread(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    thread_sc::sce_kernel_resume_thread(k, a.get(0))?;
    yielded()
}

fn delay_thread(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    Ok(thread_sc::sce_kernel_delay_thread(k, a.get(0), false)?.into())
}

fn delay_thread_cb(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    Ok(thread_sc::sce_kernel_delay_thread(k, a.get(0), true)?.into())
}

// Callbacks

fn create_callback(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    let name = name_arg(k, a.get(0))?;
    ok(callback_sc::sce_kernel_create_callback(k, &name, a.get(1), a.get(2))?)
}

fn delete_callback(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    callback_sc::sce_kernel_delete_callback(k, a.get(0))?;
    ok(0)
}

fn notify_callback(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    callback_sc::sce_kernel_notify_callback(k, a.get(0), a.get(1))?;
    ok(0)
}

fn check_callback(k: &mut Kernel, _a: &SyscallArgs) -> HandlerResult {
    let pending = callback_sc::sce_kernel_check_callback(k)?;
    Ok(SyscallReturn::Yield(pending as i32))
}

// Semaphores

fn create_sema(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    let name = name_arg(k, a.get(0))?;
    ok(sema_sc::sce_kernel_create_sema(k, &name, a.get(1), a.signed(2), a.signed(3))?)
}

fn delete_sema(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    sema_sc::sce_kernel_delete_sema(k, a.get(0))?;
    yielded()
}

fn signal_sema(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    sema_sc::sce_kernel_signal_sema(k, a.get(0), a.signed(1))?;
    yielded()
}

fn wait_sema(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    Ok(sema_sc::sce_kernel_wait_sema(k, a.get(0), a.signed(1), a.get(2), false)?.into())
}

fn wait_sema_cb(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    Ok(sema_sc::sce_kernel_wait_sema(k, a.get(0), a.signed(1), a.get(2), true)?.into())
}

fn poll_sema(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    sema_sc::sce_kernel_poll_sema(k, a.get(0), a.signed(1))?;
    ok(0)
}

fn cancel_sema(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    sema_sc::sce_kernel_cancel_sema(k, a.get(0), a.signed(1), a.get(2))?;
    yielded()
}

fn refer_sema_status(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    sema_sc::sce_kernel_refer_sema_status(k, a.get(0), a.get(1))?;
    ok(0)
}

// Event flags

fn create_event_flag(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    let name = name_arg(k, a.get(0))?;
    ok(evf_sc::sce_kernel_create_event_flag(k, &name, a.get(1), a.get(2))?)
}

fn delete_event_flag(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    evf_sc::sce_kernel_delete_event_flag(k, a.get(0))?;
    yielded()
}

fn set_event_flag(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    evf_sc::sce_kernel_set_event_flag(k, a.get(0), a.get(1))?;
    yielded()
}

fn clear_event_flag(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    evf_sc::sce_kernel_clear_event_flag(k, a.get(0), a.get(1))?;
    ok(0)
}

fn wait_event_flag(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    Ok(evf_sc::sce_kernel_wait_event_flag(k, a.get(0), a.get(1), a.get(2), a.get(3), a.get(4), false)?.into())
}

fn wait_event_flag_cb(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    Ok(evf_sc::sce_kernel_wait_event_flag(k, a.get(0), a.get(1), a.get(2), a.get(3), a.get(4), true)?.into())
}

fn poll_event_flag(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    evf_sc::sce_kernel_poll_event_flag(k, a.get(0), a.get(1), a.get(2), a.get(3))?;
    ok(0)
}

fn cancel_event_flag(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    evf_sc::sce_kernel_cancel_event_flag(k, a.get(0), a.get(1), a.get(2))?;
    yielded()
}

fn refer_event_flag_status(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    evf_sc::sce_kernel_refer_event_flag_status(k, a.get(0), a.get(1))?;
    ok(0)
}

// Mutexes

fn create_mutex(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    let name = name_arg(k, a.get(0))?;
    ok(mutex_sc::sce_kernel_create_mutex(k, &name, a.get(1), a.signed(2))?)
}

fn delete_mutex(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    mutex_sc::sce_kernel_delete_mutex(k, a.get(0))?;
    yielded()
}

fn lock_mutex(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    Ok(mutex_sc::sce_kernel_lock_mutex(k, a.get(0), a.signed(1), a.get(2), false)?.into())
}

fn lock_mutex_cb(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    Ok(mutex_sc::sce_kernel_lock_mutex(k, a.get(0), a.signed(1), a.get(2), true)?.into())
}

fn try_lock_mutex(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    mutex_sc::sce_kernel_try_lock_mutex(k, a.get(0), a.signed(1))?;
    ok(0)
}

fn unlock_mutex(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    mutex_sc::sce_kernel_unlock_mutex(k, a.get(0), a.signed(1))?;
    yielded()
}

fn cancel_mutex(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    mutex_sc::sce_kernel_cancel_mutex(k, a.get(0), a.signed(1), a.get(2))?;
    yielded()
}

fn refer_mutex_status(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    mutex_sc::sce_kernel_refer_mutex_status(k, a.get(0), a.get(1))?;
    ok(0)
}

// Message pipes

fn create_msg_pipe(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    let name = name_arg(k, a.get(0))?;
    ok(mpp_sc::sce_kernel_create_msg_pipe(k, &name, a.get(1), a.get(2), a.get(3))?)
}

fn delete_msg_pipe(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    mpp_sc::sce_kernel_delete_msg_pipe(k, a.get(0))?;
    ok(0)
}

fn send_msg_pipe(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    Ok(mpp_sc::sce_kernel_send_msg_pipe(k, a.get(0), a.get(1), a.get(2), a.get(3), a.get(4), a.get(5), false)?.into())
}

fn send_msg_pipe_cb(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    Ok(mpp_sc::sce_kernel_send_msg_pipe(k, a.get(0), a.get(1), a.get(2), a.get(3), a.get(4), a.get(5), true)?.into())
}

fn try_send_msg_pipe(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    mpp_sc::sce_kernel_try_send_msg_pipe(k, a.get(0), a.get(1), a.get(2), a.get(3), a.get(4))?;
    yielded()
}

fn receive_msg_pipe(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    Ok(mpp_sc::sce_kernel_receive_msg_pipe(k, a.get(0), a.get(1), a.get(2), a.get(3), a.get(4), a.get(5), false)?.into())
}

fn receive_msg_pipe_cb(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    Ok(mpp_sc::sce_kernel_receive_msg_pipe(k, a.get(0), a.get(1), a.get(2), a.get(3), a.get(4), a.get(5), true)?.into())
}

fn try_receive_msg_pipe(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    mpp_sc::sce_kernel_try_receive_msg_pipe(k, a.get(0), a.get(1), a.get(2), a.get(3), a.get(4))?;
    yielded()
}

fn cancel_msg_pipe(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    mpp_sc::sce_kernel_cancel_msg_pipe(k, a.get(0), a.get(1), a.get(2))?;
    yielded()
}

fn refer_msg_pipe_status(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    mpp_sc::sce_kernel_refer_msg_pipe_status(k, a.get(0), a.get(1))?;
    ok(0)
}

// Time

fn get_system_time(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    let now = time_sc::sce_kernel_get_system_time_wide(k);
    k.memory().write_u64(a.get(0), now)?;
    ok(0)
}

fn get_system_time_low(k: &mut Kernel, _a: &SyscallArgs) -> HandlerResult {
    ok(time_sc::sce_kernel_get_system_time_low(k))
}

// Partition memory

fn alloc_partition_memory(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    let name = name_arg(k, a.get(1))?;
    ok(memory_sc::sce_kernel_alloc_partition_memory(k, a.get(0), &name, a.get(2), a.get(3), a.get(4))?)
}

fn free_partition_memory(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    memory_sc::sce_kernel_free_partition_memory(k, a.get(0))?;
    ok(0)
}

fn get_block_head_addr(k: &mut Kernel, a: &SyscallArgs) -> HandlerResult {
    ok(memory_sc::sce_kernel_get_block_head_addr(k, a.get(0))?)
}

fn max_free_mem_size(k: &mut Kernel, _a: &SyscallArgs) -> HandlerResult {
    ok(memory_sc::sce_kernel_max_free_mem_size(k)?)
}

fn total_free_mem_size(k: &mut Kernel, _a: &SyscallArgs) -> HandlerResult {
    ok(memory_sc::sce_kernel_total_free_mem_size(k)?)
}

const SYSCALLS: &[(u32, &str, Option<SyscallFn>)] = &[
    (SCE_KERNEL_CREATE_THREAD, "sceKernelCreateThread", Some(create_thread)),
    (SCE_KERNEL_DELETE_THREAD, "sceKernelDeleteThread", Some(delete_thread)),
    (SCE_KERNEL_START_THREAD, "sceKernelStartThread", Some(start_thread)),
    (SCE_KERNEL_EXIT_THREAD, "sceKernelExitThread", Some(exit_thread)),
    (SCE_KERNEL_EXIT_DELETE_THREAD, "sceKernelExitDeleteThread", Some(exit_delete_thread)),
    (SCE_KERNEL_TERMINATE_THREAD, "sceKernelTerminateThread", Some(terminate_thread)),
    (SCE_KERNEL_TERMINATE_DELETE_THREAD, "sceKernelTerminateDeleteThread", Some(terminate_delete_thread)),
    (SCE_KERNEL_CHANGE_THREAD_PRIORITY, "sceKernelChangeThreadPriority", Some(change_thread_priority)),
    (SCE_KERNEL_WAIT_THREAD_END, "sceKernelWaitThreadEnd", Some(wait_thread_end)),
    (SCE_KERNEL_WAIT_THREAD_END_CB, "sceKernelWaitThreadEndCB", Some(wait_thread_end_cb)),
    (SCE_KERNEL_GET_THREAD_ID, "sceKernelGetThreadId", Some(get_thread_id)),
    (SCE_KERNEL_GET_THREAD_CURRENT_PRIORITY, "sceKernelGetThreadCurrentPriority", Some(get_thread_current_priority)),
    (SCE_KERNEL_GET_THREAD_EXIT_STATUS, "sceKernelGetThreadExitStatus", Some(get_thread_exit_status)),
    (SCE_KERNEL_ROTATE_THREAD_READY_QUEUE, "sceKernelRotateThreadReadyQueue", None),
    (SCE_KERNEL_SLEEP_THREAD, "sceKernelSleepThread", Some(sleep_thread)),
    (SCE_KERNEL_SLEEP_THREAD_CB, "sceKernelSleepThreadCB", Some(sleep_thread_cb)),
    (SCE_KERNEL_WAKEUP_THREAD, "sceKernelWakeupThread", Some(wakeup_thread)),
    (SCE_KERNEL_CANCEL_WAKEUP_THREAD, "sceKernelCancelWakeupThread", Some(cancel_wakeup_thread)),
    (SCE_KERNEL_SUSPEND_THREAD, "sceKernelSuspendThread", Some(suspend_thread)),
    (SCE_KERNEL_RESUME_THREAD, "sceKernelResumeThread", Some(resume_thread)),
    (SCE_KERNEL_DELAY_THREAD, "sceKernelDelayThread", Some(delay_thread)),
    (SCE_KERNEL_DELAY_THREAD_CB, "sceKernelDelayThreadCB", Some(delay_thread_cb)),
    (SCE_KERNEL_CREATE_CALLBACK, "sceKernelCreateCallback", Some(create_callback)),
    (SCE_KERNEL_DELETE_CALLBACK, "sceKernelDeleteCallback", Some(delete_callback)),
    (SCE_KERNEL_NOTIFY_CALLBACK, "sceKernelNotifyCallback", Some(notify_callback)),
    (SCE_KERNEL_CHECK_CALLBACK, "sceKernelCheckCallback", Some(check_callback)),
    (SCE_KERNEL_CREATE_SEMA, "sceKernelCreateSema", Some(create_sema)),
    (SCE_KERNEL_DELETE_SEMA, "sceKernelDeleteSema", Some(delete_sema)),
    (SCE_KERNEL_SIGNAL_SEMA, "sceKernelSignalSema", Some(signal_sema)),
    (SCE_KERNEL_WAIT_SEMA, "sceKernelWaitSema", Some(wait_sema)),
    (SCE_KERNEL_WAIT_SEMA_CB, "sceKernelWaitSemaCB", Some(wait_sema_cb)),
    (SCE_KERNEL_POLL_SEMA, "sceKernelPollSema", Some(poll_sema)),
    (SCE_KERNEL_CANCEL_SEMA, "sceKernelCancelSema", Some(cancel_sema)),
    (SCE_KERNEL_REFER_SEMA_STATUS, "sceKernelReferSemaStatus", Some(refer_sema_status)),
    (SCE_KERNEL_CREATE_EVENT_FLAG, "sceKernelCreateEventFlag", Some(create_event_flag)),
    (SCE_KERNEL_DELETE_EVENT_FLAG, "sceKernelDeleteEventFlag", Some(delete_event_flag)),
    (SCE_KERNEL_SET_EVENT_FLAG, "sceKernelSetEventFlag", Some(set_event_flag)),
    (SCE_KERNEL_CLEAR_EVENT_FLAG, "sceKernelClearEventFlag", Some(clear_event_flag)),
    (SCE_KERNEL_WAIT_EVENT_FLAG, "sceKernelWaitEventFlag", Some(wait_event_flag)),
    (SCE_KERNEL_WAIT_EVENT_FLAG_CB, "sceKernelWaitEventFlagCB", Some(wait_event_flag_cb)),
    (SCE_KERNEL_POLL_EVENT_FLAG, "sceKernelPollEventFlag", Some(poll_event_flag)),
    (SCE_KERNEL_CANCEL_EVENT_FLAG, "sceKernelCancelEventFlag", Some(cancel_event_flag)),
    (SCE_KERNEL_REFER_EVENT_FLAG_STATUS, "sceKernelReferEventFlagStatus", Some(refer_event_flag_status)),
    (SCE_KERNEL_CREATE_MUTEX, "sceKernelCreateMutex", Some(create_mutex)),
    (SCE_KERNEL_DELETE_MUTEX, "sceKernelDeleteMutex", Some(delete_mutex)),
    (SCE_KERNEL_LOCK_MUTEX, "sceKernelLockMutex", Some(lock_mutex)),
    (SCE_KERNEL_LOCK_MUTEX_CB, "sceKernelLockMutexCB", Some(lock_mutex_cb)),
    (SCE_KERNEL_TRY_LOCK_MUTEX, "sceKernelTryLockMutex", Some(try_lock_mutex)),
    (SCE_KERNEL_UNLOCK_MUTEX, "sceKernelUnlockMutex", Some(unlock_mutex)),
    (SCE_KERNEL_CANCEL_MUTEX, "sceKernelCancelMutex", Some(cancel_mutex)),
    (SCE_KERNEL_REFER_MUTEX_STATUS, "sceKernelReferMutexStatus", Some(refer_mutex_status)),
    (SCE_KERNEL_CREATE_MSG_PIPE, "sceKernelCreateMsgPipe", Some(create_msg_pipe)),
    (SCE_KERNEL_DELETE_MSG_PIPE, "sceKernelDeleteMsgPipe", Some(delete_msg_pipe)),
    (SCE_KERNEL_SEND_MSG_PIPE, "sceKernelSendMsgPipe", Some(send_msg_pipe)),
    (SCE_KERNEL_SEND_MSG_PIPE_CB, "sceKernelSendMsgPipeCB", Some(send_msg_pipe_cb)),
    (SCE_KERNEL_TRY_SEND_MSG_PIPE, "sceKernelTrySendMsgPipe", Some(try_send_msg_pipe)),
    (SCE_KERNEL_RECEIVE_MSG_PIPE, "sceKernelReceiveMsgPipe", Some(receive_msg_pipe)),
    (SCE_KERNEL_RECEIVE_MSG_PIPE_CB, "sceKernelReceiveMsgPipeCB", Some(receive_msg_pipe_cb)),
    (SCE_KERNEL_TRY_RECEIVE_MSG_PIPE, "sceKernelTryReceiveMsgPipe", Some(try_receive_msg_pipe)),
    (SCE_KERNEL_CANCEL_MSG_PIPE, "sceKernelCancelMsgPipe", Some(cancel_msg_pipe)),
    (SCE_KERNEL_REFER_MSG_PIPE_STATUS, "sceKernelReferMsgPipeStatus", Some(refer_msg_pipe_status)),
    (SCE_KERNEL_CREATE_MBX, "sceKernelCreateMbx", None),
    (SCE_KERNEL_DELETE_MBX, "sceKernelDeleteMbx", None),
    (SCE_KERNEL_CREATE_VPL, "sceKernelCreateVpl", None),
    (SCE_KERNEL_CREATE_FPL, "sceKernelCreateFpl", None),
    (SCE_KERNEL_GET_SYSTEM_TIME, "sceKernelGetSystemTime", Some(get_system_time)),
    (SCE_KERNEL_GET_SYSTEM_TIME_LOW, "sceKernelGetSystemTimeLow", Some(get_system_time_low)),
    (SCE_KERNEL_ALLOC_PARTITION_MEMORY, "sceKernelAllocPartitionMemory", Some(alloc_partition_memory)),
    (SCE_KERNEL_FREE_PARTITION_MEMORY, "sceKernelFreePartitionMemory", Some(free_partition_memory)),
    (SCE_KERNEL_GET_BLOCK_HEAD_ADDR, "sceKernelGetBlockHeadAddr", Some(get_block_head_addr)),
    (SCE_KERNEL_MAX_FREE_MEM_SIZE, "sceKernelMaxFreeMemSize", Some(max_free_mem_size)),
    (SCE_KERNEL_TOTAL_FREE_MEM_SIZE, "sceKernelTotalFreeMemSize", Some(total_free_mem_size)),
    (SCE_IO_POLL_ASYNC, "sceIoPollAsync", None),
    (SCE_IO_WAIT_ASYNC, "sceIoWaitAsync", None),
    (SCE_IO_WAIT_ASYNC_CB, "sceIoWaitAsyncCB", None),
    (SCE_IO_SET_ASYNC_CALLBACK, "sceIoSetAsyncCallback", None),
    (SCE_IO_CHANGE_ASYNC_PRIORITY, "sceIoChangeAsyncPriority", None),
    (SCE_IO_CANCEL, "sceIoCancel", None),
    (SCE_IO_GET_ASYNC_STAT, "sceIoGetAsyncStat", None),
];

static SYSCALL_TABLE: Lazy<HashMap<u32, SyscallEntry>> = Lazy::new(|| {
    SYSCALLS
        .iter()
        .map(|&(nid, name, handler)| (nid, SyscallEntry { name, handler }))
        .collect()
});

/// System call handler owning the kernel
pub struct SyscallHandler {
    kernel: Kernel,
    trace: bool,
}

impl SyscallHandler {
    /// Create a new syscall handler. `trace` logs every call with its arguments.
    pub fn new(kernel: Kernel, trace: bool) -> Self {
        Self { kernel, trace }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut Kernel {
        &mut self.kernel
    }

    /// Table entry for a NID
    pub fn lookup(nid: u32) -> Option<&'static SyscallEntry> {
        SYSCALL_TABLE.get(&nid)
    }

    /// Number of NIDs in the table
    pub fn table_size() -> usize {
        SYSCALL_TABLE.len()
    }

    /// Handle a system call
    pub fn handle(&mut self, nid: u32, args: &SyscallArgs) -> SyscallReturn {
        let Some(entry) = Self::lookup(nid) else {
            tracing::warn!("Unknown syscall NID 0x{:08x}", nid);
            return SyscallReturn::Value(NOT_IMPLEMENTED_STATUS);
        };
        let Some(handler) = entry.handler else {
            tracing::warn!("{} (0x{:08x}) is not implemented", entry.name, nid);
            return SyscallReturn::Value(NOT_IMPLEMENTED_STATUS);
        };

        if self.trace {
            tracing::debug!("{}({:08x?})", entry.name, args.0);
        }

        match handler(&mut self.kernel, args) {
            Ok(result) => {
                if self.trace {
                    tracing::debug!("{} -> {:?}", entry.name, result);
                }
                result
            }
            Err(e) => {
                tracing::debug!("{} failed: {}", entry.name, e);
                SyscallReturn::Value(e.code())
            }
        }
    }

    /// Run a syscall for the current thread: arguments come from its
    /// registers, and an immediate result goes back into its v0.
    pub fn call(&mut self, nid: u32) -> SyscallReturn {
        let Some(thread) = self.kernel.current_thread() else {
            tracing::error!("Syscall 0x{:08x} without a running thread", nid);
            return SyscallReturn::Value(KernelError::IllegalContext.code());
        };
        let Some(context) = self.kernel.thread(thread).ok().and_then(|t| t.context()) else {
            tracing::error!("Running thread 0x{:x} has no context", thread);
            return SyscallReturn::Value(KernelError::IllegalContext.code());
        };

        let args = SyscallArgs::from_context(self.kernel.cpu(), context);
        let result = self.handle(nid, &args);
        if let Some(value) = result.value() {
            self.kernel.cpu_mut().set_register(context, regs::V0, value as u32);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tests::{boot, run_as};
    use crate::objects::KernelObject;
    use crate::thread::ThreadStatus;

    const NAME: u32 = 0x0890_0000;

    fn handler_with_name(name: &str) -> SyscallHandler {
        let kernel = boot();
        let mut bytes = name.as_bytes().to_vec();
        bytes.push(0);
        kernel.memory().write_bytes(NAME, &bytes).unwrap();
        SyscallHandler::new(kernel, true)
    }

    #[test]
    fn test_table_has_no_duplicate_nids() {
        assert_eq!(SyscallHandler::table_size(), SYSCALLS.len());
        assert_eq!(
            SyscallHandler::lookup(SCE_KERNEL_CREATE_THREAD).unwrap().name,
            "sceKernelCreateThread"
        );
    }

    #[test]
    fn test_unknown_and_stubbed_nids() {
        let mut handler = handler_with_name("x");
        let args = SyscallArgs::default();
        assert_eq!(
            handler.handle(0xDEAD_BEEF, &args),
            SyscallReturn::Value(NOT_IMPLEMENTED_STATUS)
        );
        for nid in [SCE_KERNEL_CREATE_MBX, SCE_KERNEL_ROTATE_THREAD_READY_QUEUE, SCE_IO_WAIT_ASYNC] {
            assert!(SyscallHandler::lookup(nid).unwrap().handler.is_none());
            assert_eq!(handler.handle(nid, &args), SyscallReturn::Value(NOT_IMPLEMENTED_STATUS));
        }
    }

    #[test]
    fn test_create_and_start_thread() {
        let mut handler = handler_with_name("worker");
        let args = SyscallArgs::new([NAME, 0x0880_0100, 0x20, 0x1000, 0, 0, 0, 0]);
        let SyscallReturn::Value(id) = handler.handle(SCE_KERNEL_CREATE_THREAD, &args) else {
            panic!("create should return a value");
        };
        assert!(id > 0);
        assert_eq!(handler.kernel().thread(id as u32).unwrap().name(), "worker");

        let args = SyscallArgs::new([id as u32, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(handler.handle(SCE_KERNEL_START_THREAD, &args), SyscallReturn::Yield(0));
        assert_eq!(
            handler.kernel().thread(id as u32).unwrap().status(),
            ThreadStatus::READY
        );
    }

    #[test]
    fn test_errors_become_codes() {
        let mut handler = handler_with_name("x");
        let args = SyscallArgs::new([42, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            handler.handle(SCE_KERNEL_SIGNAL_SEMA, &args),
            SyscallReturn::Value(KernelError::UnknownSemaphore(42).code())
        );
        assert_eq!(
            handler.handle(SCE_KERNEL_GET_THREAD_ID, &args),
            SyscallReturn::Value(KernelError::IllegalContext.code())
        );
    }

    #[test]
    fn test_call_uses_registers() {
        let mut handler = handler_with_name("sema");
        let main = run_as(handler.kernel_mut(), "main", 0x20);
        let context = handler.kernel().thread(main).unwrap().context().unwrap();

        assert_eq!(handler.call(SCE_KERNEL_GET_THREAD_ID), SyscallReturn::Value(main as i32));
        assert_eq!(handler.kernel().cpu().register(context, regs::V0), main);

        let cpu = handler.kernel_mut().cpu_mut();
        cpu.set_register(context, regs::A0, NAME);
        cpu.set_register(context, regs::A1, 0);
        cpu.set_register(context, regs::A2, 0);
        cpu.set_register(context, regs::A3, 1);
        let SyscallReturn::Value(sema) = handler.call(SCE_KERNEL_CREATE_SEMA) else {
            panic!("create should return a value");
        };

        // Blocks: no value now, v0 is written on wake
        let cpu = handler.kernel_mut().cpu_mut();
        cpu.set_register(context, regs::A0, sema as u32);
        cpu.set_register(context, regs::A1, 1);
        cpu.set_register(context, regs::A2, 0);
        assert_eq!(handler.call(SCE_KERNEL_WAIT_SEMA), SyscallReturn::Reschedule);
        assert!(handler.kernel().current_thread().is_none());

        sema_sc::sce_kernel_signal_sema(handler.kernel_mut(), sema as u32, 1).unwrap();
        assert_eq!(handler.kernel().cpu().register(context, regs::V0), 0);
        assert_eq!(handler.kernel().thread(main).unwrap().status(), ThreadStatus::READY);
    }

    #[test]
    fn test_sleep_and_system_time() {
        let mut handler = handler_with_name("x");
        run_as(handler.kernel_mut(), "main", 0x20);
        handler.kernel_mut().advance_clock(1234);

        assert_eq!(handler.call(SCE_KERNEL_GET_SYSTEM_TIME_LOW), SyscallReturn::Value(1234));
        let args = SyscallArgs::new([0x0890_0100, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(handler.handle(SCE_KERNEL_GET_SYSTEM_TIME, &args), SyscallReturn::Value(0));
        assert_eq!(handler.kernel().memory().read_u64(0x0890_0100).unwrap(), 1234);

        assert_eq!(handler.call(SCE_KERNEL_SLEEP_THREAD), SyscallReturn::Reschedule);
    }
}
