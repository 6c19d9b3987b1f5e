//! Wait/wake engine
//!
//! Every blocking kernel call follows the same shape: try the fast path,
//! otherwise park the calling thread with a [`WaitDescriptor`] and hand
//! control back to the dispatch loop. The thread comes back through
//! [`Kernel::wake_thread`], either because the object it waits on changed,
//! because its timeout expired, or because the object was cancelled or
//! deleted.

use crate::kernel::Kernel;
use crate::objects::ObjectId;
use crate::thread::{Thread, ThreadId, ThreadStatus};
use psp_core::cpu::regs;
use psp_core::error::KernelError;

/// What a thread is blocked on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitKind {
    Sleep,
    Delay,
    Semaphore,
    EventFlag,
    Mailbox,
    VariablePool,
    FixedPool,
    MessagePipe,
    Join,
    EventHandler,
    Reserved,
    Mutex,
}

/// Everything needed to resume a waiting thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitDescriptor {
    pub kind: WaitKind,
    /// Object waited on (0 for sleeps and delays)
    pub handle: ObjectId,
    /// Timeout in ticks, 0 waits forever
    pub timeout: u64,
    /// Tick the wait started at
    pub timestamp: u64,
    pub event_mode: u32,
    pub argument: u32,
    /// Guest buffer the operation transfers to or from
    pub address: u32,
    /// Guest word receiving the operation's output value
    pub result_address: u32,
    /// Guest word holding the timeout; gets the remaining ticks on wake
    pub timeout_address: u32,
    /// Callbacks may run while waiting
    pub callbacks: bool,
    /// Message pipe direction
    pub sending: bool,
}

impl WaitDescriptor {
    pub fn new(kind: WaitKind, handle: ObjectId) -> Self {
        Self {
            kind,
            handle,
            timeout: 0,
            timestamp: 0,
            event_mode: 0,
            argument: 0,
            address: 0,
            result_address: 0,
            timeout_address: 0,
            callbacks: false,
            sending: false,
        }
    }

    pub fn with_timeout(mut self, ticks: u64, timeout_address: u32) -> Self {
        self.timeout = ticks;
        self.timeout_address = timeout_address;
        self
    }

    pub fn with_callbacks(mut self, callbacks: bool) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Tick at which the wait times out, if it has a timeout
    pub fn deadline(&self) -> Option<u64> {
        (self.timeout != 0).then(|| self.timestamp.saturating_add(self.timeout))
    }
}

/// Result of an operation that may block the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    /// Finished without blocking
    Completed(T),
    /// Caller is parked; its result arrives in v0 when it wakes
    Blocked,
}

impl<T> WaitOutcome<T> {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked)
    }
}

impl Kernel {
    /// Turn a guest timeout pointer into ticks. A null pointer waits forever.
    ///
    /// A zero timeout expires on the next clock advance.
    pub fn read_timeout(&self, timeout_address: u32) -> Result<u64, KernelError> {
        if timeout_address == 0 {
            return Ok(0);
        }
        let micros = self.memory.read_u32(timeout_address)?;
        Ok(u64::from(micros).max(1))
    }

    /// Park the current thread. The caller still has to queue it on the
    /// waited object.
    pub fn begin_wait(&mut self, descriptor: WaitDescriptor) -> Result<ThreadId, KernelError> {
        if self.delivering.is_some() {
            return Err(KernelError::IllegalContext);
        }
        let id = self.current_thread_id()?;
        let thread = self.thread(id)?;
        let now = self.clock.now();

        {
            let mut inner = thread.inner();
            let mut descriptor = descriptor;
            descriptor.timestamp = now;
            tracing::trace!("Thread 0x{:x} waits on {:?} 0x{:x}", id, descriptor.kind, descriptor.handle);
            inner.status.remove(ThreadStatus::RUNNING | ThreadStatus::READY);
            inner.status.insert(ThreadStatus::WAITING);
            inner.wait = Some(descriptor);
            inner.wake_result = 0;
        }

        self.ready.remove(id);
        self.current = None;
        Ok(id)
    }

    /// Release a waiting thread with `result` in v0.
    ///
    /// The thread must already be off the waited object's queue.
    pub fn wake_thread(&mut self, id: ThreadId, result: i32) {
        let thread = match self.thread(id) {
            Ok(thread) => thread,
            Err(_) => {
                tracing::warn!("Wake of unknown thread 0x{:x}", id);
                return;
            }
        };

        let now = self.clock.now();
        let (wait, context, priority, runnable) = {
            let mut inner = thread.inner();
            let Some(wait) = inner.wait.take() else {
                tracing::warn!("Wake of thread 0x{:x} which is not waiting", id);
                return;
            };
            inner.status.remove(ThreadStatus::WAITING);
            inner.wake_result = result;
            let runnable = !inner.status.contains(ThreadStatus::SUSPENDED);
            if runnable {
                inner.status.insert(ThreadStatus::READY);
            }
            (wait, inner.context, inner.priority, runnable)
        };

        if wait.timeout_address != 0 {
            if let Some(deadline) = wait.deadline() {
                let remaining = deadline.saturating_sub(now).min(u64::from(u32::MAX)) as u32;
                if let Err(e) = self.memory.write_u32(wait.timeout_address, remaining) {
                    tracing::warn!("Thread 0x{:x}: cannot write remaining timeout: {}", id, e);
                }
            }
        }

        if let Some(context) = context {
            self.cpu.set_register(context, regs::V0, result as u32);
        }
        if runnable {
            self.schedule(id, priority);
        }
        tracing::trace!("Woke thread 0x{:x} from {:?} with 0x{:08x}", id, wait.kind, result);
    }

    /// Wake a batch of threads with the same result
    pub fn wake_all(&mut self, threads: impl IntoIterator<Item = ThreadId>, result: i32) {
        for id in threads {
            self.wake_thread(id, result);
        }
    }

    /// Remove a thread from the queue of the object it waits on
    pub(crate) fn detach_waiter(&self, id: ThreadId, wait: &WaitDescriptor) {
        match wait.kind {
            WaitKind::Sleep | WaitKind::Delay => {}
            _ => match self.objects.get_dyn(wait.handle) {
                Some(object) => {
                    if !object.remove_waiter(id) {
                        tracing::debug!("Thread 0x{:x} was not queued on 0x{:x}", id, wait.handle);
                    }
                }
                None => tracing::debug!("Waited object 0x{:x} is gone", wait.handle),
            },
        }
    }

    /// Advance guest time and fire the timeouts that became due
    pub fn advance_clock(&mut self, ticks: u64) -> usize {
        self.clock.advance(ticks);
        self.expire_timeouts()
    }

    /// Wake every thread whose timeout has passed. Returns how many woke.
    pub fn expire_timeouts(&mut self) -> usize {
        let now = self.clock.now();
        let expired: Vec<(ThreadId, WaitDescriptor)> = self
            .threads
            .iter()
            .filter_map(|&id| {
                let thread = self.objects.get::<Thread>(id).ok()?;
                let inner = thread.inner();
                let wait = inner.wait.as_ref()?;
                let deadline = wait.deadline()?;
                (now >= deadline).then(|| (id, wait.clone()))
            })
            .collect();

        for (id, wait) in &expired {
            self.detach_waiter(*id, wait);
            let result = match wait.kind {
                WaitKind::Delay => 0,
                _ => KernelError::Timeout.code(),
            };
            tracing::trace!("Thread 0x{:x} timed out on {:?}", id, wait.kind);
            self.wake_thread(*id, result);
        }
        expired.len()
    }

    /// Earliest pending timeout, so an idle dispatch loop knows how far to skip
    pub fn next_deadline(&self) -> Option<u64> {
        self.threads
            .iter()
            .filter_map(|&id| {
                let thread = self.objects.get::<Thread>(id).ok()?;
                let inner = thread.inner();
                inner.wait.as_ref()?.deadline()
            })
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline() {
        let mut wait = WaitDescriptor::new(WaitKind::Semaphore, 3).with_timeout(100, 0);
        wait.timestamp = 50;
        assert_eq!(wait.deadline(), Some(150));

        let wait = WaitDescriptor::new(WaitKind::Sleep, 0);
        assert_eq!(wait.deadline(), None);
    }

    #[test]
    fn test_outcome() {
        assert!(WaitOutcome::<i32>::Blocked.is_blocked());
        assert!(!WaitOutcome::Completed(0).is_blocked());
    }
}
