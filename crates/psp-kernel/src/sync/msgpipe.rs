//! Message pipe (sceKernel*MsgPipe*)
//!
//! A byte stream of fixed capacity between threads. Senders and receivers
//! queue separately and are served head first, so a large request at the
//! front holds back smaller ones behind it.
//!
//! The bytes themselves live on the host; the pipe still takes its buffer
//! size out of the partition it was created in so free-memory queries see it.

use crate::kernel::Kernel;
use crate::objects::{KernelObject, ObjectId, ObjectKind, ObjectType};
use crate::partition::{AllocDirection, MemoryBlock, PartitionId};
use crate::sync::{enqueue, remove_from, write_optional, write_status, ATTR_THPRI};
use crate::thread::ThreadId;
use crate::wait::{WaitDescriptor, WaitKind, WaitOutcome};
use parking_lot::Mutex;
use psp_core::error::KernelError;
use psp_memory::MemorySystem;
use std::collections::VecDeque;
use std::sync::Arc;

/// Transfer modes
pub mod transfer_mode {
    /// Transfer the whole request or nothing
    pub const FULL: u32 = 0;
    /// Transfer as much as possible, at least one byte
    pub const ASAP: u32 = 1;
}

const BUFFER_ALIGNMENT: u32 = 0x100;

/// Message pipe
pub struct MessagePipe {
    id: ObjectId,
    name: String,
    attr: u32,
    partition: PartitionId,
    block: MemoryBlock,
    inner: Mutex<PipeState>,
}

#[derive(Debug, Default)]
struct PipeState {
    buffer: VecDeque<u8>,
    senders: VecDeque<PipeWaiter>,
    receivers: VecDeque<PipeWaiter>,
}

#[derive(Debug, Clone, Copy)]
struct PipeWaiter {
    thread: ThreadId,
    address: u32,
    size: u32,
    mode: u32,
    out_address: u32,
    priority: u32,
}

/// One queued request ready to be served
enum Transfer {
    Send(PipeWaiter, usize),
    Receive(PipeWaiter, Vec<u8>),
    /// Servable, but its guest buffers do not translate. Nothing moved.
    Reject(PipeWaiter, KernelError),
}

impl MessagePipe {
    fn new(id: ObjectId, name: &str, attr: u32, partition: PartitionId, block: MemoryBlock) -> Self {
        Self {
            id,
            name: name.to_string(),
            attr,
            partition,
            block,
            inner: Mutex::new(PipeState::default()),
        }
    }

    /// Buffer size in bytes
    pub fn capacity(&self) -> u32 {
        self.block.size
    }

    /// Bytes currently buffered
    pub fn len(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn free_size(&self) -> u32 {
        self.capacity() - self.len() as u32
    }

    pub fn sender_count(&self) -> usize {
        self.inner.lock().senders.len()
    }

    pub fn receiver_count(&self) -> usize {
        self.inner.lock().receivers.len()
    }

    fn has_waiters(&self) -> bool {
        let state = self.inner.lock();
        !state.senders.is_empty() || !state.receivers.is_empty()
    }

    /// Bytes a send of `size` may push now, if any
    fn send_amount(&self, state: &PipeState, size: u32, mode: u32) -> Option<usize> {
        let free = self.capacity() as usize - state.buffer.len();
        let size = size as usize;
        match mode {
            transfer_mode::FULL if free >= size => Some(size),
            transfer_mode::ASAP if free > 0 || size == 0 => Some(size.min(free)),
            _ => None,
        }
    }

    /// Bytes a receive of `size` may pull now, if any
    fn receive_amount(state: &PipeState, size: u32, mode: u32) -> Option<usize> {
        let available = state.buffer.len();
        let size = size as usize;
        match mode {
            transfer_mode::FULL if available >= size => Some(size),
            transfer_mode::ASAP if available > 0 || size == 0 => Some(size.min(available)),
            _ => None,
        }
    }

    /// Pop the next servable waiter, receivers first. Receives take their
    /// bytes out of the buffer here; sends are pushed by the caller once the
    /// guest data is read. The buffer is only touched once the waiter's
    /// guest pointers are known to be good.
    fn next_transfer(&self, memory: &MemorySystem) -> Option<Transfer> {
        let mut state = self.inner.lock();
        if let Some(head) = state.receivers.front().copied() {
            if let Some(amount) = Self::receive_amount(&state, head.size, head.mode) {
                state.receivers.pop_front();
                if let Err(e) = check_transfer(memory, head.address, amount, head.out_address) {
                    return Some(Transfer::Reject(head, e));
                }
                let data: Vec<u8> = state.buffer.drain(..amount).collect();
                return Some(Transfer::Receive(head, data));
            }
        }
        if let Some(head) = state.senders.front().copied() {
            if let Some(amount) = self.send_amount(&state, head.size, head.mode) {
                state.senders.pop_front();
                if let Err(e) = check_transfer(memory, head.address, amount, head.out_address) {
                    return Some(Transfer::Reject(head, e));
                }
                return Some(Transfer::Send(head, amount));
            }
        }
        None
    }

    fn drain_waiters(&self) -> (Vec<ThreadId>, Vec<ThreadId>) {
        let mut state = self.inner.lock();
        let senders = state.senders.drain(..).map(|w| w.thread).collect();
        let receivers = state.receivers.drain(..).map(|w| w.thread).collect();
        (senders, receivers)
    }
}

impl ObjectKind for MessagePipe {
    const TYPE: ObjectType = ObjectType::MessagePipe;
}

impl KernelObject for MessagePipe {
    fn object_type(&self) -> ObjectType {
        ObjectType::MessagePipe
    }

    fn id(&self) -> ObjectId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn remove_waiter(&self, thread: ThreadId) -> bool {
        let mut state = self.inner.lock();
        remove_from(&mut state.senders, |w| w.thread == thread)
            || remove_from(&mut state.receivers, |w| w.thread == thread)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

fn check_mode(mode: u32) -> Result<(), KernelError> {
    match mode {
        transfer_mode::FULL | transfer_mode::ASAP => Ok(()),
        _ => Err(KernelError::IllegalArgument),
    }
}

/// Check the guest side of a transfer of `amount` bytes at `address`
/// plus its optional size word
fn check_transfer(memory: &MemorySystem, address: u32, amount: usize, out_address: u32) -> Result<(), KernelError> {
    if amount > 0 {
        memory.check_range(address, amount as u32)?;
    }
    if out_address != 0 {
        memory.check_range(out_address, 4)?;
    }
    Ok(())
}

/// Serve queued senders and receivers until neither side can progress
fn signal(kernel: &mut Kernel, pipe: &MessagePipe) {
    while let Some(transfer) = pipe.next_transfer(&kernel.memory) {
        match transfer {
            Transfer::Receive(waiter, data) => {
                let result = kernel
                    .memory
                    .write_bytes(waiter.address, &data)
                    .map_err(KernelError::from)
                    .and_then(|_| write_optional(&kernel.memory, waiter.out_address, data.len() as u32));
                let code = match result {
                    Ok(()) => 0,
                    Err(e) => {
                        tracing::warn!("Pipe 0x{:x}: receive into 0x{:08x} failed: {}", pipe.id, waiter.address, e);
                        e.code()
                    }
                };
                tracing::trace!("Pipe 0x{:x}: thread 0x{:x} received {} bytes", pipe.id, waiter.thread, data.len());
                kernel.wake_thread(waiter.thread, code);
            }
            Transfer::Send(waiter, amount) => {
                let code = match kernel.memory.read_bytes(waiter.address, amount as u32) {
                    Ok(data) => {
                        pipe.inner.lock().buffer.extend(data);
                        match write_optional(&kernel.memory, waiter.out_address, amount as u32) {
                            Ok(()) => 0,
                            Err(e) => e.code(),
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Pipe 0x{:x}: send from 0x{:08x} failed: {}", pipe.id, waiter.address, e);
                        KernelError::from(e).code()
                    }
                };
                tracing::trace!("Pipe 0x{:x}: thread 0x{:x} sent {} bytes", pipe.id, waiter.thread, amount);
                kernel.wake_thread(waiter.thread, code);
            }
            Transfer::Reject(waiter, e) => {
                tracing::warn!("Pipe 0x{:x}: dropping request of thread 0x{:x}: {}", pipe.id, waiter.thread, e);
                kernel.wake_thread(waiter.thread, e.code());
            }
        }
    }
}

/// Message pipe syscall implementations
pub mod syscalls {
    use super::*;

    /// sceKernelCreateMsgPipe
    pub fn sce_kernel_create_msg_pipe(
        kernel: &mut Kernel,
        name: &str,
        partition_id: PartitionId,
        attr: u32,
        size: u32,
    ) -> Result<ObjectId, KernelError> {
        if size == 0 {
            return Err(KernelError::IllegalSize(size));
        }
        let partition = kernel.partition_mut(partition_id)?;
        let block = partition.allocate(&format!("pipe:{}", name), AllocDirection::Low, BUFFER_ALIGNMENT, size)?;

        let id = kernel.objects.next_id();
        tracing::debug!(
            "Created pipe '{}' 0x{:x} in partition {} (0x{:x} bytes at 0x{:08x})",
            name,
            id,
            partition_id,
            size,
            block.address
        );
        kernel
            .objects
            .register(Arc::new(MessagePipe::new(id, name, attr, partition_id, block)));
        Ok(id)
    }

    /// sceKernelDeleteMsgPipe. Refused while anyone waits on the pipe.
    pub fn sce_kernel_delete_msg_pipe(kernel: &mut Kernel, id: ObjectId) -> Result<(), KernelError> {
        let pipe = kernel.objects.get::<MessagePipe>(id)?;
        if pipe.has_waiters() {
            return Err(KernelError::ResourceBusy);
        }
        kernel.partition_mut(pipe.partition)?.free(&pipe.block)?;
        kernel.objects.unregister::<MessagePipe>(id)
    }

    /// sceKernelTrySendMsgPipe
    pub fn sce_kernel_try_send_msg_pipe(
        kernel: &mut Kernel,
        id: ObjectId,
        message: u32,
        size: u32,
        mode: u32,
        out_size_address: u32,
    ) -> Result<(), KernelError> {
        let pipe = kernel.objects.get::<MessagePipe>(id)?;
        check_mode(mode)?;
        if mode == transfer_mode::FULL && size > pipe.capacity() {
            return Err(KernelError::IllegalSize(size));
        }

        let amount = {
            let state = pipe.inner.lock();
            if !state.senders.is_empty() {
                None
            } else {
                pipe.send_amount(&state, size, mode)
            }
        };
        let amount = amount.ok_or(KernelError::MppFull)?;
        check_transfer(&kernel.memory, message, amount, out_size_address)?;

        let data = kernel.memory.read_bytes(message, amount as u32)?;
        pipe.inner.lock().buffer.extend(data);
        let written = write_optional(&kernel.memory, out_size_address, amount as u32);
        signal(kernel, &pipe);
        written
    }

    /// sceKernelSendMsgPipe / sceKernelSendMsgPipeCB
    #[allow(clippy::too_many_arguments)]
    pub fn sce_kernel_send_msg_pipe(
        kernel: &mut Kernel,
        id: ObjectId,
        message: u32,
        size: u32,
        mode: u32,
        out_size_address: u32,
        timeout_address: u32,
        callbacks: bool,
    ) -> Result<WaitOutcome<i32>, KernelError> {
        match sce_kernel_try_send_msg_pipe(kernel, id, message, size, mode, out_size_address) {
            Err(KernelError::MppFull) => {}
            other => return other.map(|_| WaitOutcome::Completed(0)),
        }

        let pipe = kernel.objects.get::<MessagePipe>(id)?;
        let timeout = kernel.read_timeout(timeout_address)?;
        let priority = kernel.thread(kernel.current_thread_id()?)?.priority();
        let mut descriptor = WaitDescriptor::new(WaitKind::MessagePipe, id)
            .with_timeout(timeout, timeout_address)
            .with_callbacks(callbacks);
        descriptor.address = message;
        descriptor.argument = size;
        descriptor.event_mode = mode;
        descriptor.result_address = out_size_address;
        descriptor.sending = true;
        let thread = kernel.begin_wait(descriptor)?;

        let waiter = PipeWaiter {
            thread,
            address: message,
            size,
            mode,
            out_address: out_size_address,
            priority,
        };
        enqueue(&mut pipe.inner.lock().senders, waiter, pipe.attr & ATTR_THPRI != 0, |w| w.priority);
        Ok(WaitOutcome::Blocked)
    }

    /// sceKernelTryReceiveMsgPipe
    pub fn sce_kernel_try_receive_msg_pipe(
        kernel: &mut Kernel,
        id: ObjectId,
        message: u32,
        size: u32,
        mode: u32,
        out_size_address: u32,
    ) -> Result<(), KernelError> {
        let pipe = kernel.objects.get::<MessagePipe>(id)?;
        check_mode(mode)?;
        if mode == transfer_mode::FULL && size > pipe.capacity() {
            return Err(KernelError::IllegalSize(size));
        }

        let amount = {
            let state = pipe.inner.lock();
            if state.receivers.is_empty() {
                MessagePipe::receive_amount(&state, size, mode)
            } else {
                None
            }
        };
        let amount = amount.ok_or(KernelError::MppEmpty)?;
        check_transfer(&kernel.memory, message, amount, out_size_address)?;

        let data: Vec<u8> = pipe.inner.lock().buffer.drain(..amount).collect();
        kernel.memory.write_bytes(message, &data)?;
        write_optional(&kernel.memory, out_size_address, data.len() as u32)?;
        signal(kernel, &pipe);
        Ok(())
    }

    /// sceKernelReceiveMsgPipe / sceKernelReceiveMsgPipeCB
    #[allow(clippy::too_many_arguments)]
    pub fn sce_kernel_receive_msg_pipe(
        kernel: &mut Kernel,
        id: ObjectId,
        message: u32,
        size: u32,
        mode: u32,
        out_size_address: u32,
        timeout_address: u32,
        callbacks: bool,
    ) -> Result<WaitOutcome<i32>, KernelError> {
        match sce_kernel_try_receive_msg_pipe(kernel, id, message, size, mode, out_size_address) {
            Err(KernelError::MppEmpty) => {}
            other => return other.map(|_| WaitOutcome::Completed(0)),
        }

        let pipe = kernel.objects.get::<MessagePipe>(id)?;
        let timeout = kernel.read_timeout(timeout_address)?;
        let priority = kernel.thread(kernel.current_thread_id()?)?.priority();
        let mut descriptor = WaitDescriptor::new(WaitKind::MessagePipe, id)
            .with_timeout(timeout, timeout_address)
            .with_callbacks(callbacks);
        descriptor.address = message;
        descriptor.argument = size;
        descriptor.event_mode = mode;
        descriptor.result_address = out_size_address;
        let thread = kernel.begin_wait(descriptor)?;

        let waiter = PipeWaiter {
            thread,
            address: message,
            size,
            mode,
            out_address: out_size_address,
            priority,
        };
        enqueue(&mut pipe.inner.lock().receivers, waiter, pipe.attr & ATTR_THPRI != 0, |w| w.priority);
        Ok(WaitOutcome::Blocked)
    }

    /// sceKernelCancelMsgPipe. Reports how many senders and receivers waited.
    pub fn sce_kernel_cancel_msg_pipe(
        kernel: &mut Kernel,
        id: ObjectId,
        num_send_address: u32,
        num_receive_address: u32,
    ) -> Result<(), KernelError> {
        let pipe = kernel.objects.get::<MessagePipe>(id)?;
        let (senders, receivers) = pipe.drain_waiters();
        pipe.inner.lock().buffer.clear();

        write_optional(&kernel.memory, num_send_address, senders.len() as u32)?;
        write_optional(&kernel.memory, num_receive_address, receivers.len() as u32)?;
        kernel.wake_all(senders.into_iter().chain(receivers), KernelError::WaitCancelled.code());
        Ok(())
    }

    /// sceKernelReferMsgPipeStatus
    pub fn sce_kernel_refer_msg_pipe_status(
        kernel: &mut Kernel,
        id: ObjectId,
        info_address: u32,
    ) -> Result<(), KernelError> {
        let pipe = kernel.objects.get::<MessagePipe>(id)?;
        write_status(
            &kernel.memory,
            info_address,
            &pipe.name,
            &[
                pipe.attr,
                pipe.capacity(),
                pipe.free_size(),
                pipe.sender_count() as u32,
                pipe.receiver_count() as u32,
            ],
        )
    }
}
