//! Message pipe transfers, timeouts and teardown

use psp_core::cpu::regs;
use psp_core::error::KernelError;
use psp_kernel::sync::msgpipe::syscalls::*;
use psp_kernel::sync::msgpipe::transfer_mode::FULL;
use psp_kernel::thread::ThreadAttributes;
use psp_kernel::{Kernel, ThreadId, ThreadStatus, WaitOutcome};

const USER_PARTITION: u32 = 2;
const SRC: u32 = 0x0900_0000;
const DST: u32 = 0x0900_1000;
const OUT: u32 = 0x0900_2000;
const TIMEOUT: u32 = 0x0900_3000;

fn boot_with_thread(name: &str) -> (Kernel, ThreadId) {
    let mut kernel = Kernel::with_defaults();
    let id = kernel
        .create_thread(name, 0x0880_0000, 0x20, 0x1000, ThreadAttributes::USER)
        .unwrap();
    kernel.start_thread(id, 0, 0).unwrap();
    assert_eq!(kernel.dispatch().unwrap().thread, id);
    (kernel, id)
}

#[test]
fn test_try_send_then_receive_round_trip() {
    let (mut kernel, _) = boot_with_thread("main");
    let pipe = sce_kernel_create_msg_pipe(&mut kernel, "pipe", USER_PARTITION, 0, 0x100).unwrap();
    let message = b"hello pipe";
    kernel.memory().write_bytes(SRC, message).unwrap();

    sce_kernel_try_send_msg_pipe(&mut kernel, pipe, SRC, message.len() as u32, FULL, OUT).unwrap();
    assert_eq!(kernel.memory().read_u32(OUT).unwrap(), message.len() as u32);

    kernel.memory().write_u32(OUT, 0).unwrap();
    let outcome =
        sce_kernel_receive_msg_pipe(&mut kernel, pipe, DST, message.len() as u32, FULL, OUT, 0, false).unwrap();
    assert_eq!(outcome, WaitOutcome::Completed(0));
    assert_eq!(kernel.memory().read_bytes(DST, message.len() as u32).unwrap(), message);
    assert_eq!(kernel.memory().read_u32(OUT).unwrap(), message.len() as u32);
}

#[test]
fn test_receive_times_out_exactly_after_the_tick_count() {
    let (mut kernel, receiver) = boot_with_thread("receiver");
    let pipe = sce_kernel_create_msg_pipe(&mut kernel, "pipe", USER_PARTITION, 0, 0x100).unwrap();
    kernel.memory().write_u32(TIMEOUT, 1000).unwrap();

    let outcome = sce_kernel_receive_msg_pipe(&mut kernel, pipe, DST, 16, FULL, OUT, TIMEOUT, false).unwrap();
    assert!(outcome.is_blocked());

    assert_eq!(kernel.advance_clock(999), 0);
    assert_eq!(kernel.thread(receiver).unwrap().status(), ThreadStatus::WAITING);

    assert_eq!(kernel.advance_clock(1), 1);
    let thread = kernel.thread(receiver).unwrap();
    assert_eq!(thread.status(), ThreadStatus::READY);
    assert_eq!(thread.wake_result(), KernelError::Timeout.code());
    let context = thread.context().unwrap();
    assert_eq!(kernel.cpu().register(context, regs::V0), KernelError::Timeout.code() as u32);
    assert_eq!(kernel.memory().read_u32(TIMEOUT).unwrap(), 0);
}

#[test]
fn test_delete_with_blocked_receiver_is_busy_until_timeout() {
    let (mut kernel, _) = boot_with_thread("receiver");
    let free = kernel.partition(USER_PARTITION).unwrap().free_bytes();
    let pipe = sce_kernel_create_msg_pipe(&mut kernel, "pipe", USER_PARTITION, 0, 0x100).unwrap();
    kernel.memory().write_u32(TIMEOUT, 500).unwrap();
    sce_kernel_receive_msg_pipe(&mut kernel, pipe, DST, 4, FULL, 0, TIMEOUT, false).unwrap();

    assert_eq!(sce_kernel_delete_msg_pipe(&mut kernel, pipe), Err(KernelError::ResourceBusy));

    kernel.advance_clock(500);
    sce_kernel_delete_msg_pipe(&mut kernel, pipe).unwrap();
    assert_eq!(kernel.partition(USER_PARTITION).unwrap().free_bytes(), free);
    assert_eq!(
        sce_kernel_delete_msg_pipe(&mut kernel, pipe),
        Err(KernelError::UnknownMessagePipe(pipe))
    );
}

#[test]
fn test_blocked_sender_and_receiver_meet() {
    let mut kernel = Kernel::with_defaults();
    let pipe = sce_kernel_create_msg_pipe(&mut kernel, "pipe", USER_PARTITION, 0, 8).unwrap();
    let receiver = kernel
        .create_thread("receiver", 0x0880_0000, 0x10, 0x1000, ThreadAttributes::USER)
        .unwrap();
    let sender = kernel
        .create_thread("sender", 0x0880_0000, 0x20, 0x1000, ThreadAttributes::USER)
        .unwrap();
    kernel.start_thread(receiver, 0, 0).unwrap();
    kernel.start_thread(sender, 0, 0).unwrap();

    assert_eq!(kernel.dispatch().unwrap().thread, receiver);
    assert!(sce_kernel_receive_msg_pipe(&mut kernel, pipe, DST, 8, FULL, OUT, 0, false)
        .unwrap()
        .is_blocked());

    assert_eq!(kernel.dispatch().unwrap().thread, sender);
    kernel.memory().write_bytes(SRC, b"0123456789abcdef").unwrap();
    let outcome = sce_kernel_send_msg_pipe(&mut kernel, pipe, SRC, 16, FULL, 0, 0, false);
    assert_eq!(outcome, Err(KernelError::IllegalSize(16)));
    let outcome = sce_kernel_send_msg_pipe(&mut kernel, pipe, SRC, 8, FULL, 0, 0, false).unwrap();
    assert_eq!(outcome, WaitOutcome::Completed(0));

    // The receiver outranks the sender and takes the CPU back
    assert_eq!(kernel.dispatch().unwrap().thread, receiver);
    assert_eq!(kernel.memory().read_bytes(DST, 8).unwrap(), b"01234567");
    assert_eq!(kernel.memory().read_u32(OUT).unwrap(), 8);
}
