//! PSP syscall NIDs
//!
//! Imports are resolved by NID, the first 32 bits of the SHA-1 of the
//! function name.

// ThreadManForUser: threads
pub const SCE_KERNEL_CREATE_THREAD: u32 = 0x446D_8DE6;
pub const SCE_KERNEL_DELETE_THREAD: u32 = 0x9FA0_3CD3;
pub const SCE_KERNEL_START_THREAD: u32 = 0xF475_845D;
pub const SCE_KERNEL_EXIT_THREAD: u32 = 0xAA73_C935;
pub const SCE_KERNEL_EXIT_DELETE_THREAD: u32 = 0x809C_E29B;
pub const SCE_KERNEL_TERMINATE_THREAD: u32 = 0x6164_03BA;
pub const SCE_KERNEL_TERMINATE_DELETE_THREAD: u32 = 0x383F_7BCC;
pub const SCE_KERNEL_CHANGE_THREAD_PRIORITY: u32 = 0x71BC_9871;
pub const SCE_KERNEL_WAIT_THREAD_END: u32 = 0x278C_0DF5;
pub const SCE_KERNEL_WAIT_THREAD_END_CB: u32 = 0x840E_8133;
pub const SCE_KERNEL_GET_THREAD_ID: u32 = 0x293B_45B8;
pub const SCE_KERNEL_GET_THREAD_CURRENT_PRIORITY: u32 = 0x94AA_61EE;
pub const SCE_KERNEL_GET_THREAD_EXIT_STATUS: u32 = 0x3B18_3E26;
pub const SCE_KERNEL_ROTATE_THREAD_READY_QUEUE: u32 = 0x9123_54A7;

// ThreadManForUser: sleep and delay
pub const SCE_KERNEL_SLEEP_THREAD: u32 = 0x9ACE_131E;
pub const SCE_KERNEL_SLEEP_THREAD_CB: u32 = 0x8282_6F70;
pub const SCE_KERNEL_WAKEUP_THREAD: u32 = 0xD59E_AD2F;
pub const SCE_KERNEL_CANCEL_WAKEUP_THREAD: u32 = 0xFCCF_AD26;
pub const SCE_KERNEL_SUSPEND_THREAD: u32 = 0x9944_F31F;
pub const SCE_KERNEL_RESUME_THREAD: u32 = 0x7515_6E8F;
pub const SCE_KERNEL_DELAY_THREAD: u32 = 0xCEAD_EB47;
pub const SCE_KERNEL_DELAY_THREAD_CB: u32 = 0x68DA_9E36;

// ThreadManForUser: callbacks
pub const SCE_KERNEL_CREATE_CALLBACK: u32 = 0xE81C_AF8F;
pub const SCE_KERNEL_DELETE_CALLBACK: u32 = 0xEDBA_5844;
pub const SCE_KERNEL_NOTIFY_CALLBACK: u32 = 0xC11B_A8C4;
pub const SCE_KERNEL_CHECK_CALLBACK: u32 = 0x349D_6D6C;

// ThreadManForUser: semaphores
pub const SCE_KERNEL_CREATE_SEMA: u32 = 0xD6DA_4BA1;
pub const SCE_KERNEL_DELETE_SEMA: u32 = 0x28B6_489C;
pub const SCE_KERNEL_SIGNAL_SEMA: u32 = 0x3F53_E640;
pub const SCE_KERNEL_WAIT_SEMA: u32 = 0x4E3A_1105;
pub const SCE_KERNEL_WAIT_SEMA_CB: u32 = 0x6D21_2BAC;
pub const SCE_KERNEL_POLL_SEMA: u32 = 0x58B1_F937;
pub const SCE_KERNEL_CANCEL_SEMA: u32 = 0x8FFD_F9A2;
pub const SCE_KERNEL_REFER_SEMA_STATUS: u32 = 0xBC6F_EBC5;

// ThreadManForUser: event flags
pub const SCE_KERNEL_CREATE_EVENT_FLAG: u32 = 0x55C2_0A00;
pub const SCE_KERNEL_DELETE_EVENT_FLAG: u32 = 0xEF9E_4C70;
pub const SCE_KERNEL_SET_EVENT_FLAG: u32 = 0x1FB1_5A32;
pub const SCE_KERNEL_CLEAR_EVENT_FLAG: u32 = 0x8123_46E4;
pub const SCE_KERNEL_WAIT_EVENT_FLAG: u32 = 0x402F_CF22;
pub const SCE_KERNEL_WAIT_EVENT_FLAG_CB: u32 = 0x328C_546A;
pub const SCE_KERNEL_POLL_EVENT_FLAG: u32 = 0x30FD_48F0;
pub const SCE_KERNEL_CANCEL_EVENT_FLAG: u32 = 0xCD20_3292;
pub const SCE_KERNEL_REFER_EVENT_FLAG_STATUS: u32 = 0xA66B_0120;

// ThreadManForUser: mutexes
pub const SCE_KERNEL_CREATE_MUTEX: u32 = 0xB7D0_98C6;
pub const SCE_KERNEL_DELETE_MUTEX: u32 = 0xF817_0FBE;
pub const SCE_KERNEL_LOCK_MUTEX: u32 = 0xB011_B11F;
pub const SCE_KERNEL_LOCK_MUTEX_CB: u32 = 0x5BF4_DD27;
pub const SCE_KERNEL_TRY_LOCK_MUTEX: u32 = 0x0DDC_D2C9;
pub const SCE_KERNEL_UNLOCK_MUTEX: u32 = 0x6B30_100F;
pub const SCE_KERNEL_CANCEL_MUTEX: u32 = 0x87D9_223C;
pub const SCE_KERNEL_REFER_MUTEX_STATUS: u32 = 0xA9C2_CB9A;

// ThreadManForUser: message pipes
pub const SCE_KERNEL_CREATE_MSG_PIPE: u32 = 0x7C0D_C2A0;
pub const SCE_KERNEL_DELETE_MSG_PIPE: u32 = 0xF0B7_DA1C;
pub const SCE_KERNEL_SEND_MSG_PIPE: u32 = 0x876D_BFAD;
pub const SCE_KERNEL_SEND_MSG_PIPE_CB: u32 = 0x7C41_F2C2;
pub const SCE_KERNEL_TRY_SEND_MSG_PIPE: u32 = 0x884C_9F90;
pub const SCE_KERNEL_RECEIVE_MSG_PIPE: u32 = 0x7482_9B76;
pub const SCE_KERNEL_RECEIVE_MSG_PIPE_CB: u32 = 0xFBFA_697D;
pub const SCE_KERNEL_TRY_RECEIVE_MSG_PIPE: u32 = 0xDF52_098F;
pub const SCE_KERNEL_CANCEL_MSG_PIPE: u32 = 0x349B_864D;
pub const SCE_KERNEL_REFER_MSG_PIPE_STATUS: u32 = 0x33BE_4024;

// ThreadManForUser: objects without an implementation
pub const SCE_KERNEL_CREATE_MBX: u32 = 0x8125_221D;
pub const SCE_KERNEL_DELETE_MBX: u32 = 0x8625_5ADA;
pub const SCE_KERNEL_CREATE_VPL: u32 = 0x56C0_39B5;
pub const SCE_KERNEL_CREATE_FPL: u32 = 0xC07B_B470;

// ThreadManForUser: time
pub const SCE_KERNEL_GET_SYSTEM_TIME: u32 = 0xDB73_8F35;
pub const SCE_KERNEL_GET_SYSTEM_TIME_LOW: u32 = 0x369E_D59D;

// SysMemUserForUser
pub const SCE_KERNEL_ALLOC_PARTITION_MEMORY: u32 = 0x237D_BD4F;
pub const SCE_KERNEL_FREE_PARTITION_MEMORY: u32 = 0xB6D6_1D02;
pub const SCE_KERNEL_GET_BLOCK_HEAD_ADDR: u32 = 0x9D9A_5BA1;
pub const SCE_KERNEL_MAX_FREE_MEM_SIZE: u32 = 0xA291_F107;
pub const SCE_KERNEL_TOTAL_FREE_MEM_SIZE: u32 = 0xF919_F628;

// IoFileMgrForUser asynchronous I/O, not implemented
pub const SCE_IO_POLL_ASYNC: u32 = 0x3251_EA56;
pub const SCE_IO_WAIT_ASYNC: u32 = 0xE23E_EC33;
pub const SCE_IO_WAIT_ASYNC_CB: u32 = 0x35DB_D746;
pub const SCE_IO_SET_ASYNC_CALLBACK: u32 = 0xA12A_0514;
pub const SCE_IO_CHANGE_ASYNC_PRIORITY: u32 = 0xB293_727F;
pub const SCE_IO_CANCEL: u32 = 0xE8BC_6571;
pub const SCE_IO_GET_ASYNC_STAT: u32 = 0xCB05_F8D6;
