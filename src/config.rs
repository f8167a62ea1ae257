//! Compile-time configuration for the Kestrel kernel
//!
//! These constants control resource limits and timing behavior. All of
//! them are fixed at build time; the kernel performs no allocation.

use crate::types::OsTick;

/// System tick rate in Hz (one tick per millisecond)
pub const CFG_TICK_RATE_HZ: u32 = 1000;

/// CPU core clock in Hz, used to derive the SysTick reload value
pub const CFG_CPU_CLOCK_HZ: u32 = 16_000_000;

/// Number of priority levels (0 = highest); must fit the 32-bit bitmap
pub const CFG_PRIO_MAX: usize = 32;

/// Idle task priority (lowest)
pub const CFG_PRIO_IDLE: u8 = (CFG_PRIO_MAX - 1) as u8;

/// Upper bound on concurrently created tasks, idle included
pub const CFG_TASK_MAX: usize = 16;

/// Minimum task stack size in words
pub const CFG_STK_SIZE_MIN: usize = 64;

/// Idle task stack size in words
pub const CFG_IDLE_STK_SIZE: usize = 128;

/// Timeout value meaning "do not block"
pub const NO_WAIT: OsTick = 0;

/// Timeout value meaning "block until granted"
pub const WAIT_FOREVER: OsTick = 0xFFFF_FFFF;

const _: () = assert!(CFG_PRIO_MAX <= 32, "priority bitmap is one 32-bit word");
const _: () = assert!(CFG_TICK_RATE_HZ > 0 && CFG_TICK_RATE_HZ <= 10_000);
