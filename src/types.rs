//! Core type definitions for the Kestrel kernel

/// Task priority (0 = highest priority)
pub type OsPrio = u8;

/// Tick counter type; wraps around after 2^32 ticks
pub type OsTick = u32;

/// Semaphore counter type
pub type OsSemCtr = u32;

/// Nesting counter (mutex recursion, scheduler lock)
pub type OsNestingCtr = u8;

/// Stack element type (ARM word)
pub type OsStkElement = u32;

/// Task state
///
/// A task is in exactly one of these states at any time. `Running` is
/// held by at most one task; a `Running` task is never linked in a
/// ready queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OsTaskState {
    /// Eligible to run, linked in the ready queue for its priority
    Ready = 0,
    /// Currently executing on the CPU
    Running = 1,
    /// Waiting on a sync object, a delay, or both (timeout armed)
    Blocked = 2,
    /// Explicitly suspended, not eligible until resumed
    Suspended = 3,
}
