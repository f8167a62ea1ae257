//! Error types for the Kestrel kernel
//!
//! Every fallible kernel operation returns [`OsResult`]. All errors are
//! recoverable at the caller; the kernel never propagates them internally.

/// Kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OsError {
    // ============ Parameter errors ============
    /// Null or invalid TCB pointer
    TcbInvalid = 100,
    /// Null or misaligned stack pointer
    StkInvalid = 101,
    /// Stack smaller than the configured minimum
    StkSizeInvalid = 102,
    /// Priority out of range
    PrioInvalid = 103,
    /// Null object or buffer pointer
    ObjPtrNull = 104,
    /// Zero element size, zero capacity, or undersized buffer
    SizeInvalid = 105,

    // ============ Timeout / resource ============
    /// Blocking call's deadline elapsed before the grant
    Timeout = 200,
    /// Non-blocking call found the resource unavailable
    WouldBlock = 201,

    // ============ State errors ============
    /// Caller does not own the mutex
    MutexNotOwner = 300,
    /// Task is not suspended
    TaskNotSuspended = 301,
    /// Task is already suspended
    TaskSuspended = 302,
    /// Task is blocked on a sync object
    TaskBlocked = 303,
    /// Task is not delayed
    TaskNotDelayed = 304,
    /// Operation not allowed on the idle task
    TaskIdle = 305,
    /// Operation invalid for the object's current state
    StateInvalid = 306,

    // ============ Interrupt-context errors ============
    /// Blocking call attempted from interrupt context
    PendIsr = 400,
    /// Cannot delay from interrupt context
    DelayIsr = 401,
    /// Cannot suspend a task from interrupt context
    SuspendIsr = 402,
    /// Cannot yield from interrupt context
    YieldIsr = 403,
    /// Cannot create a task from interrupt context
    CreateIsr = 404,

    // ============ Kernel lifecycle ============
    /// Kernel has not been initialized
    OsNotInit = 500,
    /// Scheduler is not running
    OsNotRunning = 501,
    /// Scheduler is already running
    OsRunning = 502,
    /// Scheduler is locked
    SchedLocked = 503,
    /// Scheduler is not locked
    SchedNotLocked = 504,
    /// Scheduler lock nesting overflow
    LockNestingOvf = 505,

    // ============ Counter overflow ============
    /// Semaphore count is already at its maximum
    SemOvf = 600,
    /// Mutex recursion overflow
    MutexOvf = 601,
}

/// Result type alias for kernel operations
pub type OsResult<T> = Result<T, OsError>;
