//! Synchronization primitives
//!
//! Semaphores, recursive mutexes with priority inheritance, and
//! bounded message queues, all sharing one priority-sorted waiter
//! queue implementation and the "wake, then classify" timeout
//! protocol.

#[cfg(any(feature = "sem", feature = "mutex", feature = "queue"))]
pub mod pend_list;

#[cfg(feature = "sem")]
pub mod sem;

#[cfg(feature = "mutex")]
pub mod mutex;

#[cfg(feature = "queue")]
pub mod queue;
