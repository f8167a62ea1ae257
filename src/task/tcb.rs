//! Task Control Block (TCB) definition

use core::ptr::NonNull;

use crate::types::{OsPrio, OsStkElement, OsTaskState, OsTick};

/// Task Control Block
///
/// Storage is owned by the caller that creates the task; the kernel
/// links TCBs into its queues through the three dedicated link pairs
/// below and never copies or frees them.
///
/// Link invariants:
/// - `next_ptr`/`prev_ptr`: membership in exactly one ready queue
///   (state `Ready` only).
/// - `pend_next_ptr`/`pend_prev_ptr`: membership in exactly one sync
///   object's waiter queue (`wait_obj` non-null).
/// - `tick_next_ptr`/`tick_prev_ptr`: membership in the delay queue;
///   `wake_tick != 0` if and only if linked there.
///
/// A task can be on a waiter queue and the delay queue at the same time
/// (blocking call with a timeout armed), and transiently on a waiter
/// queue and a ready queue between a timeout wakeup and the woken
/// task's own classification step.
#[repr(C)]
pub struct OsTcb {
    /// Current stack pointer; must stay the first field, the context
    /// switch exception loads and stores it at offset 0
    pub stk_ptr: *mut OsStkElement,

    /// Base of the stack buffer (lowest address)
    pub stk_base: *mut OsStkElement,
    /// Stack size in words
    pub stk_size: usize,

    /// Task name for debugging
    pub name: &'static str,

    // ============ Ready queue links ============
    pub next_ptr: Option<NonNull<OsTcb>>,
    pub prev_ptr: Option<NonNull<OsTcb>>,

    // ============ Waiter queue links ============
    pub pend_next_ptr: Option<NonNull<OsTcb>>,
    pub pend_prev_ptr: Option<NonNull<OsTcb>>,
    /// Sync object this task is blocked on, null when not waiting.
    /// Cleared by the granter; a woken task finding it still set knows
    /// its wakeup was a timeout.
    pub wait_obj: *const (),
    /// Element pointer while blocked on a message queue; the granting
    /// side completes the element copy through it
    pub msg_ptr: *mut u8,

    // ============ Delay queue links ============
    pub tick_next_ptr: Option<NonNull<OsTcb>>,
    pub tick_prev_ptr: Option<NonNull<OsTcb>>,
    /// Absolute tick at which to wake; 0 means no timeout armed
    pub wake_tick: OsTick,

    // ============ Priority ============
    /// Current (possibly boosted) priority
    pub prio: OsPrio,
    /// Priority assigned at creation
    pub base_prio: OsPrio,

    /// Current task state
    pub state: OsTaskState,

    // ============ Statistics ============
    /// Number of times this task has been selected to run
    #[cfg(feature = "stats")]
    pub run_count: u32,
    /// Ticks during which this task was current
    #[cfg(feature = "stats")]
    pub total_ticks: u32,
}

impl OsTcb {
    pub const fn new() -> Self {
        OsTcb {
            stk_ptr: core::ptr::null_mut(),
            stk_base: core::ptr::null_mut(),
            stk_size: 0,

            name: "",

            next_ptr: None,
            prev_ptr: None,

            pend_next_ptr: None,
            pend_prev_ptr: None,
            wait_obj: core::ptr::null(),
            msg_ptr: core::ptr::null_mut(),

            tick_next_ptr: None,
            tick_prev_ptr: None,
            wake_tick: 0,

            prio: 0,
            base_prio: 0,

            state: OsTaskState::Ready,

            #[cfg(feature = "stats")]
            run_count: 0,
            #[cfg(feature = "stats")]
            total_ticks: 0,
        }
    }

    /// Reset all fields to creation defaults
    pub fn init(&mut self) {
        *self = Self::new();
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state == OsTaskState::Ready
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state == OsTaskState::Running
    }

    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.state == OsTaskState::Blocked
    }

    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.state == OsTaskState::Suspended
    }
}

impl Default for OsTcb {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for OsTcb {}
unsafe impl Sync for OsTcb {}
