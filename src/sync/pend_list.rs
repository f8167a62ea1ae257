//! Waiter queue shared by all synchronization objects
//!
//! A priority-sorted intrusive list over the TCB's dedicated
//! `pend_next_ptr`/`pend_prev_ptr` links: the strictly highest-priority
//! waiter sits at the head, equal priorities keep FIFO insertion order.
//!
//! The block/wake/classify helpers implement the kernel's "wake, then
//! classify" protocol. The granter pops the head, clears its
//! `wait_obj`, disarms any timeout and readies it; a task woken by the
//! tick instead finds `wait_obj` still set and unlinks itself.

use core::ptr::NonNull;

use crate::config::WAIT_FOREVER;
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::task::OsTcb;
use crate::time;
use crate::types::{OsTaskState, OsTick};

/// Pend list for tasks waiting on one kernel object
pub struct PendList {
    head: Option<NonNull<OsTcb>>,
    tail: Option<NonNull<OsTcb>>,
}

impl PendList {
    pub const fn new() -> Self {
        PendList {
            head: None,
            tail: None,
        }
    }

    pub fn init(&mut self) {
        self.head = None;
        self.tail = None;
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline(always)]
    pub fn head(&self) -> Option<NonNull<OsTcb>> {
        self.head
    }

    /// Insert in priority order; equal priorities go behind earlier
    /// arrivals.
    ///
    /// # Safety
    /// `tcb` must be valid and not linked in any pend list.
    pub unsafe fn insert_by_prio(&mut self, tcb: NonNull<OsTcb>) {
        let prio = unsafe { tcb.as_ref().prio };

        let mut current = self.head;
        let mut prev: Option<NonNull<OsTcb>> = None;

        while let Some(cur_ptr) = current {
            let cur_ref = unsafe { cur_ptr.as_ref() };
            if prio < cur_ref.prio {
                break;
            }
            prev = current;
            current = cur_ref.pend_next_ptr;
        }

        let tcb_mut = unsafe { &mut *tcb.as_ptr() };
        tcb_mut.pend_prev_ptr = prev;
        tcb_mut.pend_next_ptr = current;

        match prev {
            Some(p) => unsafe { (*p.as_ptr()).pend_next_ptr = Some(tcb) },
            None => self.head = Some(tcb),
        }

        match current {
            Some(c) => unsafe { (*c.as_ptr()).pend_prev_ptr = Some(tcb) },
            None => self.tail = Some(tcb),
        }
    }

    /// Unlink a specific TCB
    ///
    /// # Safety
    /// `tcb` must be valid and linked in this list.
    pub unsafe fn remove(&mut self, tcb: NonNull<OsTcb>) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        match tcb_ref.pend_prev_ptr {
            Some(prev) => unsafe { (*prev.as_ptr()).pend_next_ptr = tcb_ref.pend_next_ptr },
            None => self.head = tcb_ref.pend_next_ptr,
        }

        match tcb_ref.pend_next_ptr {
            Some(next) => unsafe { (*next.as_ptr()).pend_prev_ptr = tcb_ref.pend_prev_ptr },
            None => self.tail = tcb_ref.pend_prev_ptr,
        }

        tcb_ref.pend_prev_ptr = None;
        tcb_ref.pend_next_ptr = None;
    }

    /// Return and unlink the highest-priority waiter
    pub fn pop_head(&mut self) -> Option<NonNull<OsTcb>> {
        let head = self.head?;
        unsafe { self.remove(head) };
        Some(head)
    }
}

impl Default for PendList {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for PendList {}
unsafe impl Sync for PendList {}

// ============ Blocking protocol helpers ============

/// Block the current task on `list`, waiting on `obj`
///
/// Marks the task `Blocked`, records the wait object, arms a timeout in
/// the delay queue unless waiting forever, and enqueues it by priority.
/// The caller pends the context switch after leaving the critical
/// section.
///
/// # Safety
/// Must be called from task context inside a critical section.
pub(crate) unsafe fn block_current(
    list: &mut PendList,
    obj: *const (),
    timeout: OsTick,
) -> OsResult<()> {
    let cur = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?;
    let cur_ref = unsafe { &mut *cur.as_ptr() };

    cur_ref.wait_obj = obj;
    cur_ref.state = OsTaskState::Blocked;

    if timeout != WAIT_FOREVER {
        unsafe { time::delay_arm(cur, timeout) };
    } else {
        cur_ref.wake_tick = 0;
    }

    unsafe { list.insert_by_prio(cur) };
    Ok(())
}

/// Finish waking a waiter that has been unlinked from its waiter
/// queue: disarm its timeout, clear its wait object and make it ready
///
/// A waiter whose timeout already fired is `Ready` and linked in its
/// ready queue while it still sits on the waiter queue awaiting
/// classification; a grant racing ahead of that classification must
/// not insert it into the ready queue a second time.
///
/// # Safety
/// Must be called inside a critical section, with `tcb` already
/// unlinked from its waiter queue.
pub(crate) unsafe fn finish_wake(tcb: NonNull<OsTcb>) {
    unsafe {
        time::delay_cancel(tcb);
        let tcb_ref = &mut *tcb.as_ptr();
        tcb_ref.wait_obj = core::ptr::null();
        if tcb_ref.state == OsTaskState::Blocked {
            sched::rdy_insert(tcb);
        }
    }
}

/// Grant the resource to the highest-priority waiter, if any
///
/// Unlinks the head, disarms its timeout, clears its wait object and
/// makes it ready. Returns the woken task.
///
/// # Safety
/// Must be called inside a critical section.
pub(crate) unsafe fn wake_first(list: &mut PendList) -> Option<NonNull<OsTcb>> {
    let tcb = list.pop_head()?;
    unsafe { finish_wake(tcb) };
    Some(tcb)
}

/// Decide timeout vs grant after the current task resumes from a block
///
/// If the wait object is still recorded, no granter released this task:
/// the wakeup was a timeout. Unlink from the waiter queue, clear the
/// wait state and report it. Otherwise the resource was granted before
/// resumption.
///
/// # Safety
/// Must be called from the woken task inside a critical section, with
/// `list` belonging to the object identified by `obj`.
pub(crate) unsafe fn classify_wakeup(list: &mut PendList, obj: *const ()) -> OsResult<()> {
    let cur = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?;
    let cur_ref = unsafe { &mut *cur.as_ptr() };

    if cur_ref.wait_obj == obj {
        unsafe { list.remove(cur) };
        cur_ref.wait_obj = core::ptr::null();
        unsafe { time::delay_cancel(cur) };
        return Err(OsError::Timeout);
    }

    Ok(())
}
