//! Ready list - doubly linked FIFO of TCBs at one priority level
//!
//! Tasks are appended at the tail when they become ready and scheduled
//! from the head, which gives FIFO order within a priority. Links are
//! intrusive (the TCB's `next_ptr`/`prev_ptr` pair); the list itself is
//! unsentineled, empty iff `head` is `None`.

use core::ptr::NonNull;

use crate::task::OsTcb;

/// Ready list for a single priority level
pub struct ReadyList {
    head: Option<NonNull<OsTcb>>,
    tail: Option<NonNull<OsTcb>>,
}

impl ReadyList {
    pub const fn new() -> Self {
        ReadyList {
            head: None,
            tail: None,
        }
    }

    pub fn init(&mut self) {
        self.head = None;
        self.tail = None;
    }

    /// First task to be scheduled, without unlinking it
    #[inline]
    pub fn head(&self) -> Option<NonNull<OsTcb>> {
        self.head
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Append a TCB at the tail (FIFO order)
    ///
    /// # Safety
    /// `tcb` must be valid and not linked in any ready list.
    pub unsafe fn insert_tail(&mut self, tcb: NonNull<OsTcb>) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        tcb_ref.next_ptr = None;
        tcb_ref.prev_ptr = self.tail;

        match self.tail {
            Some(tail) => unsafe { (*tail.as_ptr()).next_ptr = Some(tcb) },
            None => self.head = Some(tcb),
        }

        self.tail = Some(tcb);
    }

    /// Unlink a TCB from this list
    ///
    /// # Safety
    /// `tcb` must be valid and linked in this list.
    pub unsafe fn remove(&mut self, tcb: NonNull<OsTcb>) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        match tcb_ref.prev_ptr {
            Some(prev) => unsafe { (*prev.as_ptr()).next_ptr = tcb_ref.next_ptr },
            None => self.head = tcb_ref.next_ptr,
        }

        match tcb_ref.next_ptr {
            Some(next) => unsafe { (*next.as_ptr()).prev_ptr = tcb_ref.prev_ptr },
            None => self.tail = tcb_ref.prev_ptr,
        }

        tcb_ref.prev_ptr = None;
        tcb_ref.next_ptr = None;
    }

    /// Return and unlink the first TCB
    pub fn pop_head(&mut self) -> Option<NonNull<OsTcb>> {
        let head = self.head?;
        unsafe { self.remove(head) };
        Some(head)
    }
}

impl Default for ReadyList {
    fn default() -> Self {
        Self::new()
    }
}

// Modified only within critical sections.
unsafe impl Send for ReadyList {}
unsafe impl Sync for ReadyList {}
