//! Bounded message queue
//!
//! A fixed-capacity ring buffer of fixed-size elements in caller-owned
//! storage. Senders blocked on a full queue and receivers blocked on an
//! empty one wait in separate priority-sorted queues; grants follow the
//! same priority-then-FIFO order as semaphores. Element copies are
//! byte-wise.
//!
//! Grants are a rendezvous: a blocked task parks its element pointer
//! in its TCB and the releasing side completes the copy before readying
//! it. A granted element therefore cannot be taken by a faster poll
//! between the grant and the waiter's resumption.

use core::cell::UnsafeCell;

use crate::config::NO_WAIT;
use crate::critical::{is_isr_context, CriticalSection};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::sync::pend_list::{block_current, classify_wakeup, finish_wake, PendList};
use crate::time::os_ms_to_ticks;

/// Bounded message queue over a caller-provided byte buffer
pub struct OsQueue {
    buffer: *mut u8,
    msg_size: usize,
    capacity: usize,
    head: usize,
    tail: usize,
    count: usize,
    send_wait: PendList,
    recv_wait: PendList,
}

impl OsQueue {
    /// Create an unconfigured queue; [`create`](Self::create) must be
    /// called before use
    pub const fn new() -> Self {
        OsQueue {
            buffer: core::ptr::null_mut(),
            msg_size: 0,
            capacity: 0,
            head: 0,
            tail: 0,
            count: 0,
            send_wait: PendList::new(),
            recv_wait: PendList::new(),
        }
    }

    /// Configure the queue over `buffer`, which must hold at least
    /// `msg_size * capacity` bytes
    pub fn create(&mut self, buffer: *mut u8, msg_size: usize, capacity: usize) -> OsResult<()> {
        if buffer.is_null() {
            return Err(OsError::ObjPtrNull);
        }
        if msg_size == 0 || capacity == 0 {
            return Err(OsError::SizeInvalid);
        }

        let _cs = CriticalSection::enter();

        self.buffer = buffer;
        self.msg_size = msg_size;
        self.capacity = capacity;
        self.head = 0;
        self.tail = 0;
        self.count = 0;
        self.send_wait.init();
        self.recv_wait.init();

        Ok(())
    }

    unsafe fn copy_in(&mut self, msg: *const u8) {
        unsafe {
            core::ptr::copy_nonoverlapping(msg, self.buffer.add(self.head * self.msg_size), self.msg_size);
        }
        self.head = (self.head + 1) % self.capacity;
        self.count += 1;
    }

    unsafe fn copy_out(&mut self, msg: *mut u8) {
        unsafe {
            core::ptr::copy_nonoverlapping(self.buffer.add(self.tail * self.msg_size), msg, self.msg_size);
        }
        self.tail = (self.tail + 1) % self.capacity;
        self.count -= 1;
    }

    /// Send one element, blocking up to `timeout_ms` when the queue is
    /// full. From ISR context only `NO_WAIT` is allowed.
    pub fn send(&mut self, msg: *const u8, timeout_ms: u32) -> OsResult<()> {
        if msg.is_null() {
            return Err(OsError::ObjPtrNull);
        }
        if self.buffer.is_null() {
            return Err(OsError::StateInvalid);
        }
        if is_isr_context() && timeout_ms != NO_WAIT {
            return Err(OsError::PendIsr);
        }

        let obj = self as *const OsQueue as *const ();

        let cs = CriticalSection::enter();

        if self.count < self.capacity {
            unsafe { self.copy_in(msg) };

            // Receivers only wait while the queue is empty, so the
            // element just stored is the one the head waiter is owed.
            // Complete its receive here; it cannot be outrun.
            let need_sched = match self.recv_wait.pop_head() {
                Some(waiter) => unsafe {
                    let w = &mut *waiter.as_ptr();
                    self.copy_out(w.msg_ptr);
                    w.msg_ptr = core::ptr::null_mut();
                    finish_wake(waiter);
                    !is_isr_context()
                        && kernel::KERNEL.is_running()
                        && sched::preempts_current(waiter)
                },
                None => false,
            };

            drop(cs);
            if need_sched {
                sched::os_sched();
            }
            return Ok(());
        }

        if timeout_ms == NO_WAIT {
            return Err(OsError::WouldBlock);
        }
        if kernel::KERNEL.sched_lock_nesting() > 0 {
            return Err(OsError::SchedLocked);
        }

        let cur = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?;
        unsafe {
            block_current(&mut self.send_wait, obj, os_ms_to_ticks(timeout_ms))?;
            (*cur.as_ptr()).msg_ptr = msg.cast_mut();
        }

        drop(cs);
        crate::port::os_ctx_sw();

        // Resumed: on a grant the receiver already moved this element
        // into the queue; a timeout leaves it unsent.
        let _cs = CriticalSection::enter();
        let result = unsafe { classify_wakeup(&mut self.send_wait, obj) };
        unsafe { (*cur.as_ptr()).msg_ptr = core::ptr::null_mut() };
        result
    }

    /// Receive one element, blocking up to `timeout_ms` when the queue
    /// is empty. From ISR context only `NO_WAIT` is allowed.
    pub fn recv(&mut self, msg: *mut u8, timeout_ms: u32) -> OsResult<()> {
        if msg.is_null() {
            return Err(OsError::ObjPtrNull);
        }
        if self.buffer.is_null() {
            return Err(OsError::StateInvalid);
        }
        if is_isr_context() && timeout_ms != NO_WAIT {
            return Err(OsError::PendIsr);
        }

        let obj = self as *const OsQueue as *const ();

        let cs = CriticalSection::enter();

        if self.count > 0 {
            unsafe { self.copy_out(msg) };

            // Senders only wait while the queue is full; refill the
            // slot just freed from the head waiter's parked element so
            // its send cannot be displaced.
            let need_sched = match self.send_wait.pop_head() {
                Some(sender) => unsafe {
                    let s = &mut *sender.as_ptr();
                    self.copy_in(s.msg_ptr);
                    s.msg_ptr = core::ptr::null_mut();
                    finish_wake(sender);
                    !is_isr_context()
                        && kernel::KERNEL.is_running()
                        && sched::preempts_current(sender)
                },
                None => false,
            };

            drop(cs);
            if need_sched {
                sched::os_sched();
            }
            return Ok(());
        }

        if timeout_ms == NO_WAIT {
            return Err(OsError::WouldBlock);
        }
        if kernel::KERNEL.sched_lock_nesting() > 0 {
            return Err(OsError::SchedLocked);
        }

        let cur = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?;
        unsafe {
            block_current(&mut self.recv_wait, obj, os_ms_to_ticks(timeout_ms))?;
            (*cur.as_ptr()).msg_ptr = msg;
        }

        drop(cs);
        crate::port::os_ctx_sw();

        // Resumed: on a grant the sender already copied the element
        // into this task's buffer.
        let _cs = CriticalSection::enter();
        let result = unsafe { classify_wakeup(&mut self.recv_wait, obj) };
        unsafe { (*cur.as_ptr()).msg_ptr = core::ptr::null_mut() };
        result
    }

    /// Number of elements currently queued
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.count >= self.capacity
    }
}

impl Default for OsQueue {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for OsQueue {}

// ============ Shareable wrapper ============

/// Interior-mutable queue handle usable from a `static`
///
/// The slice-based API checks element sizes at runtime; `msg.len()`
/// must equal the configured element size.
pub struct Queue {
    inner: UnsafeCell<OsQueue>,
}

unsafe impl Sync for Queue {}
unsafe impl Send for Queue {}

impl Queue {
    pub const fn new() -> Self {
        Queue {
            inner: UnsafeCell::new(OsQueue::new()),
        }
    }

    pub fn create(
        &self,
        buffer: &'static mut [u8],
        msg_size: usize,
        capacity: usize,
    ) -> OsResult<()> {
        if msg_size != 0 && buffer.len() < msg_size * capacity {
            return Err(OsError::SizeInvalid);
        }
        unsafe { (*self.inner.get()).create(buffer.as_mut_ptr(), msg_size, capacity) }
    }

    pub fn send(&self, msg: &[u8], timeout_ms: u32) -> OsResult<()> {
        let q = unsafe { &mut *self.inner.get() };
        if msg.len() != q.msg_size {
            return Err(OsError::SizeInvalid);
        }
        q.send(msg.as_ptr(), timeout_ms)
    }

    pub fn recv(&self, msg: &mut [u8], timeout_ms: u32) -> OsResult<()> {
        let q = unsafe { &mut *self.inner.get() };
        if msg.len() != q.msg_size {
            return Err(OsError::SizeInvalid);
        }
        q.recv(msg.as_mut_ptr(), timeout_ms)
    }

    #[inline]
    pub fn count(&self) -> usize {
        unsafe { (*self.inner.get()).count() }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        unsafe { (*self.inner.get()).is_empty() }
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        unsafe { (*self.inner.get()).is_full() }
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}
