//! Recursive mutex with priority inheritance
//!
//! Ownership-tracked mutual exclusion. The owner may re-lock without
//! blocking; contention from a higher-priority task boosts the owner
//! one hop so a middle-priority task cannot starve the lock holder.
//! The boost does not chain through a waiter that itself holds another
//! mutex.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::config::NO_WAIT;
use crate::critical::{is_isr_context, CriticalSection};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::sync::pend_list::{block_current, classify_wakeup, wake_first, PendList};
use crate::task::OsTcb;
use crate::time::os_ms_to_ticks;
use crate::types::{OsNestingCtr, OsPrio, OsTaskState};

/// Recursive mutex
pub struct OsMutex {
    /// Owning task, `None` when unlocked
    owner: Option<NonNull<OsTcb>>,
    /// Owner's priority at acquisition, restored on final unlock.
    /// Recording it here (not reading `base_prio` at release) keeps
    /// LIFO acquire/release of several mutexes restoring correctly.
    original_prio: OsPrio,
    /// Recursive lock depth
    lock_count: OsNestingCtr,
    pend_list: PendList,
}

impl OsMutex {
    pub const fn new() -> Self {
        OsMutex {
            owner: None,
            original_prio: 0,
            lock_count: 0,
            pend_list: PendList::new(),
        }
    }

    /// Acquire the mutex, blocking up to `timeout_ms` milliseconds
    ///
    /// Re-locking by the owner increments the recursion depth. When the
    /// holder has a lower priority than the caller it inherits the
    /// caller's priority until it unlocks.
    pub fn pend(&mut self, timeout_ms: u32) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::PendIsr);
        }

        let obj = self as *const OsMutex as *const ();

        let cs = CriticalSection::enter();

        let cur = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?;

        let owner = match self.owner {
            None => {
                self.owner = Some(cur);
                self.original_prio = unsafe { cur.as_ref().prio };
                self.lock_count = 1;
                return Ok(());
            }
            Some(owner) if owner == cur => {
                if self.lock_count == OsNestingCtr::MAX {
                    return Err(OsError::MutexOvf);
                }
                self.lock_count += 1;
                return Ok(());
            }
            Some(owner) => owner,
        };

        if timeout_ms == NO_WAIT {
            return Err(OsError::WouldBlock);
        }
        if kernel::KERNEL.sched_lock_nesting() > 0 {
            return Err(OsError::SchedLocked);
        }

        #[cfg(feature = "inherit")]
        unsafe {
            let cur_prio = cur.as_ref().prio;
            let owner_ref = &mut *owner.as_ptr();
            if cur_prio < owner_ref.prio {
                if owner_ref.state == OsTaskState::Ready {
                    sched::rdy_change_prio(owner, cur_prio);
                } else {
                    owner_ref.prio = cur_prio;
                }
            }
        }
        #[cfg(not(feature = "inherit"))]
        let _ = owner;

        unsafe { block_current(&mut self.pend_list, obj, os_ms_to_ticks(timeout_ms))? };

        drop(cs);
        crate::port::os_ctx_sw();

        // Resumed: on a grant the unlocking task already transferred
        // ownership to us; otherwise this is a timeout.
        let _cs = CriticalSection::enter();
        unsafe { classify_wakeup(&mut self.pend_list, obj) }
    }

    /// Release the mutex
    ///
    /// Only the owner may unlock. The final unlock restores the
    /// owner's priority recorded at acquisition and hands the lock to
    /// the highest-priority waiter, if any.
    pub fn post(&mut self) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::StateInvalid);
        }

        let need_sched;
        {
            let _cs = CriticalSection::enter();

            let cur = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?;
            if self.owner != Some(cur) {
                return Err(OsError::MutexNotOwner);
            }

            self.lock_count -= 1;
            if self.lock_count > 0 {
                return Ok(());
            }

            #[cfg(feature = "inherit")]
            unsafe {
                let cur_ref = &mut *cur.as_ptr();
                if cur_ref.prio != self.original_prio {
                    if cur_ref.state == OsTaskState::Ready {
                        sched::rdy_change_prio(cur, self.original_prio);
                    } else {
                        cur_ref.prio = self.original_prio;
                    }
                }
            }

            self.owner = None;

            match unsafe { wake_first(&mut self.pend_list) } {
                Some(woken) => {
                    // Ownership transfers directly to the woken waiter.
                    self.owner = Some(woken);
                    self.original_prio = unsafe { woken.as_ref().base_prio };
                    self.lock_count = 1;

                    need_sched =
                        kernel::KERNEL.is_running() && unsafe { sched::preempts_current(woken) };
                }
                None => need_sched = false,
            }
        }

        if need_sched {
            sched::os_sched();
        }
        Ok(())
    }

    /// Try to acquire without blocking
    pub fn try_pend(&mut self) -> OsResult<()> {
        self.pend(NO_WAIT)
    }

    /// Whether any task currently owns the mutex
    #[inline]
    pub fn is_owned(&self) -> bool {
        self.owner.is_some()
    }

    /// Current priority of the owner, if owned
    pub fn owner_prio(&self) -> Option<OsPrio> {
        self.owner.map(|ptr| unsafe { ptr.as_ref().prio })
    }
}

impl Default for OsMutex {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Shareable wrapper ============

/// Interior-mutable mutex handle usable from a `static`
pub struct Mutex {
    inner: UnsafeCell<OsMutex>,
}

unsafe impl Sync for Mutex {}
unsafe impl Send for Mutex {}

impl Mutex {
    pub const fn new() -> Self {
        Mutex {
            inner: UnsafeCell::new(OsMutex::new()),
        }
    }

    pub fn lock(&self, timeout_ms: u32) -> OsResult<()> {
        unsafe { (*self.inner.get()).pend(timeout_ms) }
    }

    pub fn try_lock(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).try_pend() }
    }

    pub fn unlock(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).post() }
    }

    #[inline]
    pub fn is_owned(&self) -> bool {
        unsafe { (*self.inner.get()).is_owned() }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}
