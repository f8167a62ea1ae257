//! Counting semaphore
//!
//! A counting primitive with a configured maximum (1 gives a binary
//! semaphore). Waiters queue in priority order; a post with waiters
//! hands the unit straight to the highest-priority one without
//! touching the count.

use core::cell::UnsafeCell;

use crate::config::NO_WAIT;
use crate::critical::{is_isr_context, CriticalSection};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::sync::pend_list::{block_current, classify_wakeup, wake_first, PendList};
use crate::time::os_ms_to_ticks;
use crate::types::OsSemCtr;

/// Counting semaphore
pub struct OsSem {
    count: OsSemCtr,
    max: OsSemCtr,
    pend_list: PendList,
}

impl OsSem {
    /// Create a semaphore with an initial count and a maximum
    pub const fn new(initial: OsSemCtr, max: OsSemCtr) -> Self {
        OsSem {
            count: initial,
            max,
            pend_list: PendList::new(),
        }
    }

    /// Create a binary semaphore
    pub const fn binary(available: bool) -> Self {
        Self::new(available as OsSemCtr, 1)
    }

    /// Take one unit, blocking up to `timeout_ms` milliseconds
    ///
    /// `NO_WAIT` turns the call into a poll; `WAIT_FOREVER` blocks
    /// until a post. From ISR context only the polling form is
    /// allowed.
    pub fn pend(&mut self, timeout_ms: u32) -> OsResult<()> {
        if is_isr_context() && timeout_ms != NO_WAIT {
            return Err(OsError::PendIsr);
        }

        let obj = self as *const OsSem as *const ();

        let cs = CriticalSection::enter();

        if self.count > 0 {
            self.count -= 1;
            return Ok(());
        }

        if timeout_ms == NO_WAIT {
            return Err(OsError::WouldBlock);
        }
        if kernel::KERNEL.sched_lock_nesting() > 0 {
            return Err(OsError::SchedLocked);
        }

        unsafe { block_current(&mut self.pend_list, obj, os_ms_to_ticks(timeout_ms))? };

        drop(cs);
        crate::port::os_ctx_sw();

        // Resumed: either a poster granted the unit and cleared the
        // wait object, or the timeout readied this task.
        let _cs = CriticalSection::enter();
        unsafe { classify_wakeup(&mut self.pend_list, obj) }
    }

    /// Release one unit
    ///
    /// With waiters present the highest-priority one is granted the
    /// unit directly and readied; otherwise the count is incremented
    /// up to the maximum. Safe to call from ISR context.
    pub fn post(&mut self) -> OsResult<()> {
        let need_sched;
        {
            let _cs = CriticalSection::enter();

            match unsafe { wake_first(&mut self.pend_list) } {
                Some(woken) => {
                    need_sched = !is_isr_context()
                        && kernel::KERNEL.is_running()
                        && unsafe { sched::preempts_current(woken) };
                }
                None => {
                    if self.count >= self.max {
                        return Err(OsError::SemOvf);
                    }
                    self.count += 1;
                    need_sched = false;
                }
            }
        }

        if need_sched {
            sched::os_sched();
        }
        Ok(())
    }

    /// Poll for one unit without blocking
    pub fn try_pend(&mut self) -> OsResult<()> {
        self.pend(NO_WAIT)
    }

    /// Current count
    #[inline]
    pub fn count(&self) -> OsSemCtr {
        self.count
    }
}

impl Default for OsSem {
    fn default() -> Self {
        Self::new(0, OsSemCtr::MAX)
    }
}

// ============ Shareable wrapper ============

/// Interior-mutable semaphore handle usable from a `static`
pub struct Semaphore {
    inner: UnsafeCell<OsSem>,
}

unsafe impl Sync for Semaphore {}
unsafe impl Send for Semaphore {}

impl Semaphore {
    pub const fn new(initial: OsSemCtr, max: OsSemCtr) -> Self {
        Semaphore {
            inner: UnsafeCell::new(OsSem::new(initial, max)),
        }
    }

    pub const fn binary(available: bool) -> Self {
        Semaphore {
            inner: UnsafeCell::new(OsSem::binary(available)),
        }
    }

    pub fn wait(&self, timeout_ms: u32) -> OsResult<()> {
        unsafe { (*self.inner.get()).pend(timeout_ms) }
    }

    pub fn try_wait(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).try_pend() }
    }

    pub fn post(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).post() }
    }

    #[inline]
    pub fn count(&self) -> OsSemCtr {
        unsafe { (*self.inner.get()).count() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WAIT_FOREVER;
    use crate::critical::critical_section;
    use crate::kernel::os_init;
    use crate::task::{os_task_create_internal, OsTcb};
    use crate::testing::kernel_test_lock;
    use crate::types::{OsStkElement, OsTaskState};
    use core::ptr::NonNull;

    fn spawn(tcb: &mut OsTcb, stack: &mut [OsStkElement], prio: u8) {
        unsafe {
            os_task_create_internal(
                tcb,
                "t",
                |_| {},
                core::ptr::null_mut(),
                prio,
                stack.as_mut_ptr(),
                stack.len(),
            )
            .unwrap();
        }
    }

    unsafe fn make_current(tcb: NonNull<OsTcb>) {
        unsafe {
            sched::rdy_remove(tcb);
            (*tcb.as_ptr()).state = OsTaskState::Running;
            kernel::set_tcb_cur(Some(tcb));
        }
    }

    #[test]
    fn post_then_wait_round_trip() {
        let _guard = kernel_test_lock();
        os_init().unwrap();

        let mut sem = OsSem::new(0, 8);
        assert_eq!(sem.try_pend(), Err(OsError::WouldBlock));

        sem.post().unwrap();
        assert_eq!(sem.count(), 1);
        sem.pend(NO_WAIT).unwrap();
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn binary_overflow() {
        let _guard = kernel_test_lock();
        os_init().unwrap();

        let mut sem = OsSem::binary(false);
        sem.post().unwrap();
        assert_eq!(sem.post(), Err(OsError::SemOvf));
        assert_eq!(sem.count(), 1);
    }

    #[test]
    fn post_grants_highest_priority_waiter_first() {
        let _guard = kernel_test_lock();
        os_init().unwrap();

        let mut tcb_a = OsTcb::new();
        let mut tcb_b = OsTcb::new();
        let mut stk_a = [0u32; 64];
        let mut stk_b = [0u32; 64];
        spawn(&mut tcb_a, &mut stk_a, 2);
        spawn(&mut tcb_b, &mut stk_b, 1);
        let (pa, pb) = (NonNull::from(&mut tcb_a), NonNull::from(&mut tcb_b));

        let mut sem = OsSem::new(0, 1);
        let obj = &sem as *const OsSem as *const ();

        // A blocks first, then the higher-priority B.
        critical_section(|_cs| unsafe {
            make_current(pa);
            block_current(&mut sem.pend_list, obj, WAIT_FOREVER).unwrap();
            make_current(pb);
            block_current(&mut sem.pend_list, obj, WAIT_FOREVER).unwrap();
            kernel::set_tcb_cur(None);
        });

        sem.post().unwrap();
        assert_eq!(tcb_b.state, OsTaskState::Ready);
        assert!(tcb_b.wait_obj.is_null());
        assert_eq!(tcb_a.state, OsTaskState::Blocked);

        sem.post().unwrap();
        assert_eq!(tcb_a.state, OsTaskState::Ready);
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn timeout_classification_cleans_up() {
        let _guard = kernel_test_lock();
        os_init().unwrap();

        let mut tcb = OsTcb::new();
        let mut stack = [0u32; 64];
        spawn(&mut tcb, &mut stack, 3);
        let ptr = NonNull::from(&mut tcb);

        let mut sem = OsSem::new(0, 1);
        critical_section(|_cs| unsafe { make_current(ptr) });
        kernel::KERNEL.set_running(true);

        // No poster exists, so the wake-then-classify path reports a
        // timeout and fully unlinks the waiter.
        assert_eq!(sem.pend(5), Err(OsError::Timeout));
        assert!(tcb.wait_obj.is_null());
        assert_eq!(tcb.wake_tick, 0);
        assert!(sem.pend_list.is_empty());
        critical_section(|_cs| unsafe {
            assert!(kernel::delay_list().is_empty());
        });

        kernel::KERNEL.set_running(false);
    }

    #[test]
    fn grant_after_timeout_wakeup_does_not_ready_twice() {
        let _guard = kernel_test_lock();
        os_init().unwrap();

        let mut tcb = OsTcb::new();
        let mut stack = [0u32; 64];
        spawn(&mut tcb, &mut stack, 3);
        let ptr = NonNull::from(&mut tcb);

        let mut sem = OsSem::new(0, 1);
        let obj = &sem as *const OsSem as *const ();

        critical_section(|_cs| unsafe {
            make_current(ptr);
            block_current(&mut sem.pend_list, obj, 2).unwrap();
            kernel::set_tcb_cur(None);
        });
        kernel::KERNEL.set_running(true);

        // The timeout readies the waiter but leaves it on the waiter
        // queue until it gets to classify.
        crate::time::os_tick_handler();
        crate::time::os_tick_handler();
        assert_eq!(tcb.state, OsTaskState::Ready);
        assert!(!sem.pend_list.is_empty());

        // A post racing ahead of the classification must not insert
        // the task into its ready queue a second time.
        sem.post().unwrap();
        assert!(sem.pend_list.is_empty());
        assert!(tcb.wait_obj.is_null());
        assert!(tcb.next_ptr.is_none() && tcb.prev_ptr.is_none());
        critical_section(|_cs| unsafe {
            assert_eq!(kernel::rdy_list(3).head(), Some(ptr));
            sched::rdy_remove(ptr);
            assert!(!kernel::prio_table().is_set(3));
        });

        // The waiter's own classification then reports the grant.
        critical_section(|_cs| unsafe {
            kernel::set_tcb_cur(Some(ptr));
            assert_eq!(classify_wakeup(&mut sem.pend_list, obj), Ok(()));
            kernel::set_tcb_cur(None);
        });
        assert_eq!(sem.count(), 0);

        kernel::KERNEL.set_running(false);
    }

    #[test]
    fn grant_beats_timeout_when_posted_before_resume() {
        let _guard = kernel_test_lock();
        os_init().unwrap();

        let mut tcb = OsTcb::new();
        let mut stack = [0u32; 64];
        spawn(&mut tcb, &mut stack, 3);
        let ptr = NonNull::from(&mut tcb);

        let mut sem = OsSem::new(0, 1);
        let obj = &sem as *const OsSem as *const ();

        critical_section(|_cs| unsafe {
            make_current(ptr);
            block_current(&mut sem.pend_list, obj, 5).unwrap();
        });

        // The poster releases the waiter before it gets to classify.
        sem.post().unwrap();
        assert_eq!(tcb.state, OsTaskState::Ready);

        // Classification now sees the cleared wait object: success.
        critical_section(|_cs| unsafe {
            assert_eq!(classify_wakeup(&mut sem.pend_list, obj), Ok(()));
        });
        assert_eq!(sem.count(), 0);
    }
}
