//! Scheduler core
//!
//! Priority-based preemptive scheduling: per-priority FIFO ready queues
//! plus a bitmap for O(1) highest-priority lookup. Task selection runs
//! at the tail of the pended context switch exception
//! ([`switch_context`]); everything else only moves tasks between
//! queues and pends the switch.

mod rdy_list;

pub use rdy_list::ReadyList;

use core::ptr::NonNull;

use crate::critical::{is_isr_context, CriticalSection};
use crate::kernel;
use crate::task::OsTcb;
use crate::types::{OsPrio, OsTaskState};

/// Make a task ready: append to its priority's queue, set the bitmap
/// bit, mark it `Ready`
///
/// # Safety
/// Caller must hold the critical section; `tcb` must not be linked in
/// any ready queue.
pub(crate) unsafe fn rdy_insert(tcb: NonNull<OsTcb>) {
    unsafe {
        let tcb_ref = &mut *tcb.as_ptr();
        tcb_ref.state = OsTaskState::Ready;

        let prio = tcb_ref.prio;
        kernel::rdy_list(prio).insert_tail(tcb);
        kernel::prio_table().insert(prio);
    }
}

/// Unlink a task from its ready queue, clearing the bitmap bit if the
/// queue drained. The state is left for the caller to set.
///
/// # Safety
/// Caller must hold the critical section; `tcb` must be linked in the
/// ready queue matching its current priority.
pub(crate) unsafe fn rdy_remove(tcb: NonNull<OsTcb>) {
    unsafe {
        let prio = tcb.as_ref().prio;
        let rdy_list = kernel::rdy_list(prio);
        rdy_list.remove(tcb);

        if rdy_list.is_empty() {
            kernel::prio_table().remove(prio);
        }
    }
}

/// Head of the highest non-empty ready queue, without unlinking
///
/// # Safety
/// Caller must hold the critical section.
pub(crate) unsafe fn highest_ready() -> Option<NonNull<OsTcb>> {
    unsafe {
        let prio = kernel::prio_table().highest()?;
        kernel::rdy_list(prio).head()
    }
}

/// Move a ready task to a different priority's queue
///
/// # Safety
/// Caller must hold the critical section; `tcb` must be linked in the
/// ready queue matching its current priority.
pub(crate) unsafe fn rdy_change_prio(tcb: NonNull<OsTcb>, new_prio: OsPrio) {
    let tcb_ref = unsafe { &mut *tcb.as_ptr() };

    if tcb_ref.prio == new_prio {
        return;
    }

    unsafe { rdy_remove(tcb) };
    tcb_ref.prio = new_prio;
    unsafe {
        kernel::rdy_list(new_prio).insert_tail(tcb);
        kernel::prio_table().insert(new_prio);
    }
}

/// `true` when a freshly readied task outranks the current one
///
/// # Safety
/// Caller must hold the critical section.
pub(crate) unsafe fn preempts_current(woken: NonNull<OsTcb>) -> bool {
    match unsafe { kernel::tcb_cur_ptr() } {
        Some(cur) => unsafe { woken.as_ref().prio < cur.as_ref().prio },
        None => false,
    }
}

/// Task-level scheduling point
///
/// Pends a context switch when the highest-priority ready task differs
/// from the current one. Called after any operation that may change
/// task readiness. No-op from ISR context (the tick handler performs
/// its own check) and while the scheduler is locked.
pub fn os_sched() {
    if !kernel::KERNEL.is_running() {
        return;
    }
    if is_isr_context() {
        return;
    }
    if kernel::KERNEL.sched_lock_nesting() > 0 {
        return;
    }

    let _cs = CriticalSection::enter();

    unsafe {
        if let Some(high_rdy) = highest_ready() {
            if Some(high_rdy) != kernel::tcb_cur_ptr() {
                crate::port::os_ctx_sw();
            }
        }
    }
}

/// Select the next task to run
///
/// Runs inside the context switch exception with interrupts disabled.
/// A current task that did not block itself is demoted to `Ready` and
/// requeued at the tail of its priority (FIFO rotation); then the
/// highest-priority ready task is unlinked, marked `Running` and made
/// current.
pub(crate) unsafe fn switch_context() {
    #[cfg(feature = "stats")]
    kernel::KERNEL.ctx_sw_increment();

    unsafe {
        if let Some(cur) = kernel::tcb_cur_ptr() {
            if cur.as_ref().state == OsTaskState::Running {
                rdy_insert(cur);
            }
        }

        let next = highest_ready();
        if let Some(n) = next {
            rdy_remove(n);
            let n_ref = &mut *n.as_ptr();
            n_ref.state = OsTaskState::Running;
            #[cfg(feature = "stats")]
            {
                n_ref.run_count += 1;
            }
        }

        kernel::set_tcb_cur(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::os_init;
    use crate::task::os_task_create_internal;
    use crate::testing::kernel_test_lock;
    use crate::types::OsStkElement;

    fn spawn(tcb: &mut OsTcb, stack: &mut [OsStkElement], name: &'static str, prio: u8) {
        unsafe {
            os_task_create_internal(
                tcb,
                name,
                |_| {},
                core::ptr::null_mut(),
                prio,
                stack.as_mut_ptr(),
                stack.len(),
            )
            .unwrap();
        }
    }

    #[test]
    fn selects_highest_priority() {
        let _guard = kernel_test_lock();
        os_init().unwrap();

        let mut tcb_lo = OsTcb::new();
        let mut tcb_hi = OsTcb::new();
        let mut stk_lo = [0u32; 64];
        let mut stk_hi = [0u32; 64];
        spawn(&mut tcb_lo, &mut stk_lo, "lo", 6);
        spawn(&mut tcb_hi, &mut stk_hi, "hi", 2);

        let _cs = CriticalSection::enter();
        unsafe {
            switch_context();
            assert_eq!(kernel::tcb_cur_ptr(), Some(NonNull::from(&mut tcb_hi)));
            assert_eq!(tcb_hi.state, OsTaskState::Running);
            // The running task is not in any ready queue.
            assert!(!kernel::prio_table().is_set(2));
        }
    }

    #[test]
    fn fifo_rotation_within_priority() {
        let _guard = kernel_test_lock();
        os_init().unwrap();

        let mut tcb_a = OsTcb::new();
        let mut tcb_b = OsTcb::new();
        let mut stk_a = [0u32; 64];
        let mut stk_b = [0u32; 64];
        spawn(&mut tcb_a, &mut stk_a, "a", 4);
        spawn(&mut tcb_b, &mut stk_b, "b", 4);

        let _cs = CriticalSection::enter();
        unsafe {
            switch_context();
            assert_eq!(kernel::tcb_cur_ptr(), Some(NonNull::from(&mut tcb_a)));

            // A is still running; the next switch requeues it behind B.
            switch_context();
            assert_eq!(kernel::tcb_cur_ptr(), Some(NonNull::from(&mut tcb_b)));
            assert_eq!(tcb_a.state, OsTaskState::Ready);

            switch_context();
            assert_eq!(kernel::tcb_cur_ptr(), Some(NonNull::from(&mut tcb_a)));
        }
    }

    #[test]
    fn blocked_task_is_not_requeued() {
        let _guard = kernel_test_lock();
        os_init().unwrap();

        let mut tcb_a = OsTcb::new();
        let mut stk_a = [0u32; 64];
        spawn(&mut tcb_a, &mut stk_a, "a", 4);

        let _cs = CriticalSection::enter();
        unsafe {
            switch_context();
            assert_eq!(kernel::tcb_cur_ptr(), Some(NonNull::from(&mut tcb_a)));

            // Simulate a self-block; the scheduler must fall through to
            // the idle task and leave A out of the ready set.
            tcb_a.state = OsTaskState::Blocked;
            switch_context();
            let cur = kernel::tcb_cur_ptr().unwrap();
            assert_eq!(cur.as_ptr().cast_const(), kernel::idle_tcb_ptr());
            assert!(!kernel::prio_table().is_set(4));
        }
    }

    #[test]
    fn change_prio_moves_queues() {
        let _guard = kernel_test_lock();
        os_init().unwrap();

        let mut tcb_a = OsTcb::new();
        let mut stk_a = [0u32; 64];
        spawn(&mut tcb_a, &mut stk_a, "a", 5);

        let _cs = CriticalSection::enter();
        unsafe {
            rdy_change_prio(NonNull::from(&mut tcb_a), 1);
            assert!(kernel::prio_table().is_set(1));
            assert!(!kernel::prio_table().is_set(5));
            assert_eq!(tcb_a.prio, 1);
            assert_eq!(highest_ready(), Some(NonNull::from(&mut tcb_a)));
        }
    }
}
