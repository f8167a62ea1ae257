//! Time management
//!
//! The tick handler drives everything time-based: it advances the
//! monotonic tick counter, expires soft timers, wakes delayed tasks and
//! pends a context switch when the highest-priority ready task is no
//! longer the current one. Delays block the caller on the sorted delay
//! queue; timeouts of the sync primitives share the same queue.

mod delay;

pub use delay::DelayList;
pub(crate) use delay::tick_reached;

use core::ptr::NonNull;

use crate::config::{CFG_TICK_RATE_HZ, WAIT_FOREVER};
use crate::critical::{is_isr_context, CriticalSection};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::task::OsTcb;
use crate::types::{OsTaskState, OsTick};

/// Current tick count
#[inline]
pub fn os_time_get() -> OsTick {
    kernel::KERNEL.tick_get()
}

/// Convert a millisecond interval to ticks, rounding up to at least
/// one tick; `NO_WAIT` and `WAIT_FOREVER` pass through unchanged
pub fn os_ms_to_ticks(ms: u32) -> OsTick {
    if ms == WAIT_FOREVER {
        return WAIT_FOREVER;
    }
    if ms == 0 {
        return 0;
    }

    let ticks = (ms as u64 * CFG_TICK_RATE_HZ as u64).div_ceil(1000);
    ticks.clamp(1, (WAIT_FOREVER - 1) as u64) as OsTick
}

/// Delay the calling task for `ticks` system ticks
///
/// The task blocks on the delay queue and resumes once the wake tick
/// has been reached, no earlier. A zero delay returns immediately.
pub fn os_time_dly(ticks: OsTick) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }
    if is_isr_context() {
        return Err(OsError::DelayIsr);
    }
    if kernel::KERNEL.sched_lock_nesting() > 0 {
        return Err(OsError::SchedLocked);
    }
    if ticks == 0 {
        return Ok(());
    }

    {
        let _cs = CriticalSection::enter();
        let cur = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?;
        unsafe {
            (*cur.as_ptr()).state = OsTaskState::Blocked;
            delay_arm(cur, ticks);
        }
    }

    crate::port::os_ctx_sw();
    Ok(())
}

/// Delay the calling task for `ms` milliseconds (at least one tick)
pub fn os_time_dly_ms(ms: u32) -> OsResult<()> {
    if ms == 0 {
        return Ok(());
    }
    os_time_dly(os_ms_to_ticks(ms))
}

/// Delay in hours, minutes, seconds and milliseconds
pub fn os_time_dly_hmsm(hours: u16, minutes: u8, seconds: u8, milliseconds: u16) -> OsResult<()> {
    if minutes > 59 || seconds > 59 || milliseconds > 999 {
        return Err(OsError::StateInvalid);
    }

    let total_ms = (hours as u32) * 3_600_000
        + (minutes as u32) * 60_000
        + (seconds as u32) * 1000
        + (milliseconds as u32);

    os_time_dly_ms(total_ms)
}

/// Delay the calling task until an absolute tick count
///
/// Returns immediately when `wake_tick` has already been reached.
/// Using the previous wake tick plus a fixed period gives a drift-free
/// periodic task.
pub fn os_time_dly_until(wake_tick: OsTick) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }
    if is_isr_context() {
        return Err(OsError::DelayIsr);
    }
    if kernel::KERNEL.sched_lock_nesting() > 0 {
        return Err(OsError::SchedLocked);
    }

    {
        let _cs = CriticalSection::enter();

        if tick_reached(kernel::KERNEL.tick_get(), wake_tick) {
            return Ok(());
        }

        let cur = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?;
        unsafe {
            (*cur.as_ptr()).state = OsTaskState::Blocked;
            delay_arm_at(cur, wake_tick);
        }
    }

    crate::port::os_ctx_sw();
    Ok(())
}

/// Wake a plain-delayed task before its delay expires
pub fn os_time_dly_resume(tcb: NonNull<OsTcb>) -> OsResult<()> {
    let preempt;
    {
        let _cs = CriticalSection::enter();

        let t = unsafe { &mut *tcb.as_ptr() };
        if t.state != OsTaskState::Blocked || !t.wait_obj.is_null() || t.wake_tick == 0 {
            return Err(OsError::TaskNotDelayed);
        }

        unsafe {
            delay_cancel(tcb);
            sched::rdy_insert(tcb);
        }
        preempt = kernel::KERNEL.is_running() && unsafe { sched::preempts_current(tcb) };
    }

    if preempt {
        crate::port::os_ctx_sw();
    }

    Ok(())
}

// ============ Delay queue plumbing ============

/// Arm a wakeup `ticks` from now and link into the delay queue
///
/// # Safety
/// Caller must hold the critical section; `tcb` must not already be in
/// the delay queue.
pub(crate) unsafe fn delay_arm(tcb: NonNull<OsTcb>, ticks: OsTick) {
    let wake = kernel::KERNEL.tick_get().wrapping_add(ticks);
    unsafe { delay_arm_at(tcb, wake) };
}

/// Arm a wakeup at an absolute tick and link into the delay queue
///
/// # Safety
/// Caller must hold the critical section; `tcb` must not already be in
/// the delay queue.
pub(crate) unsafe fn delay_arm_at(tcb: NonNull<OsTcb>, wake_tick: OsTick) {
    unsafe {
        // 0 is reserved as the "no timeout" sentinel.
        (*tcb.as_ptr()).wake_tick = if wake_tick == 0 { 1 } else { wake_tick };
        kernel::delay_list().insert(tcb);
    }
}

/// Disarm a pending wakeup, if any
///
/// # Safety
/// Caller must hold the critical section.
pub(crate) unsafe fn delay_cancel(tcb: NonNull<OsTcb>) {
    unsafe {
        if tcb.as_ref().wake_tick != 0 {
            kernel::delay_list().remove(tcb);
        }
    }
}

// ============ Tick processing ============

/// Kernel tick entry point, invoked by the tick interrupt
///
/// Advances the tick counter, runs timer expiry and delayed-task
/// wakeup, and pends a context switch when the highest-priority ready
/// task differs from the current one (unless the scheduler is locked).
pub fn os_tick_handler() {
    if !kernel::KERNEL.is_running() {
        return;
    }

    let _cs = CriticalSection::enter();

    let now = kernel::KERNEL.tick_increment();

    #[cfg(feature = "stats")]
    unsafe {
        if let Some(cur) = kernel::tcb_cur_ptr() {
            if cur.as_ptr().cast_const() == kernel::idle_tcb_ptr() {
                kernel::KERNEL.idle_tick_increment();
            } else {
                (*cur.as_ptr()).total_ticks += 1;
            }
        }
    }

    #[cfg(feature = "timer")]
    unsafe {
        crate::timer::os_timer_tick(now);
    }

    unsafe {
        // Tasks whose wake tick has been reached become ready. A task
        // blocked on a sync object stays linked on its waiter queue;
        // it classifies the wakeup as a timeout itself once it runs,
        // and a grant arriving before then only unlinks it (the grant
        // path checks the state before readying).
        while let Some(woken) = kernel::delay_list().pop_expired(now) {
            sched::rdy_insert(woken);
        }

        if kernel::KERNEL.sched_lock_nesting() == 0 {
            if let Some(high_rdy) = sched::highest_ready() {
                if Some(high_rdy) != kernel::tcb_cur_ptr() {
                    crate::port::os_int_ctx_sw();
                }
            }
        }
    }
}

/// SysTick interrupt handler
#[cfg(target_arch = "arm")]
#[no_mangle]
pub extern "C" fn SysTick() {
    os_tick_handler();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NO_WAIT;
    use crate::critical::critical_section;
    use crate::kernel::os_init;
    use crate::sched::switch_context;
    use crate::task::os_task_create_internal;
    use crate::testing::kernel_test_lock;
    use crate::types::OsStkElement;

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

    #[test]
    fn ms_conversion_rounds_up() {
        assert_eq!(os_ms_to_ticks(0), NO_WAIT);
        assert_eq!(os_ms_to_ticks(1), 1);
        assert_eq!(os_ms_to_ticks(20), 20);
        assert_eq!(os_ms_to_ticks(WAIT_FOREVER), WAIT_FOREVER);
    }

    #[test]
    fn delay_wakes_no_earlier_than_requested() {
        let _guard = kernel_test_lock();
        os_init().unwrap();

        let mut tcb = OsTcb::new();
        let mut stack = [0u32; 64];
        spawn(&mut tcb, &mut stack, 3);
        let ptr = NonNull::from(&mut tcb);

        critical_section(|_cs| unsafe { switch_context() });
        assert_eq!(tcb.state, OsTaskState::Running);
        kernel::KERNEL.set_running(true);

        os_time_dly(3).unwrap();
        assert_eq!(tcb.state, OsTaskState::Blocked);

        // The blocked task is skipped; the idle task takes over.
        critical_section(|_cs| unsafe { switch_context() });

        os_tick_handler();
        os_tick_handler();
        assert_eq!(tcb.state, OsTaskState::Blocked);

        os_tick_handler();
        assert_eq!(tcb.state, OsTaskState::Ready);
        assert_eq!(tcb.wake_tick, 0);

        critical_section(|_cs| unsafe {
            switch_context();
            assert_eq!(kernel::tcb_cur_ptr(), Some(ptr));
        });

        #[cfg(feature = "stats")]
        assert_eq!(crate::kernel::os_stats_idle_ticks(), 3);

        kernel::KERNEL.set_running(false);
    }

    #[test]
    fn delay_across_tick_wraparound() {
        let _guard = kernel_test_lock();
        os_init().unwrap();

        let mut tcb = OsTcb::new();
        let mut stack = [0u32; 64];
        spawn(&mut tcb, &mut stack, 3);

        critical_section(|_cs| unsafe { switch_context() });
        kernel::KERNEL.set_running(true);
        kernel::KERNEL.set_tick(0xFFFF_FFF8);

        // 10 ticks from 0xFFFF_FFF8 lands on 0x0000_0002.
        os_time_dly(10).unwrap();
        assert_eq!(tcb.wake_tick, 0x0000_0002);

        critical_section(|_cs| unsafe { switch_context() });

        for _ in 0..9 {
            os_tick_handler();
            assert_eq!(tcb.state, OsTaskState::Blocked);
        }
        os_tick_handler();
        assert_eq!(kernel::KERNEL.tick_get(), 0x0000_0002);
        assert_eq!(tcb.state, OsTaskState::Ready);

        kernel::KERNEL.set_running(false);
    }

    #[test]
    fn dly_resume_readies_early() {
        let _guard = kernel_test_lock();
        os_init().unwrap();

        let mut tcb = OsTcb::new();
        let mut stack = [0u32; 64];
        spawn(&mut tcb, &mut stack, 3);
        let ptr = NonNull::from(&mut tcb);

        assert_eq!(os_time_dly_resume(ptr), Err(OsError::TaskNotDelayed));

        critical_section(|_cs| unsafe {
            sched::rdy_remove(ptr);
            (*ptr.as_ptr()).state = OsTaskState::Blocked;
            delay_arm(ptr, 100);
        });

        os_time_dly_resume(ptr).unwrap();
        assert_eq!(tcb.state, OsTaskState::Ready);
        assert_eq!(tcb.wake_tick, 0);
        critical_section(|_cs| unsafe {
            assert!(kernel::delay_list().is_empty());
        });
    }
}
