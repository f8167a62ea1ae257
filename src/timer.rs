//! Soft timers
//!
//! Software timers serviced from the tick interrupt. Active timers form
//! one singly-linked list sorted by ascending expiry tick, so the tick
//! handler only ever inspects the head. Callbacks run in interrupt
//! context with interrupts disabled: they must be short and must not
//! block (non-blocking operations such as a semaphore post are fine).

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::critical::CriticalSection;
use crate::error::OsResult;
use crate::kernel;
use crate::time::{os_ms_to_ticks, tick_reached};
use crate::types::OsTick;

/// Timer callback function type
pub type OsTimerFn = fn(*mut ());

/// Soft timer control block
///
/// Storage is owned by the caller; the kernel links active timers
/// through the `next` pointer.
pub struct OsTimer {
    /// Reload interval in ticks (also the initial delay)
    period: OsTick,
    /// Absolute tick of the next expiry
    next_expiry: OsTick,
    callback: Option<OsTimerFn>,
    arg: *mut (),
    active: bool,
    one_shot: bool,
    next: Option<NonNull<OsTimer>>,
}

impl OsTimer {
    pub const fn new() -> Self {
        OsTimer {
            period: 0,
            next_expiry: 0,
            callback: None,
            arg: core::ptr::null_mut(),
            active: false,
            one_shot: false,
            next: None,
        }
    }

    /// Arm as a periodic timer firing every `period_ms`
    ///
    /// A zero period is rounded up to one tick. Restarting an active
    /// timer re-arms it from now with the new settings.
    pub fn start(&mut self, period_ms: u32, callback: OsTimerFn, arg: *mut ()) -> OsResult<()> {
        self.arm(period_ms, callback, arg, false)
    }

    /// Arm as a one-shot timer firing once after `delay_ms`
    pub fn start_once(&mut self, delay_ms: u32, callback: OsTimerFn, arg: *mut ()) -> OsResult<()> {
        self.arm(delay_ms, callback, arg, true)
    }

    fn arm(&mut self, ms: u32, callback: OsTimerFn, arg: *mut (), one_shot: bool) -> OsResult<()> {
        let mut ticks = os_ms_to_ticks(ms);
        if ticks == 0 {
            ticks = 1;
        }

        let _cs = CriticalSection::enter();

        let this = NonNull::from(&mut *self);
        unsafe {
            if self.active {
                kernel::timer_list().remove(this);
            }

            self.period = ticks;
            self.next_expiry = kernel::KERNEL.tick_get().wrapping_add(ticks);
            self.callback = Some(callback);
            self.arg = arg;
            self.active = true;
            self.one_shot = one_shot;

            kernel::timer_list().insert(this);
        }

        Ok(())
    }

    /// Disarm the timer; a stopped timer keeps its configuration but
    /// no longer fires
    pub fn stop(&mut self) -> OsResult<()> {
        let _cs = CriticalSection::enter();

        if self.active {
            let this = NonNull::from(&mut *self);
            unsafe { kernel::timer_list().remove(this) };
            self.active = false;
        }

        Ok(())
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Default for OsTimer {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for OsTimer {}

// ============ Active timer list ============

/// Singly-linked list of active timers sorted by `next_expiry`
pub struct TimerList {
    head: Option<NonNull<OsTimer>>,
}

impl TimerList {
    pub const fn new() -> Self {
        TimerList { head: None }
    }

    pub fn init(&mut self) {
        self.head = None;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Insert sorted by expiry; equal expiries keep insertion order
    ///
    /// # Safety
    /// `timer` must be valid and not linked.
    pub unsafe fn insert(&mut self, timer: NonNull<OsTimer>) {
        let expiry = unsafe { timer.as_ref().next_expiry };

        let mut prev: Option<NonNull<OsTimer>> = None;
        let mut current = self.head;

        while let Some(cur_ptr) = current {
            let cur_ref = unsafe { cur_ptr.as_ref() };
            if !tick_reached(expiry, cur_ref.next_expiry) {
                break;
            }
            prev = current;
            current = cur_ref.next;
        }

        unsafe { (*timer.as_ptr()).next = current };
        match prev {
            Some(p) => unsafe { (*p.as_ptr()).next = Some(timer) },
            None => self.head = Some(timer),
        }
    }

    /// Unlink a timer; no-op when it is not in the list
    ///
    /// # Safety
    /// `timer` must be a valid pointer.
    pub unsafe fn remove(&mut self, timer: NonNull<OsTimer>) {
        let mut prev: Option<NonNull<OsTimer>> = None;
        let mut current = self.head;

        while let Some(cur_ptr) = current {
            if cur_ptr == timer {
                let next = unsafe { cur_ptr.as_ref().next };
                match prev {
                    Some(p) => unsafe { (*p.as_ptr()).next = next },
                    None => self.head = next,
                }
                unsafe { (*timer.as_ptr()).next = None };
                return;
            }
            prev = current;
            current = unsafe { cur_ptr.as_ref().next };
        }
    }

    /// Pop the head if it has expired at `now`
    pub fn pop_expired(&mut self, now: OsTick) -> Option<NonNull<OsTimer>> {
        let head = self.head?;
        if tick_reached(now, unsafe { head.as_ref().next_expiry }) {
            self.head = unsafe { head.as_ref().next };
            unsafe { (*head.as_ptr()).next = None };
            Some(head)
        } else {
            None
        }
    }
}

impl Default for TimerList {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for TimerList {}
unsafe impl Sync for TimerList {}

// ============ Tick-side expiry ============

/// Run expired timer callbacks; called from the tick handler
///
/// Iterates from the head while timers have expired: each is unlinked,
/// its callback invoked, and a still-active periodic timer is re-armed
/// `period` ticks from now. One-shot timers become inactive.
///
/// # Safety
/// Must be called with interrupts disabled.
pub(crate) unsafe fn os_timer_tick(now: OsTick) {
    loop {
        let timer = unsafe {
            match kernel::timer_list().pop_expired(now) {
                Some(t) => t,
                None => break,
            }
        };

        let t_ref = unsafe { &mut *timer.as_ptr() };
        if let Some(cb) = t_ref.callback {
            cb(t_ref.arg);
        }

        if !t_ref.one_shot && t_ref.active {
            t_ref.next_expiry = now.wrapping_add(t_ref.period);
            unsafe { kernel::timer_list().insert(timer) };
        } else {
            t_ref.active = false;
        }
    }
}

// ============ Shareable wrapper ============

/// Interior-mutable timer handle usable from a `static`
pub struct Timer {
    inner: UnsafeCell<OsTimer>,
}

unsafe impl Sync for Timer {}
unsafe impl Send for Timer {}

impl Timer {
    pub const fn new() -> Self {
        Timer {
            inner: UnsafeCell::new(OsTimer::new()),
        }
    }

    pub fn start(&self, period_ms: u32, callback: OsTimerFn, arg: *mut ()) -> OsResult<()> {
        unsafe { (*self.inner.get()).start(period_ms, callback, arg) }
    }

    pub fn start_once(&self, delay_ms: u32, callback: OsTimerFn, arg: *mut ()) -> OsResult<()> {
        unsafe { (*self.inner.get()).start_once(delay_ms, callback, arg) }
    }

    pub fn stop(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).stop() }
    }

    pub fn is_active(&self) -> bool {
        unsafe { (*self.inner.get()).is_active() }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::os_init;
    use crate::testing::kernel_test_lock;
    use core::sync::atomic::{AtomicU32, Ordering};

    fn count_cb(arg: *mut ()) {
        let counter = unsafe { &*(arg as *const AtomicU32) };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn periodic_fires_every_period() {
        let _guard = kernel_test_lock();
        os_init().unwrap();

        let fires = AtomicU32::new(0);
        let mut timer = OsTimer::new();
        timer
            .start(3, count_cb, &fires as *const AtomicU32 as *mut ())
            .unwrap();

        let mut fired_at = [0u32; 3];
        let mut n = 0;
        for now in 1..=10u32 {
            let before = fires.load(Ordering::Relaxed);
            unsafe { os_timer_tick(now) };
            if fires.load(Ordering::Relaxed) > before {
                fired_at[n] = now;
                n += 1;
            }
        }

        assert_eq!(fired_at, [3, 6, 9]);
        assert!(timer.is_active());
    }

    #[test]
    fn one_shot_fires_once() {
        let _guard = kernel_test_lock();
        os_init().unwrap();

        let fires = AtomicU32::new(0);
        let mut timer = OsTimer::new();
        timer
            .start_once(5, count_cb, &fires as *const AtomicU32 as *mut ())
            .unwrap();

        for now in 1..=10u32 {
            unsafe { os_timer_tick(now) };
        }

        assert_eq!(fires.load(Ordering::Relaxed), 1);
        assert!(!timer.is_active());
    }

    #[test]
    fn stop_disarms() {
        let _guard = kernel_test_lock();
        os_init().unwrap();

        let fires = AtomicU32::new(0);
        let mut timer = OsTimer::new();
        timer
            .start(2, count_cb, &fires as *const AtomicU32 as *mut ())
            .unwrap();
        timer.stop().unwrap();
        assert!(!timer.is_active());

        for now in 1..=6u32 {
            unsafe { os_timer_tick(now) };
        }
        assert_eq!(fires.load(Ordering::Relaxed), 0);

        // Stopping again is harmless.
        timer.stop().unwrap();
    }

    #[test]
    fn restart_replaces_schedule() {
        let _guard = kernel_test_lock();
        os_init().unwrap();

        let fires = AtomicU32::new(0);
        let mut timer = OsTimer::new();
        timer
            .start(10, count_cb, &fires as *const AtomicU32 as *mut ())
            .unwrap();
        // Re-arm with a shorter period before the first expiry.
        timer
            .start(2, count_cb, &fires as *const AtomicU32 as *mut ())
            .unwrap();

        unsafe { os_timer_tick(1) };
        assert_eq!(fires.load(Ordering::Relaxed), 0);
        unsafe { os_timer_tick(2) };
        assert_eq!(fires.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn two_timers_fire_in_expiry_order() {
        let _guard = kernel_test_lock();
        os_init().unwrap();

        let slow_fires = AtomicU32::new(0);
        let fast_fires = AtomicU32::new(0);
        let mut slow = OsTimer::new();
        let mut fast = OsTimer::new();
        slow.start_once(7, count_cb, &slow_fires as *const AtomicU32 as *mut ())
            .unwrap();
        fast.start_once(4, count_cb, &fast_fires as *const AtomicU32 as *mut ())
            .unwrap();

        for now in 1..=5u32 {
            unsafe { os_timer_tick(now) };
        }
        assert_eq!(fast_fires.load(Ordering::Relaxed), 1);
        assert_eq!(slow_fires.load(Ordering::Relaxed), 0);

        for now in 6..=8u32 {
            unsafe { os_timer_tick(now) };
        }
        assert_eq!(slow_fires.load(Ordering::Relaxed), 1);
    }
}
