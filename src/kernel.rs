//! Global kernel state and lifecycle
//!
//! The kernel is a process-wide singleton split into three parts:
//! lock-free flags ([`KERNEL`]), queue state behind the critical
//! section ([`STATE`]), and the current-task pointer the context switch
//! exception reads directly ([`CPU_STATE`]).

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::config::{CFG_IDLE_STK_SIZE, CFG_PRIO_IDLE, CFG_PRIO_MAX};
use crate::critical::critical_section;
use crate::cs_cell::CsCell;
use crate::error::{OsError, OsResult};
use crate::prio::PrioBitmap;
use crate::sched::ReadyList;
use crate::task::OsTcb;
use crate::time::DelayList;
use crate::types::{OsNestingCtr, OsStkElement, OsTick};

#[cfg(feature = "timer")]
use crate::timer::TimerList;

// ============ Lock-free kernel flags ============

/// Atomic kernel flags and counters
pub struct KernelFlags {
    initialized: AtomicBool,
    running: AtomicBool,
    sched_lock_nesting: AtomicU8,
    tick_counter: AtomicU32,
    #[cfg(feature = "stats")]
    context_switches: AtomicU32,
    #[cfg(feature = "stats")]
    idle_ticks: AtomicU32,
}

impl KernelFlags {
    const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            sched_lock_nesting: AtomicU8::new(0),
            tick_counter: AtomicU32::new(0),
            #[cfg(feature = "stats")]
            context_switches: AtomicU32::new(0),
            #[cfg(feature = "stats")]
            idle_ticks: AtomicU32::new(0),
        }
    }

    fn reset(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.sched_lock_nesting.store(0, Ordering::SeqCst);
        self.tick_counter.store(0, Ordering::SeqCst);
        #[cfg(feature = "stats")]
        {
            self.context_switches.store(0, Ordering::SeqCst);
            self.idle_ticks.store(0, Ordering::SeqCst);
        }
    }

    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Current tick count
    #[inline(always)]
    pub fn tick_get(&self) -> OsTick {
        self.tick_counter.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn sched_lock_nesting(&self) -> OsNestingCtr {
        self.sched_lock_nesting.load(Ordering::SeqCst)
    }

    #[inline(always)]
    pub(crate) fn tick_increment(&self) -> OsTick {
        self.tick_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    #[inline(always)]
    pub(crate) fn set_initialized(&self, val: bool) {
        self.initialized.store(val, Ordering::SeqCst);
    }

    #[inline(always)]
    pub(crate) fn set_running(&self, val: bool) {
        self.running.store(val, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn set_tick(&self, tick: OsTick) {
        self.tick_counter.store(tick, Ordering::SeqCst);
    }

    pub(crate) fn try_sched_lock(&self) -> OsResult<()> {
        let nesting = self.sched_lock_nesting.load(Ordering::SeqCst);
        if nesting == OsNestingCtr::MAX {
            return Err(OsError::LockNestingOvf);
        }
        self.sched_lock_nesting.store(nesting + 1, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn try_sched_unlock(&self) -> OsResult<OsNestingCtr> {
        let nesting = self.sched_lock_nesting.load(Ordering::SeqCst);
        if nesting == 0 {
            return Err(OsError::SchedNotLocked);
        }
        self.sched_lock_nesting.store(nesting - 1, Ordering::SeqCst);
        Ok(nesting - 1)
    }

    #[cfg(feature = "stats")]
    #[inline(always)]
    pub(crate) fn ctx_sw_increment(&self) {
        self.context_switches.fetch_add(1, Ordering::Relaxed);
    }

    #[cfg(feature = "stats")]
    #[inline(always)]
    pub(crate) fn idle_tick_increment(&self) {
        self.idle_ticks.fetch_add(1, Ordering::Relaxed);
    }
}

/// Global kernel flags instance
pub(crate) static KERNEL: KernelFlags = KernelFlags::new();

// ============ Queue state ============

/// Ready queues, delay queue and timer list, all guarded by the global
/// critical section
pub struct KernelState {
    pub(crate) prio_tbl: PrioBitmap,
    pub(crate) rdy_list: [ReadyList; CFG_PRIO_MAX],
    pub(crate) delay_list: DelayList,
    #[cfg(feature = "timer")]
    pub(crate) timer_list: TimerList,
}

impl KernelState {
    const fn new() -> Self {
        Self {
            prio_tbl: PrioBitmap::new(),
            rdy_list: [const { ReadyList::new() }; CFG_PRIO_MAX],
            delay_list: DelayList::new(),
            #[cfg(feature = "timer")]
            timer_list: TimerList::new(),
        }
    }

    fn reset(&mut self) {
        self.prio_tbl.init();
        for list in self.rdy_list.iter_mut() {
            list.init();
        }
        self.delay_list.init();
        #[cfg(feature = "timer")]
        self.timer_list.init();
    }
}

/// Global queue state instance
pub(crate) static STATE: CsCell<KernelState> = CsCell::new(KernelState::new());

// ============ CPU state ============

/// Per-CPU scheduling state read by the context switch exception
#[repr(C)]
pub struct CpuState {
    /// Currently running task's TCB, null before the scheduler starts
    pub tcb_cur: *mut OsTcb,
}

/// Global CPU state instance
#[no_mangle]
#[used]
pub static mut CPU_STATE: CpuState = CpuState {
    tcb_cur: core::ptr::null_mut(),
};

// ============ Idle task ============

static mut IDLE_TCB: OsTcb = OsTcb::new();
static mut IDLE_STK: [OsStkElement; CFG_IDLE_STK_SIZE] = [0; CFG_IDLE_STK_SIZE];

fn os_idle_task(_: *mut ()) {
    loop {
        #[cfg(target_arch = "arm")]
        cortex_m::asm::wfi();
        #[cfg(not(target_arch = "arm"))]
        core::hint::spin_loop();
    }
}

// ============ Public API ============

/// Initialize the kernel
///
/// Must be called before any other kernel function. Resets all kernel
/// state and creates the idle task at the lowest priority.
pub fn os_init() -> OsResult<()> {
    if KERNEL.is_running() {
        return Err(OsError::OsRunning);
    }

    KERNEL.reset();

    critical_section(|cs| {
        STATE.get(cs).reset();
        unsafe { CPU_STATE.tcb_cur = core::ptr::null_mut() };

        unsafe {
            crate::task::os_task_create_internal(
                &raw mut IDLE_TCB,
                "Idle",
                os_idle_task,
                core::ptr::null_mut(),
                CFG_PRIO_IDLE,
                (&raw mut IDLE_STK).cast::<OsStkElement>(),
                CFG_IDLE_STK_SIZE,
            )?;
        }

        KERNEL.set_initialized(true);
        Ok(())
    })
}

/// Start multitasking
///
/// Selects the highest-priority ready task, starts the tick source and
/// switches into the first task. On success this function does not
/// return; at least one application task should exist beforehand or
/// only the idle task will run.
pub fn os_start() -> OsResult<()> {
    if !KERNEL.is_initialized() {
        return Err(OsError::OsNotInit);
    }
    if KERNEL.is_running() {
        return Err(OsError::OsRunning);
    }

    critical_section(|cs| -> OsResult<()> {
        let state = STATE.get(cs);

        let prio = state.prio_tbl.highest().ok_or(OsError::OsNotInit)?;
        let first = state.rdy_list[prio as usize]
            .head()
            .ok_or(OsError::OsNotInit)?;

        unsafe {
            crate::sched::rdy_remove(first);
            let tcb = &mut *first.as_ptr();
            tcb.state = crate::types::OsTaskState::Running;
            #[cfg(feature = "stats")]
            {
                tcb.run_count += 1;
            }
            CPU_STATE.tcb_cur = first.as_ptr();
        }

        KERNEL.set_running(true);
        Ok(())
    })?;

    crate::info!("kestrel: scheduler starting");

    crate::port::os_systick_init(crate::config::CFG_CPU_CLOCK_HZ / crate::config::CFG_TICK_RATE_HZ);

    unsafe { crate::port::os_start_first_task() }
}

/// Check whether the scheduler has been started
#[inline]
pub fn os_is_running() -> bool {
    KERNEL.is_running()
}

/// Lock the scheduler; the tick keeps running but no context switches
/// are pended until the matching unlock
pub fn os_sched_lock() -> OsResult<()> {
    if !KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }
    if crate::critical::is_isr_context() {
        return Err(OsError::StateInvalid);
    }

    critical_section(|_cs| KERNEL.try_sched_lock())
}

/// Unlock the scheduler; reschedules when the nesting count reaches
/// zero
pub fn os_sched_unlock() -> OsResult<()> {
    if !KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }

    let remaining = critical_section(|_cs| KERNEL.try_sched_unlock())?;
    if remaining == 0 {
        crate::sched::os_sched();
    }
    Ok(())
}

// ============ Statistics ============

/// Total context switches since the scheduler started
#[cfg(feature = "stats")]
pub fn os_stats_context_switches() -> u32 {
    KERNEL.context_switches.load(Ordering::Relaxed)
}

/// Ticks during which the idle task was current
#[cfg(feature = "stats")]
pub fn os_stats_idle_ticks() -> u32 {
    KERNEL.idle_ticks.load(Ordering::Relaxed)
}

/// Number of times a task has been selected to run
#[cfg(feature = "stats")]
pub fn os_stats_task_runs(tcb: &OsTcb) -> u32 {
    tcb.run_count
}

// ============ Internal accessors ============

/// # Safety
/// Caller must hold the critical section.
#[inline(always)]
pub(crate) unsafe fn prio_table() -> &'static mut PrioBitmap {
    unsafe { &mut STATE.get_unchecked().prio_tbl }
}

/// # Safety
/// Caller must hold the critical section.
#[inline(always)]
pub(crate) unsafe fn rdy_list(prio: crate::types::OsPrio) -> &'static mut ReadyList {
    unsafe { &mut STATE.get_unchecked().rdy_list[prio as usize] }
}

/// # Safety
/// Caller must hold the critical section.
#[inline(always)]
pub(crate) unsafe fn delay_list() -> &'static mut DelayList {
    unsafe { &mut STATE.get_unchecked().delay_list }
}

/// # Safety
/// Caller must hold the critical section.
#[cfg(feature = "timer")]
#[inline(always)]
pub(crate) unsafe fn timer_list() -> &'static mut TimerList {
    unsafe { &mut STATE.get_unchecked().timer_list }
}

/// Current task pointer
#[inline]
pub(crate) unsafe fn tcb_cur_ptr() -> Option<NonNull<OsTcb>> {
    NonNull::new(unsafe { CPU_STATE.tcb_cur })
}

/// # Safety
/// Caller must hold the critical section or run in the context switch
/// exception.
#[inline]
pub(crate) unsafe fn set_tcb_cur(tcb: Option<NonNull<OsTcb>>) {
    unsafe { CPU_STATE.tcb_cur = tcb.map_or(core::ptr::null_mut(), |p| p.as_ptr()) };
}

/// Idle task TCB address, for tick attribution
#[inline]
pub(crate) fn idle_tcb_ptr() -> *const OsTcb {
    &raw const IDLE_TCB
}
