//! Task management
//!
//! Task creation, yield, suspend/resume and stack supervision. Delay
//! services live in [`crate::time`]; the blocking paths of the sync
//! primitives live with their objects under [`crate::sync`].

mod tcb;

pub use tcb::OsTcb;

use core::ptr::NonNull;

use crate::config::{CFG_PRIO_MAX, CFG_STK_SIZE_MIN};
use crate::critical::{is_isr_context, CriticalSection};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::types::{OsPrio, OsStkElement, OsTaskState};

/// Task entry point function type
///
/// Returning from the entry function is a programming error; the
/// synthetic stack frame routes such a return into a terminal handler
/// that suspends the task.
pub type OsTaskFn = fn(*mut ());

/// Word written over the whole stack at creation for overflow and
/// high-water-mark detection
#[cfg(feature = "stack-check")]
pub const STACK_SENTINEL: OsStkElement = 0xDEAD_BEEF;

unsafe fn os_task_create_raw(
    tcb: *mut OsTcb,
    name: &'static str,
    task_fn: OsTaskFn,
    arg: *mut (),
    prio: OsPrio,
    stk_base: *mut OsStkElement,
    stk_size: usize,
) -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::CreateIsr);
    }

    {
        let _cs = CriticalSection::enter();
        unsafe { os_task_create_internal(tcb, name, task_fn, arg, prio, stk_base, stk_size)? };
    }

    if kernel::KERNEL.is_running() {
        sched::os_sched();
    }

    Ok(())
}

/// Create a new task from caller-owned storage
///
/// The TCB and stack remain owned by the caller for the lifetime of
/// the kernel; the kernel only links them. The task becomes ready
/// immediately and preempts the caller if it has a strictly higher
/// priority and the scheduler is running.
///
/// # Example
/// ```ignore
/// static mut WORKER_TCB: OsTcb = OsTcb::new();
/// static mut WORKER_STK: [OsStkElement; 256] = [0; 256];
///
/// fn worker(_: *mut ()) {
///     loop { /* ... */ }
/// }
///
/// os_task_create(
///     unsafe { &mut *(&raw mut WORKER_TCB) },
///     unsafe { &mut *(&raw mut WORKER_STK) },
///     "Worker",
///     worker,
///     5,
/// ).expect("task creation failed");
/// ```
pub fn os_task_create(
    tcb: &'static mut OsTcb,
    stack: &'static mut [OsStkElement],
    name: &'static str,
    task_fn: OsTaskFn,
    prio: OsPrio,
) -> OsResult<()> {
    unsafe {
        os_task_create_raw(
            tcb,
            name,
            task_fn,
            core::ptr::null_mut(),
            prio,
            stack.as_mut_ptr(),
            stack.len(),
        )
    }
}

/// Like [`os_task_create`], passing `arg` to the entry function in its
/// first argument register
pub fn os_task_create_with_arg(
    tcb: &'static mut OsTcb,
    stack: &'static mut [OsStkElement],
    name: &'static str,
    task_fn: OsTaskFn,
    arg: *mut (),
    prio: OsPrio,
) -> OsResult<()> {
    unsafe { os_task_create_raw(tcb, name, task_fn, arg, prio, stack.as_mut_ptr(), stack.len()) }
}

/// Kernel-internal task creation; no ISR check, no reschedule
pub(crate) unsafe fn os_task_create_internal(
    tcb: *mut OsTcb,
    name: &'static str,
    task_fn: OsTaskFn,
    arg: *mut (),
    prio: OsPrio,
    stk_base: *mut OsStkElement,
    stk_size: usize,
) -> OsResult<()> {
    if tcb.is_null() {
        return Err(OsError::TcbInvalid);
    }
    if stk_base.is_null() {
        return Err(OsError::StkInvalid);
    }
    if stk_size < CFG_STK_SIZE_MIN {
        return Err(OsError::StkSizeInvalid);
    }
    if prio as usize >= CFG_PRIO_MAX {
        return Err(OsError::PrioInvalid);
    }

    let tcb_ref = unsafe { &mut *tcb };
    tcb_ref.init();

    tcb_ref.name = name;
    tcb_ref.prio = prio;
    tcb_ref.base_prio = prio;

    #[cfg(feature = "stack-check")]
    for i in 0..stk_size {
        unsafe { stk_base.add(i).write(STACK_SENTINEL) };
    }

    tcb_ref.stk_base = stk_base;
    tcb_ref.stk_size = stk_size;
    tcb_ref.stk_ptr = unsafe { crate::port::os_task_stk_init(task_fn, arg, stk_base, stk_size) };

    unsafe { sched::rdy_insert(NonNull::new_unchecked(tcb)) };

    Ok(())
}

/// Give up the CPU voluntarily
///
/// Pends a context switch; the scheduler requeues the caller at the
/// tail of its priority and may reselect it immediately if no peer of
/// equal or higher priority is ready.
pub fn os_task_yield() -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }
    if is_isr_context() {
        return Err(OsError::YieldIsr);
    }
    if kernel::KERNEL.sched_lock_nesting() > 0 {
        return Err(OsError::SchedLocked);
    }

    crate::port::os_ctx_sw();
    Ok(())
}

/// Suspend a task (`None` = current task)
///
/// A ready task is unlinked from its ready queue, a plain-delayed task
/// from the delay queue. Suspending a task blocked on a sync object is
/// rejected: it would strand the task on the object's waiter queue.
pub fn os_task_suspend(tcb: Option<NonNull<OsTcb>>) -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::SuspendIsr);
    }

    let is_self;
    {
        let _cs = CriticalSection::enter();

        let target = match tcb {
            Some(ptr) => ptr,
            None => unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?,
        };

        if target.as_ptr().cast_const() == kernel::idle_tcb_ptr() {
            return Err(OsError::TaskIdle);
        }

        let t = unsafe { &mut *target.as_ptr() };
        match t.state {
            OsTaskState::Suspended => return Err(OsError::TaskSuspended),
            OsTaskState::Ready => unsafe { sched::rdy_remove(target) },
            OsTaskState::Running => {}
            OsTaskState::Blocked => {
                if !t.wait_obj.is_null() {
                    return Err(OsError::TaskBlocked);
                }
                unsafe { crate::time::delay_cancel(target) };
            }
        }
        t.state = OsTaskState::Suspended;

        is_self = unsafe { kernel::tcb_cur_ptr() } == Some(target);
    }

    if is_self && kernel::KERNEL.is_running() {
        crate::port::os_ctx_sw();
    }

    Ok(())
}

/// Resume a suspended task
///
/// Only valid on a `Suspended` task; any wait or timeout in effect
/// before the suspension is not re-armed.
pub fn os_task_resume(tcb: NonNull<OsTcb>) -> OsResult<()> {
    let preempt;
    {
        let _cs = CriticalSection::enter();

        let t = unsafe { &mut *tcb.as_ptr() };
        if t.state != OsTaskState::Suspended {
            return Err(OsError::TaskNotSuspended);
        }

        unsafe { sched::rdy_insert(tcb) };
        preempt = kernel::KERNEL.is_running() && unsafe { sched::preempts_current(tcb) };
    }

    if preempt {
        crate::port::os_ctx_sw();
    }

    Ok(())
}

/// Currently running task, if the scheduler has started
pub fn os_task_current() -> Option<NonNull<OsTcb>> {
    unsafe { kernel::tcb_cur_ptr() }
}

/// Task debug name (`None` = current task)
pub fn os_task_name(tcb: Option<NonNull<OsTcb>>) -> &'static str {
    let target = tcb.or_else(|| unsafe { kernel::tcb_cur_ptr() });
    match target {
        Some(ptr) => unsafe { ptr.as_ref().name },
        None => "",
    }
}

/// Current (possibly boosted) task priority (`None` = current task)
pub fn os_task_priority(tcb: Option<NonNull<OsTcb>>) -> Option<OsPrio> {
    let target = tcb.or_else(|| unsafe { kernel::tcb_cur_ptr() })?;
    Some(unsafe { target.as_ref().prio })
}

/// Bytes of stack never touched since creation, counted from the low
/// end of the stack buffer
#[cfg(feature = "stack-check")]
pub fn os_task_stack_unused(tcb: &OsTcb) -> usize {
    if tcb.stk_base.is_null() {
        return 0;
    }

    let mut unused = 0;
    for i in 0..tcb.stk_size {
        if unsafe { tcb.stk_base.add(i).read() } != STACK_SENTINEL {
            break;
        }
        unused += 1;
    }

    unused * core::mem::size_of::<OsStkElement>()
}

/// Whether the lowest stack word has been overwritten
#[cfg(feature = "stack-check")]
pub fn os_task_stack_overflow(tcb: &OsTcb) -> bool {
    if tcb.stk_base.is_null() {
        return false;
    }
    (unsafe { tcb.stk_base.read() }) != STACK_SENTINEL
}
