//! Cortex-M4 port
//!
//! Context switching runs in the PendSV exception at the lowest
//! exception priority, so any other interrupt may preempt it and a
//! pended switch only happens once no other handler is active. SysTick
//! shares that lowest priority to rule out tick re-entry during a
//! switch.

use core::arch::{asm, naked_asm};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;

use crate::kernel::CPU_STATE;
use crate::task::OsTaskFn;
use crate::types::OsStkElement;

/// Dedicated MSP stack for exception handlers
#[no_mangle]
static mut INTERRUPT_STACK: [u64; 256] = [0; 256];

/// Configure SysTick to fire at the kernel tick rate
///
/// `reload` is the number of core clock cycles per tick.
pub fn os_systick_init(reload: u32) {
    let mut p = unsafe { cortex_m::Peripherals::steal() };

    p.SYST.set_reload(reload - 1);
    p.SYST.clear_current();
    p.SYST.set_clock_source(SystClkSource::Core);
    p.SYST.enable_interrupt();
    p.SYST.enable_counter();
}

/// Pend the context switch exception from task level
#[inline(always)]
pub fn os_ctx_sw() {
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Pend the context switch exception from interrupt level
#[inline(always)]
pub fn os_int_ctx_sw() {
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Synthetic stack frame written at task creation
///
/// Matches what PendSV saves and restores: the software-saved R4-R11
/// block below the hardware exception frame. The first restore of this
/// frame drops the task into its entry function with `arg` in R0, the
/// terminal handler in LR and the Thumb bit set in xPSR.
#[repr(C, align(4))]
struct InitStk {
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}

const INIT_FRAME_WORDS: usize = 16;

/// xPSR with only the Thumb bit set
const XPSR_INIT: u32 = 0x0100_0000;

/// EXC_RETURN: Thread mode, process stack, no FP state
const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// Build the initial frame at the top of a task stack
///
/// # Safety
/// `stk_base` must point to at least `stk_size` writable words.
pub unsafe fn os_task_stk_init(
    task_fn: OsTaskFn,
    arg: *mut (),
    stk_base: *mut OsStkElement,
    stk_size: usize,
) -> *mut OsStkElement {
    unsafe {
        let stk_top = stk_base.add(stk_size);
        let stk_aligned = ((stk_top as usize) & !7) as *mut u32;

        let frame_ptr = stk_aligned.sub(INIT_FRAME_WORDS) as *mut InitStk;

        (*frame_ptr) = InitStk {
            r4: 0x0404_0404,
            r5: 0x0505_0505,
            r6: 0x0606_0606,
            r7: 0x0707_0707,
            r8: 0x0808_0808,
            r9: 0x0909_0909,
            r10: 0x1010_1010,
            r11: 0x1111_1111,
            r0: arg as u32,
            r1: 0x0101_0101,
            r2: 0x0202_0202,
            r3: 0x0303_0303,
            r12: 0x1212_1212,
            lr: os_task_exit as usize as u32,
            pc: (task_fn as usize as u32) | 1,
            xpsr: XPSR_INIT,
        };

        frame_ptr as *mut OsStkElement
    }
}

/// Terminal handler entered when a task function returns
///
/// Returning from a task is a programming error. The task is suspended
/// and, should that ever fall through, the CPU parks with interrupts
/// enabled.
fn os_task_exit() -> ! {
    cortex_m::interrupt::disable();
    let _ = crate::task::os_task_suspend(None);
    unsafe { cortex_m::interrupt::enable() };

    loop {
        cortex_m::asm::wfi();
    }
}

/// Switch into the first selected task; called once from `os_start`
///
/// Moves MSP to the dedicated interrupt stack, clears PSP so the first
/// PendSV skips the save phase, and pends the switch. Never returns:
/// the exception return lands in the first task.
///
/// # Safety
/// The scheduler must have selected a current task and interrupts must
/// be configurable (thread mode, privileged).
#[no_mangle]
pub unsafe extern "C" fn os_start_first_task() -> ! {
    unsafe {
        let mut p = cortex_m::Peripherals::steal();

        // PendSV and SysTick at the lowest exception priority.
        p.SCB.set_priority(SystemHandler::PendSV, 0xF0);
        p.SCB.set_priority(SystemHandler::SysTick, 0xF0);

        let msp_top =
            (&raw const INTERRUPT_STACK) as u32 + core::mem::size_of::<[u64; 256]>() as u32;

        asm!("msr msp, {0}", in(reg) msp_top);
        asm!("msr psp, {0}", in(reg) 0);

        cortex_m::interrupt::enable();
        cortex_m::peripheral::SCB::set_pendsv();
    }

    loop {
        cortex_m::asm::wfi();
    }
}

/// Save the outgoing stack pointer, run task selection, return the
/// incoming stack pointer; called from PendSV only
#[inline(never)]
#[no_mangle]
unsafe extern "C" fn pendsv_switch_context(cur_sp: *mut u32) -> *mut u32 {
    unsafe {
        let cur = CPU_STATE.tcb_cur;
        if !cur.is_null() && !cur_sp.is_null() {
            (*cur).stk_ptr = cur_sp;
        }

        crate::sched::switch_context();

        let next = CPU_STATE.tcb_cur;
        if next.is_null() {
            core::ptr::null_mut()
        } else {
            (*next).stk_ptr
        }
    }
}

/// PendSV exception handler - the context switch
///
/// 1. Save R4-R11 onto the outgoing task's process stack (skipped on
///    the first switch, when PSP is still zero).
/// 2. Store the resulting stack pointer, select the next task, load
///    its stack pointer.
/// 3. Restore R4-R11 and return to Thread mode on PSP; the hardware
///    pops the exception frame and resumes the task.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "cpsid i",
        "mrs r0, psp",
        "cbz r0, 1f",
        "stmdb r0!, {{r4-r11}}",
        "1:",
        "bl pendsv_switch_context",
        "cbz r0, 2f",
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        "2:",
        "dsb",
        "isb",
        "cpsie i",
        "ldr lr, ={exc_return}",
        "bx lr",
        exc_return = const EXC_RETURN_THREAD_PSP,
    );
}
