//! Kestrel - a small preemptive RTOS kernel for ARM Cortex-M4
//!
//! A real-time kernel multiplexing a fixed set of tasks onto one CPU:
//! - Priority-based preemptive scheduling with O(1) selection
//! - Blocking synchronization with bounded priority inversion
//!   (semaphores, recursive mutexes with priority inheritance,
//!   bounded message queues)
//! - Tick-driven delays and soft timers
//! - Context switching through a pended low-priority exception
//!
//! The kernel allocates nothing: TCBs, stacks, sync objects and queue
//! buffers are caller-owned and only linked by the kernel.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(test)]
extern crate std;

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;
mod lang_items;

pub mod config;
pub mod critical;
pub mod cs_cell;
pub mod error;
pub mod kernel;
pub mod port;
pub mod prio;
pub mod sched;
pub mod sync;
pub mod task;
pub mod time;
pub mod types;

#[cfg(feature = "timer")]
pub mod timer;

// ============ Re-exports ============

pub use config::{NO_WAIT, WAIT_FOREVER};
pub use error::{OsError, OsResult};
pub use kernel::{os_init, os_is_running, os_sched_lock, os_sched_unlock, os_start};
pub use task::{
    os_task_create, os_task_create_with_arg, os_task_current, os_task_name, os_task_priority,
    os_task_resume, os_task_suspend, os_task_yield, OsTaskFn, OsTcb,
};
pub use time::{
    os_ms_to_ticks, os_time_dly, os_time_dly_hmsm, os_time_dly_ms, os_time_dly_resume,
    os_time_dly_until, os_time_get,
};
pub use types::{OsPrio, OsSemCtr, OsStkElement, OsTaskState, OsTick};

#[cfg(feature = "stats")]
pub use kernel::{os_stats_context_switches, os_stats_idle_ticks, os_stats_task_runs};

#[cfg(feature = "stack-check")]
pub use task::{os_task_stack_overflow, os_task_stack_unused};

#[cfg(feature = "sem")]
pub use sync::sem::{OsSem, Semaphore};

#[cfg(feature = "mutex")]
pub use sync::mutex::{Mutex, OsMutex};

#[cfg(feature = "queue")]
pub use sync::queue::{OsQueue, Queue};

#[cfg(feature = "timer")]
pub use timer::{OsTimer, OsTimerFn, Timer};

#[cfg(all(feature = "pac", target_arch = "arm"))]
pub use stm32_metapac as pac;

// ============ Test support ============
