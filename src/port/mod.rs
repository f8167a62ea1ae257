//! Port layer - CPU-specific primitives
//!
//! The scheduler consumes a narrow interface from the port: build a
//! synthetic stack frame, pend the context switch exception, start the
//! tick source, and perform the one-shot switch into the first task.

#[cfg(target_arch = "arm")]
pub mod cortex_m4;

#[cfg(target_arch = "arm")]
pub use cortex_m4::*;

// Stub implementations so the kernel's data structures and state
// machine can be exercised on the host.
#[cfg(not(target_arch = "arm"))]
pub mod stub {
    use crate::task::OsTaskFn;
    use crate::types::OsStkElement;

    /// No context switching on the host; blocking paths resolve
    /// through the wake-then-classify protocol instead.
    pub fn os_ctx_sw() {}

    pub fn os_int_ctx_sw() {}

    pub fn os_systick_init(_reload: u32) {}

    /// Write a placeholder frame at the stack top, as the real port
    /// would, and return the resulting stack pointer.
    ///
    /// # Safety
    /// `stk_base` must point to at least `stk_size` writable words.
    pub unsafe fn os_task_stk_init(
        _task_fn: OsTaskFn,
        _arg: *mut (),
        stk_base: *mut OsStkElement,
        stk_size: usize,
    ) -> *mut OsStkElement {
        let frame = unsafe { stk_base.add(stk_size.saturating_sub(16)) };
        for i in 0..16.min(stk_size) {
            unsafe { frame.add(i).write(0) };
        }
        frame
    }

    /// # Safety
    /// Never meaningful on the host.
    pub unsafe fn os_start_first_task() -> ! {
        unimplemented!("context switching is not available on this platform");
    }
}

#[cfg(not(target_arch = "arm"))]
pub use stub::*;
