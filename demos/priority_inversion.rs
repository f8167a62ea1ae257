//! Priority inversion demo - mutex priority inheritance
//!
//! Low (prio 3) holds the mutex for a long stretch, Mid (prio 2) is
//! CPU-bound, High (prio 1) contends for the mutex. With inheritance
//! enabled Low runs at priority 1 while High waits, so Mid cannot
//! starve the lock holder.

#![no_std]
#![no_main]
#![allow(static_mut_refs)]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use kestrel::sync::mutex::Mutex;
use kestrel::task::OsTcb;
use kestrel::types::OsStkElement;
use kestrel::{info, os_task_create, os_time_dly_ms, WAIT_FOREVER};

static HIGH_RUNS: AtomicU32 = AtomicU32::new(0);
static LOW_RUNS: AtomicU32 = AtomicU32::new(0);

static MTX: Mutex = Mutex::new();

static mut HIGH_STK: [OsStkElement; 256] = [0; 256];
static mut HIGH_TCB: OsTcb = OsTcb::new();
static mut MID_STK: [OsStkElement; 256] = [0; 256];
static mut MID_TCB: OsTcb = OsTcb::new();
static mut LOW_STK: [OsStkElement; 256] = [0; 256];
static mut LOW_TCB: OsTcb = OsTcb::new();

/// High priority task (prio 1)
fn high_task(_: *mut ()) {
    let _ = os_time_dly_ms(50);

    loop {
        let n = HIGH_RUNS.fetch_add(1, Ordering::Relaxed) + 1;

        let _ = MTX.lock(WAIT_FOREVER);
        info!("[HIGH] acquired #{}", n);
        for _ in 0..1_000 {
            cortex_m::asm::nop();
        }
        let _ = MTX.unlock();

        let _ = os_time_dly_ms(100);
    }
}

/// Medium priority task (prio 2) - CPU bound
fn mid_task(_: *mut ()) {
    loop {
        for _ in 0..50_000 {
            cortex_m::asm::nop();
        }
        let _ = os_time_dly_ms(10);
    }
}

/// Low priority task (prio 3) - holds the mutex for a long time
fn low_task(_: *mut ()) {
    loop {
        let n = LOW_RUNS.fetch_add(1, Ordering::Relaxed) + 1;

        let _ = MTX.lock(WAIT_FOREVER);
        info!("[LOW] holding #{}", n);
        for _ in 0..100_000 {
            cortex_m::asm::nop();
        }
        let _ = MTX.unlock();

        let _ = os_time_dly_ms(200);
    }
}

#[entry]
fn main() -> ! {
    info!("priority inversion demo: H(1) M(2) L(3)");

    kestrel::os_init().expect("OS init failed");

    unsafe {
        os_task_create(&mut LOW_TCB, &mut LOW_STK, "Low", low_task, 3).unwrap();
        os_task_create(&mut MID_TCB, &mut MID_STK, "Mid", mid_task, 2).unwrap();
        os_task_create(&mut HIGH_TCB, &mut HIGH_STK, "High", high_task, 1).unwrap();
    }

    kestrel::os_start().expect("OS start failed");

    loop {
        cortex_m::asm::wfi();
    }
}
