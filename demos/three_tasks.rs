//! Three-task demo - periodic tasks, a shared queue and a heartbeat
//! timer
//!
//! T1 (prio 1) runs every 5 ms and feeds the current tick into a
//! queue; T2 (prio 2) runs every 20 ms; T3 (prio 3) drains the queue
//! in the background. A soft timer toggles the LED twice a second.

#![no_std]
#![no_main]
#![allow(static_mut_refs)]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use kestrel::pac;
use kestrel::sync::queue::Queue;
use kestrel::task::OsTcb;
use kestrel::timer::Timer;
use kestrel::types::OsStkElement;
use kestrel::{info, os_task_create, os_time_dly_until, os_time_get, NO_WAIT, WAIT_FOREVER};

const TASK_STACK_SIZE: usize = 256;

static T1_COUNT: AtomicU32 = AtomicU32::new(0);
static T2_COUNT: AtomicU32 = AtomicU32::new(0);
static T3_COUNT: AtomicU32 = AtomicU32::new(0);

static mut T1_STK: [OsStkElement; TASK_STACK_SIZE] = [0; TASK_STACK_SIZE];
static mut T1_TCB: OsTcb = OsTcb::new();
static mut T2_STK: [OsStkElement; TASK_STACK_SIZE] = [0; TASK_STACK_SIZE];
static mut T2_TCB: OsTcb = OsTcb::new();
static mut T3_STK: [OsStkElement; TASK_STACK_SIZE] = [0; TASK_STACK_SIZE];
static mut T3_TCB: OsTcb = OsTcb::new();

static TICK_QUEUE: Queue = Queue::new();
static mut TICK_QUEUE_BUF: [u8; 8 * 4] = [0; 8 * 4];

static HEARTBEAT: Timer = Timer::new();

// ============ LED on PA5 ============

fn led_init() {
    pac::RCC.ahb1enr().modify(|w| w.set_gpioaen(true));
    pac::GPIOA
        .moder()
        .modify(|w| w.set_moder(5, pac::gpio::vals::Moder::OUTPUT));
}

static LED_ON: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(false);

fn led_toggle() {
    if LED_ON.fetch_xor(true, Ordering::Relaxed) {
        pac::GPIOA.bsrr().write(|w| w.set_br(5, true));
    } else {
        pac::GPIOA.bsrr().write(|w| w.set_bs(5, true));
    }
}

fn heartbeat_cb(_: *mut ()) {
    led_toggle();
}

// ============ Tasks ============

fn t1_fast(_: *mut ()) {
    let mut last_wake = os_time_get();
    loop {
        let n = T1_COUNT.fetch_add(1, Ordering::Relaxed) + 1;

        let tick = os_time_get();
        let _ = TICK_QUEUE.send(&tick.to_le_bytes(), NO_WAIT);

        if n % 200 == 0 {
            info!("[T1] tick={} runs={}", tick, n);
        }

        last_wake = last_wake.wrapping_add(5);
        let _ = os_time_dly_until(last_wake);
    }
}

fn t2_slow(_: *mut ()) {
    let mut last_wake = os_time_get();
    loop {
        T2_COUNT.fetch_add(1, Ordering::Relaxed);

        for _ in 0..5_000 {
            cortex_m::asm::nop();
        }

        last_wake = last_wake.wrapping_add(20);
        let _ = os_time_dly_until(last_wake);
    }
}

fn t3_background(_: *mut ()) {
    let mut buf = [0u8; 4];
    loop {
        if TICK_QUEUE.recv(&mut buf, WAIT_FOREVER).is_ok() {
            let n = T3_COUNT.fetch_add(1, Ordering::Relaxed) + 1;
            if n % 500 == 0 {
                info!("[T3] drained {} ticks", n);
            }
        }
    }
}

#[entry]
fn main() -> ! {
    led_init();

    kestrel::os_init().expect("OS init failed");

    TICK_QUEUE
        .create(unsafe { &mut TICK_QUEUE_BUF }, 4, 8)
        .unwrap();

    unsafe {
        os_task_create(&mut T1_TCB, &mut T1_STK, "T1", t1_fast, 1).unwrap();
        os_task_create(&mut T2_TCB, &mut T2_STK, "T2", t2_slow, 2).unwrap();
        os_task_create(&mut T3_TCB, &mut T3_STK, "T3", t3_background, 3).unwrap();
    }

    HEARTBEAT
        .start(500, heartbeat_cb, core::ptr::null_mut())
        .unwrap();

    info!("three_tasks: starting");
    kestrel::os_start().expect("OS start failed");

    loop {
        cortex_m::asm::wfi();
    }
}
