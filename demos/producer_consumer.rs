//! Producer-consumer demo - message queue plus semaphore

#![no_std]
#![no_main]
#![allow(static_mut_refs)]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use kestrel::sync::queue::Queue;
use kestrel::sync::sem::Semaphore;
use kestrel::task::OsTcb;
use kestrel::types::OsStkElement;
use kestrel::{info, os_task_create, os_time_dly_ms, NO_WAIT, WAIT_FOREVER};

static PRODUCED: AtomicU32 = AtomicU32::new(0);
static CONSUMED: AtomicU32 = AtomicU32::new(0);

/// Signals the consumer that at least one item is queued.
static ITEMS: Semaphore = Semaphore::new(0, 8);

static WORK_QUEUE: Queue = Queue::new();
static mut WORK_QUEUE_BUF: [u8; 8 * 4] = [0; 8 * 4];

static mut PRODUCER_STK: [OsStkElement; 256] = [0; 256];
static mut PRODUCER_TCB: OsTcb = OsTcb::new();
static mut CONSUMER_STK: [OsStkElement; 256] = [0; 256];
static mut CONSUMER_TCB: OsTcb = OsTcb::new();

fn producer_task(_: *mut ()) {
    loop {
        let n = PRODUCED.fetch_add(1, Ordering::Relaxed) + 1;

        if WORK_QUEUE.send(&n.to_le_bytes(), NO_WAIT).is_ok() {
            let _ = ITEMS.post();
            info!("[P] produced #{}", n);
        } else {
            info!("[P] queue full, dropped #{}", n);
        }

        let _ = os_time_dly_ms(200);
    }
}

fn consumer_task(_: *mut ()) {
    let mut buf = [0u8; 4];
    loop {
        let _ = ITEMS.wait(WAIT_FOREVER);

        if WORK_QUEUE.recv(&mut buf, NO_WAIT).is_ok() {
            let n = CONSUMED.fetch_add(1, Ordering::Relaxed) + 1;
            info!("[C] consumed #{} (item {})", n, u32::from_le_bytes(buf));
        }

        for _ in 0..10_000 {
            cortex_m::asm::nop();
        }
    }
}

#[entry]
fn main() -> ! {
    info!("producer-consumer demo");

    kestrel::os_init().expect("OS init failed");

    WORK_QUEUE
        .create(unsafe { &mut WORK_QUEUE_BUF }, 4, 8)
        .unwrap();

    unsafe {
        os_task_create(&mut PRODUCER_TCB, &mut PRODUCER_STK, "P", producer_task, 3).unwrap();
        os_task_create(&mut CONSUMER_TCB, &mut CONSUMER_STK, "C", consumer_task, 2).unwrap();
    }

    kestrel::os_start().expect("OS start failed");

    loop {
        cortex_m::asm::wfi();
    }
}
