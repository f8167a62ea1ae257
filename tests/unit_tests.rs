//! Host-run tests against the public API
//!
//! Exercises the crate the way application code sees it; the
//! kernel-state machine itself is covered by the in-module tests.

mod prio_tests {
    use kestrel::config::CFG_PRIO_MAX;
    use kestrel::prio::PrioBitmap;

    #[test]
    fn empty_bitmap_has_no_highest() {
        let map = PrioBitmap::new();
        assert!(map.is_empty());
        assert_eq!(map.highest(), None);
    }

    #[test]
    fn highest_tracks_insert_and_remove() {
        let mut map = PrioBitmap::new();

        map.insert(20);
        map.insert(5);
        map.insert(10);
        assert_eq!(map.highest(), Some(5));

        map.remove(5);
        assert_eq!(map.highest(), Some(10));

        map.remove(10);
        map.remove(20);
        assert!(map.is_empty());
    }

    #[test]
    fn full_range_round_trip() {
        let mut map = PrioBitmap::new();
        for p in 0..CFG_PRIO_MAX {
            map.insert(p as u8);
        }
        for p in 0..CFG_PRIO_MAX {
            assert_eq!(map.highest(), Some(p as u8));
            map.remove(p as u8);
        }
        assert!(map.is_empty());
    }
}

mod error_tests {
    use kestrel::OsError;

    #[test]
    fn taxonomy_is_distinguishable() {
        assert_ne!(OsError::Timeout, OsError::WouldBlock);
        assert_ne!(OsError::WouldBlock, OsError::MutexNotOwner);
        assert_eq!(OsError::Timeout, OsError::Timeout);
    }

    #[test]
    fn errors_are_debug_formattable() {
        let err = OsError::PendIsr;
        let _ = format!("{:?}", err);
    }
}

mod config_tests {
    use kestrel::config::*;

    #[test]
    fn config_values_are_sane() {
        assert!(CFG_PRIO_MAX >= 4, "need at least 4 priority levels");
        assert!(CFG_PRIO_MAX <= 32, "bitmap is one 32-bit word");
        assert_eq!(CFG_PRIO_IDLE, (CFG_PRIO_MAX - 1) as u8);

        assert!(CFG_STK_SIZE_MIN >= 32, "stack minimum too small");
        assert!(CFG_TICK_RATE_HZ >= 10 && CFG_TICK_RATE_HZ <= 10_000);

        assert_eq!(NO_WAIT, 0);
        assert_eq!(WAIT_FOREVER, 0xFFFF_FFFF);
    }
}

mod types_tests {
    use kestrel::OsTaskState;

    #[test]
    fn task_states_are_distinct() {
        assert_ne!(OsTaskState::Ready, OsTaskState::Running);
        assert_ne!(OsTaskState::Blocked, OsTaskState::Suspended);
    }
}

mod sync_api_tests {
    use kestrel::{OsError, Queue, Semaphore, NO_WAIT};

    #[test]
    fn semaphore_poll_round_trip() {
        let sem = Semaphore::new(1, 1);
        sem.try_wait().unwrap();
        assert_eq!(sem.try_wait(), Err(OsError::WouldBlock));
        sem.post().unwrap();
        assert_eq!(sem.count(), 1);
    }

    #[test]
    fn queue_boundary_through_public_api() {
        static QUEUE: Queue = Queue::new();
        static mut QUEUE_BUF: [u8; 8] = [0; 8];

        QUEUE
            .create(unsafe { &mut *(&raw mut QUEUE_BUF) }, 4, 2)
            .unwrap();

        QUEUE.send(&1u32.to_le_bytes(), NO_WAIT).unwrap();
        QUEUE.send(&2u32.to_le_bytes(), NO_WAIT).unwrap();
        assert!(QUEUE.is_full());
        assert_eq!(
            QUEUE.send(&3u32.to_le_bytes(), NO_WAIT),
            Err(OsError::WouldBlock)
        );

        let mut out = [0u8; 4];
        QUEUE.recv(&mut out, NO_WAIT).unwrap();
        assert_eq!(u32::from_le_bytes(out), 1);
        QUEUE.recv(&mut out, NO_WAIT).unwrap();
        assert_eq!(u32::from_le_bytes(out), 2);
        assert!(QUEUE.is_empty());
        assert_eq!(QUEUE.recv(&mut out, NO_WAIT), Err(OsError::WouldBlock));
    }

    #[test]
    fn queue_rejects_wrong_element_size() {
        static QUEUE: Queue = Queue::new();
        static mut QUEUE_BUF: [u8; 8] = [0; 8];

        QUEUE
            .create(unsafe { &mut *(&raw mut QUEUE_BUF) }, 4, 2)
            .unwrap();
        assert_eq!(
            QUEUE.send(&1u16.to_le_bytes(), NO_WAIT),
            Err(OsError::SizeInvalid)
        );
    }
}

mod kernel_api_tests {
    use kestrel::*;
    use std::sync::Mutex;

    // These tests touch the process-wide kernel singleton.
    static GLOBAL_LOCK: Mutex<()> = Mutex::new(());

    fn idle_forever(_: *mut ()) {
        loop {
            std::thread::yield_now();
        }
    }

    #[test]
    fn create_suspend_resume_through_public_api() {
        let _guard = GLOBAL_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        static mut WORKER_TCB: OsTcb = OsTcb::new();
        static mut WORKER_STK: [OsStkElement; 128] = [0; 128];

        os_init().unwrap();
        assert!(!os_is_running());
        assert_eq!(os_time_get(), 0);

        os_task_create(
            unsafe { &mut *(&raw mut WORKER_TCB) },
            unsafe { &mut *(&raw mut WORKER_STK) },
            "Worker",
            idle_forever,
            4,
        )
        .unwrap();

        let worker = core::ptr::NonNull::new(&raw mut WORKER_TCB).unwrap();
        assert_eq!(os_task_name(Some(worker)), "Worker");
        assert_eq!(os_task_priority(Some(worker)), Some(4));

        os_task_suspend(Some(worker)).unwrap();
        assert_eq!(os_task_suspend(Some(worker)), Err(OsError::TaskSuspended));
        os_task_resume(worker).unwrap();
        assert_eq!(os_task_resume(worker), Err(OsError::TaskNotSuspended));

        #[cfg(feature = "stack-check")]
        {
            let worker_ref = unsafe { worker.as_ref() };
            assert!(!os_task_stack_overflow(worker_ref));
            assert!(os_task_stack_unused(worker_ref) > 0);
        }
    }

    #[test]
    fn blocking_calls_require_a_running_scheduler() {
        let _guard = GLOBAL_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        os_init().unwrap();
        assert_eq!(os_time_dly(5), Err(OsError::OsNotRunning));
        assert_eq!(os_task_yield(), Err(OsError::OsNotRunning));
    }
}
