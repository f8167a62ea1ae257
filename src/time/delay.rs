//! Delay queue - blocked tasks sorted by absolute wake tick
//!
//! Uses the TCB's dedicated `tick_next_ptr`/`tick_prev_ptr` links, so a
//! task can sit here while also linked on a sync object's waiter queue
//! (blocking call with timeout). Ordering comparisons use signed
//! wrapping subtraction so the queue stays correct across 32-bit tick
//! counter wraparound.

use core::ptr::NonNull;

use crate::task::OsTcb;
use crate::types::OsTick;

/// `true` when `a` is at or after `b` in wraparound-aware tick order
#[inline]
pub(crate) fn tick_reached(a: OsTick, b: OsTick) -> bool {
    a.wrapping_sub(b) as i32 >= 0
}

/// Delay queue sorted ascending by `wake_tick`
pub struct DelayList {
    head: Option<NonNull<OsTcb>>,
    tail: Option<NonNull<OsTcb>>,
}

impl DelayList {
    pub const fn new() -> Self {
        DelayList {
            head: None,
            tail: None,
        }
    }

    pub fn init(&mut self) {
        self.head = None;
        self.tail = None;
    }

    #[inline]
    pub fn head(&self) -> Option<NonNull<OsTcb>> {
        self.head
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Insert at the position keeping the queue sorted by `wake_tick`;
    /// equal wake ticks keep insertion order.
    ///
    /// # Safety
    /// `tcb` must be valid, not already linked, and have a non-zero
    /// `wake_tick`.
    pub unsafe fn insert(&mut self, tcb: NonNull<OsTcb>) {
        let wake = unsafe { tcb.as_ref().wake_tick };

        let mut current = self.head;
        let mut prev: Option<NonNull<OsTcb>> = None;

        while let Some(cur_ptr) = current {
            let cur_ref = unsafe { cur_ptr.as_ref() };
            if !tick_reached(wake, cur_ref.wake_tick) {
                break;
            }
            prev = current;
            current = cur_ref.tick_next_ptr;
        }

        let tcb_ref = unsafe { &mut *tcb.as_ptr() };
        tcb_ref.tick_prev_ptr = prev;
        tcb_ref.tick_next_ptr = current;

        match prev {
            Some(p) => unsafe { (*p.as_ptr()).tick_next_ptr = Some(tcb) },
            None => self.head = Some(tcb),
        }

        match current {
            Some(c) => unsafe { (*c.as_ptr()).tick_prev_ptr = Some(tcb) },
            None => self.tail = Some(tcb),
        }
    }

    /// Unlink a TCB from the queue and clear its wake tick
    ///
    /// # Safety
    /// `tcb` must be valid and linked in this queue.
    pub unsafe fn remove(&mut self, tcb: NonNull<OsTcb>) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        match tcb_ref.tick_prev_ptr {
            Some(prev) => unsafe { (*prev.as_ptr()).tick_next_ptr = tcb_ref.tick_next_ptr },
            None => self.head = tcb_ref.tick_next_ptr,
        }

        match tcb_ref.tick_next_ptr {
            Some(next) => unsafe { (*next.as_ptr()).tick_prev_ptr = tcb_ref.tick_prev_ptr },
            None => self.tail = tcb_ref.tick_prev_ptr,
        }

        tcb_ref.tick_prev_ptr = None;
        tcb_ref.tick_next_ptr = None;
        tcb_ref.wake_tick = 0;
    }

    /// Pop the head if its wake tick has been reached at `now`
    pub fn pop_expired(&mut self, now: OsTick) -> Option<NonNull<OsTcb>> {
        let head = self.head?;
        if tick_reached(now, unsafe { head.as_ref().wake_tick }) {
            unsafe { self.remove(head) };
            Some(head)
        } else {
            None
        }
    }
}

impl Default for DelayList {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for DelayList {}
unsafe impl Sync for DelayList {}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcb_at(wake: OsTick) -> OsTcb {
        let mut t = OsTcb::new();
        t.wake_tick = wake;
        t
    }

    #[test]
    fn sorted_insertion() {
        let mut a = tcb_at(30);
        let mut b = tcb_at(10);
        let mut c = tcb_at(20);
        let (pa, pb, pc) = (
            NonNull::from(&mut a),
            NonNull::from(&mut b),
            NonNull::from(&mut c),
        );

        let mut list = DelayList::new();
        unsafe {
            list.insert(pa);
            list.insert(pb);
            list.insert(pc);
        }

        assert_eq!(list.pop_expired(30), Some(pb));
        assert_eq!(list.pop_expired(30), Some(pc));
        assert_eq!(list.pop_expired(30), Some(pa));
        assert!(list.is_empty());
    }

    #[test]
    fn not_expired_yet() {
        let mut a = tcb_at(10);
        let pa = NonNull::from(&mut a);

        let mut list = DelayList::new();
        unsafe { list.insert(pa) };

        assert_eq!(list.pop_expired(9), None);
        assert_eq!(list.pop_expired(10), Some(pa));
        assert_eq!(a.wake_tick, 0);
    }

    #[test]
    fn wraparound_ordering() {
        // A delay armed just before the tick counter wraps must sort
        // ahead of one expiring slightly later, past the wrap.
        let mut a = tcb_at(0x0000_0003);
        let mut b = tcb_at(0x0000_0002); // 0xFFFF_FFF8 + 10
        let (pa, pb) = (NonNull::from(&mut a), NonNull::from(&mut b));

        let mut list = DelayList::new();
        unsafe {
            list.insert(pa);
            list.insert(pb);
        }

        assert_eq!(list.head(), Some(pb));
        assert_eq!(list.pop_expired(0xFFFF_FFFE), None);
        assert_eq!(list.pop_expired(0x0000_0002), Some(pb));
        assert_eq!(list.pop_expired(0x0000_0002), None);
        assert_eq!(list.pop_expired(0x0000_0003), Some(pa));
    }

    #[test]
    fn random_sequences_stay_sorted() {
        // Deterministic xorshift; wake ticks span the wrap boundary.
        let mut seed = 0x2545_F491u32;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            seed
        };

        for _ in 0..64 {
            let base = next();
            let mut tcbs: [OsTcb; 16] = core::array::from_fn(|_| {
                let off = next() % 1000 + 1;
                let wake = base.wrapping_add(off);
                tcb_at(if wake == 0 { 1 } else { wake })
            });

            let mut list = DelayList::new();
            for t in tcbs.iter_mut() {
                unsafe { list.insert(NonNull::from(t)) };
            }

            let mut last: Option<OsTick> = None;
            let mut count = 0;
            let mut cur = list.head();
            while let Some(p) = cur {
                let wake = unsafe { p.as_ref().wake_tick };
                if let Some(prev) = last {
                    assert!(tick_reached(wake, prev));
                }
                last = Some(wake);
                count += 1;
                cur = unsafe { p.as_ref().tick_next_ptr };
            }
            assert_eq!(count, 16);
        }
    }
}
