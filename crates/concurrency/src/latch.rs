//! Per-key latches serializing command execution
//!
//! A latch table is a fixed array of slots; a key maps to a slot by hash.
//! Each slot carries a FIFO wait queue of command ids. A command owns a slot
//! when its id sits at the queue front; it may proceed once it owns every
//! slot its key set hashes to.
//!
//! Slots are always acquired in ascending slot order, so two commands
//! touching overlapping key sets can never deadlock. Release may hand slots
//! directly to a designated next command (ownership transfer), keeping a
//! chain of dependent commands gap-free.

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHasher;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::hash::Hasher;
use std::time::Duration;

/// Default slot count per latch table. Power of two so the slot index is a
/// mask of the key hash.
pub const DEFAULT_SLOT_COUNT: usize = 256;

struct Slot {
    waiting: Mutex<VecDeque<u64>>,
    ready: Condvar,
}

impl Slot {
    fn new() -> Self {
        Self {
            waiting: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }
}

/// The per-command latch handle: the deduplicated, sorted set of slots the
/// command must hold, plus how many it holds so far.
#[derive(Debug)]
pub struct Latch {
    required: SmallVec<[usize; 8]>,
    owned: usize,
}

impl Latch {
    /// Whether every required slot is held.
    pub fn acquired(&self) -> bool {
        self.owned == self.required.len()
    }

    /// Number of distinct slots this handle covers.
    pub fn slot_count(&self) -> usize {
        self.required.len()
    }

    fn requires(&self, slot: usize) -> bool {
        self.required.binary_search(&slot).is_ok()
    }
}

/// Fixed-size latch table. One per region.
pub struct Latches {
    slots: Vec<Slot>,
    mask: usize,
}

impl Default for Latches {
    fn default() -> Self {
        Self::with_slots(DEFAULT_SLOT_COUNT)
    }
}

impl Latches {
    /// Create a table with `slot_count` slots, rounded up to a power of two.
    pub fn with_slots(slot_count: usize) -> Self {
        let n = slot_count.next_power_of_two().max(2);
        Self {
            slots: (0..n).map(|_| Slot::new()).collect(),
            mask: n - 1,
        }
    }

    fn slot_of(&self, key: &[u8]) -> usize {
        let mut hasher = FxHasher::default();
        hasher.write(key);
        (hasher.finish() as usize) & self.mask
    }

    /// Build the latch handle for a key set. Slots are sorted and
    /// deduplicated so acquisition order is the same for every command.
    pub fn gen_latch<K: AsRef<[u8]>>(&self, keys: &[K]) -> Latch {
        let mut required: SmallVec<[usize; 8]> =
            keys.iter().map(|k| self.slot_of(k.as_ref())).collect();
        required.sort_unstable();
        required.dedup();
        Latch { required, owned: 0 }
    }

    /// Acquire every slot of `latch` for command `who`, blocking until all
    /// are held. Slots already owned (e.g. handed over by the previous
    /// command) are detected and skipped.
    pub fn acquire(&self, latch: &mut Latch, who: u64) {
        while latch.owned < latch.required.len() {
            let slot = &self.slots[latch.required[latch.owned]];
            let mut waiting = slot.waiting.lock();
            if !waiting.contains(&who) {
                waiting.push_back(who);
            }
            while waiting.front() != Some(&who) {
                slot.ready.wait(&mut waiting);
            }
            latch.owned += 1;
        }
    }

    /// Like `acquire` but gives up after `timeout`, releasing everything
    /// acquired or enqueued so far. Returns `false` on timeout, leaving no
    /// trace of `who` in the table.
    pub fn try_acquire_for(&self, latch: &mut Latch, who: u64, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while latch.owned < latch.required.len() {
            let slot = &self.slots[latch.required[latch.owned]];
            let mut waiting = slot.waiting.lock();
            if !waiting.contains(&who) {
                waiting.push_back(who);
            }
            while waiting.front() != Some(&who) {
                if slot
                    .ready
                    .wait_until(&mut waiting, deadline)
                    .timed_out()
                {
                    drop(waiting);
                    self.abandon(latch, who);
                    tracing::debug!(who, "latch acquisition timed out, abandoned");
                    return false;
                }
            }
            latch.owned += 1;
        }
        true
    }

    /// Release every slot of `latch` held by `who`, waking the next waiter
    /// of each. `keep_for_next` hands the slots the next command also needs
    /// directly to it, front-of-queue, with no release gap.
    pub fn release(&self, latch: &Latch, who: u64, keep_for_next: Option<(u64, &Latch)>) {
        for &idx in latch.required.iter() {
            let slot = &self.slots[idx];
            let mut waiting = slot.waiting.lock();
            if let Some(pos) = waiting.iter().position(|w| *w == who) {
                waiting.remove(pos);
            }
            if let Some((next_who, next_latch)) = keep_for_next {
                if next_latch.requires(idx) {
                    if let Some(pos) = waiting.iter().position(|w| *w == next_who) {
                        waiting.remove(pos);
                    }
                    waiting.push_front(next_who);
                }
            }
            slot.ready.notify_all();
        }
    }

    // Remove who from every required slot, owned or merely enqueued.
    fn abandon(&self, latch: &mut Latch, who: u64) {
        for &idx in latch.required.iter() {
            let slot = &self.slots[idx];
            let mut waiting = slot.waiting.lock();
            if let Some(pos) = waiting.iter().position(|w| *w == who) {
                waiting.remove(pos);
            }
            slot.ready.notify_all();
        }
        latch.owned = 0;
    }

    /// Acquire and wrap in a guard that releases on every exit path.
    pub fn lock_guard<'a, K: AsRef<[u8]>>(&'a self, keys: &[K], who: u64) -> LatchGuard<'a> {
        let mut latch = self.gen_latch(keys);
        self.acquire(&mut latch, who);
        LatchGuard {
            latches: self,
            latch: Some(latch),
            who,
        }
    }
}

/// Scoped latch ownership: releases on drop, covering early returns, `?`
/// propagation and panics.
pub struct LatchGuard<'a> {
    latches: &'a Latches,
    latch: Option<Latch>,
    who: u64,
}

impl<'a> LatchGuard<'a> {
    /// The command id holding the latches.
    pub fn who(&self) -> u64 {
        self.who
    }

    /// Release early, handing shared slots to the next command. The next
    /// command must then `acquire` its own handle; slots received this way
    /// are already front-of-queue.
    pub fn hand_over(mut self, next_who: u64, next_latch: &Latch) {
        if let Some(latch) = self.latch.take() {
            self.latches.release(&latch, self.who, Some((next_who, next_latch)));
        }
    }
}

impl Drop for LatchGuard<'_> {
    fn drop(&mut self) {
        if let Some(latch) = self.latch.take() {
            self.latches.release(&latch, self.who, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn acquire_release_single_key() {
        let latches = Latches::default();
        let mut latch = latches.gen_latch(&[b"a".to_vec()]);
        latches.acquire(&mut latch, 1);
        assert!(latch.acquired());
        latches.release(&latch, 1, None);
    }

    #[test]
    fn duplicate_keys_dedup_to_one_slot() {
        let latches = Latches::default();
        let latch = latches.gen_latch(&[b"a".to_vec(), b"a".to_vec()]);
        assert_eq!(latch.slot_count(), 1);
    }

    #[test]
    fn second_acquirer_blocks_until_release() {
        let latches = Arc::new(Latches::default());
        let mut first = latches.gen_latch(&[b"k".to_vec()]);
        latches.acquire(&mut first, 1);

        let latches2 = Arc::clone(&latches);
        let acquired = Arc::new(AtomicUsize::new(0));
        let acquired2 = Arc::clone(&acquired);
        let handle = thread::spawn(move || {
            let mut second = latches2.gen_latch(&[b"k".to_vec()]);
            latches2.acquire(&mut second, 2);
            acquired2.store(1, Ordering::SeqCst);
            latches2.release(&second, 2, None);
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(acquired.load(Ordering::SeqCst), 0);

        latches.release(&first, 1, None);
        handle.join().unwrap();
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mutual_exclusion_under_contention() {
        // Instrumented holder counter: at most one thread may ever be
        // inside the critical section for the same key.
        let latches = Arc::new(Latches::with_slots(8));
        let holders = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for who in 0..8u64 {
            let latches = Arc::clone(&latches);
            let holders = Arc::clone(&holders);
            let max_seen = Arc::clone(&max_seen);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let mut latch = latches.gen_latch(&[b"shared".to_vec()]);
                    latches.acquire(&mut latch, who);
                    let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    holders.fetch_sub(1, Ordering::SeqCst);
                    latches.release(&latch, who, None);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn overlapping_key_sets_do_not_deadlock() {
        // Opposite argument order; sorted slot order prevents deadlock.
        let latches = Arc::new(Latches::with_slots(64));
        let keys_ab = vec![b"a".to_vec(), b"b".to_vec()];
        let keys_ba = vec![b"b".to_vec(), b"a".to_vec()];

        let mut handles = Vec::new();
        for (who, keys) in [(1u64, keys_ab), (2u64, keys_ba)] {
            let latches = Arc::clone(&latches);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let mut latch = latches.gen_latch(&keys);
                    latches.acquire(&mut latch, who);
                    latches.release(&latch, who, None);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn timeout_leaves_no_trace() {
        let latches = Arc::new(Latches::default());
        let mut holder = latches.gen_latch(&[b"k".to_vec()]);
        latches.acquire(&mut holder, 1);

        let mut waiter = latches.gen_latch(&[b"k".to_vec()]);
        assert!(!latches.try_acquire_for(&mut waiter, 2, Duration::from_millis(20)));

        // After the failed attempt, releasing the holder must let a fresh
        // acquirer through immediately (the abandoned waiter is gone).
        latches.release(&holder, 1, None);
        let mut third = latches.gen_latch(&[b"k".to_vec()]);
        assert!(latches.try_acquire_for(&mut third, 3, Duration::from_millis(100)));
        latches.release(&third, 3, None);
    }

    #[test]
    fn hand_over_transfers_ownership_without_gap() {
        let latches = Arc::new(Latches::default());
        let keys = vec![b"k".to_vec()];

        let guard = latches.lock_guard(&keys, 1);

        // A competing command queues behind the holder.
        let latches_bg = Arc::clone(&latches);
        let keys_bg = keys.clone();
        let competitor = thread::spawn(move || {
            let guard = latches_bg.lock_guard(&keys_bg, 3);
            drop(guard);
        });
        thread::sleep(Duration::from_millis(30));

        // Hand directly to command 2; it must get the latch ahead of the
        // queued competitor.
        let next = latches.gen_latch(&keys);
        guard.hand_over(2, &next);

        let mut next = latches.gen_latch(&keys);
        assert!(latches.try_acquire_for(&mut next, 2, Duration::from_millis(0)));
        latches.release(&next, 2, None);

        competitor.join().unwrap();
    }

    #[test]
    fn guard_releases_on_drop() {
        let latches = Latches::default();
        {
            let _guard = latches.lock_guard(&[b"k".to_vec()], 1);
        }
        let mut latch = latches.gen_latch(&[b"k".to_vec()]);
        assert!(latches.try_acquire_for(&mut latch, 2, Duration::from_millis(0)));
        latches.release(&latch, 2, None);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // The slot set must not depend on key order; otherwise two
            // commands could acquire overlapping sets in different orders.
            #[test]
            fn gen_latch_is_order_insensitive(
                mut keys in proptest::collection::vec(
                    proptest::collection::vec(any::<u8>(), 1..8), 1..10),
            ) {
                let latches = Latches::with_slots(64);
                let forward = latches.gen_latch(&keys);
                keys.reverse();
                let backward = latches.gen_latch(&keys);
                prop_assert_eq!(&forward.required[..], &backward.required[..]);
            }
        }
    }

    #[test]
    fn guard_releases_on_panic() {
        let latches = Arc::new(Latches::default());
        let latches_panic = Arc::clone(&latches);
        let result = thread::spawn(move || {
            let _guard = latches_panic.lock_guard(&[b"k".to_vec()], 1);
            panic!("command crashed");
        })
        .join();
        assert!(result.is_err());

        let mut latch = latches.gen_latch(&[b"k".to_vec()]);
        assert!(latches.try_acquire_for(&mut latch, 2, Duration::from_millis(100)));
        latches.release(&latch, 2, None);
    }
}
