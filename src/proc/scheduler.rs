//! The ready queue, sleep queue, MLFQS bookkeeping, and the lock table
//! backing `sync::Lock`'s transitive priority donation.
//!
//! Grounded on `original_source/src/threads/thread.c`: `next_thread_to_run`
//! / `schedule` (ready queue pop, ordered by `priority_less_func`),
//! `thread_tick` / `btc` (per-tick sleep countdown and wakeup),
//! `get_new_priority` / `get_new_load_avg_and_recent_cpu` (the MLFQS
//! formulas, ticked once a second per `TIMER_FREQ`), and
//! `update_donated_priority` / `update_holding_lock` (the donation chain
//! walk and release-time recomputation, reproduced here in
//! `donate_chain`/`lock_release` rather than split across `sync::Lock`,
//! since walking the chain means following one thread's `waiting_on`
//! into a *different* lock's state, which only a structure that owns
//! every lock can do).
//!
//! Priority donation and MLFQS are mutually exclusive in the original
//! (`thread_set_priority` is a no-op under MLFQS) and remain so here.

use std::collections::HashMap;

use crate::fixed_point::FixedPoint;
use crate::param::{PRI_DEFAULT, PRI_MAX, PRI_MIN, TIMER_FREQ, TIME_SLICE};

use super::{LockId, Thread, ThreadId, ThreadState};

/// One lock's scheduling-relevant state: who holds it, who is waiting,
/// and the highest priority ever donated through it while held (kept
/// even after a higher-priority waiter is later removed, matching the
/// original's `max_giving_priority`, so releasing one of several held
/// locks only drops the donation that lock was responsible for).
struct LockState {
    holder: Option<ThreadId>,
    waiters: Vec<ThreadId>,
    max_giving_priority: Option<i32>,
}

pub struct Scheduler {
    threads: HashMap<ThreadId, Thread>,
    ready: Vec<ThreadId>,
    current: Option<ThreadId>,
    next_id: ThreadId,
    pub ticks: u64,
    ticks_on_current: u32,
    mlfqs: bool,
    load_avg: FixedPoint,
    locks: HashMap<LockId, LockState>,
    next_lock_id: LockId,
}

impl Scheduler {
    pub fn new(mlfqs: bool) -> Self {
        let mut s = Self {
            threads: HashMap::new(),
            ready: Vec::new(),
            current: None,
            next_id: 1,
            ticks: 0,
            ticks_on_current: 0,
            mlfqs,
            load_avg: FixedPoint::ZERO,
            locks: HashMap::new(),
            next_lock_id: 1,
        };
        let main = s.new_thread("main", PRI_DEFAULT);
        s.current = Some(main);
        s.threads.get_mut(&main).unwrap().state = ThreadState::Running;
        s
    }

    fn new_thread(&mut self, name: impl Into<String>, priority: i32) -> ThreadId {
        let id = self.next_id;
        self.next_id += 1;
        self.threads.insert(id, Thread::new(id, name, priority));
        id
    }

    /// Creates a new thread in the ready queue. If it now has strictly
    /// higher effective priority than the running thread, the caller is
    /// expected to `yield_now` (mirrors the original's call to
    /// `thread_yield` at the end of `thread_create` when appropriate).
    pub fn spawn(&mut self, name: impl Into<String>, priority: i32) -> ThreadId {
        let id = self.new_thread(name, priority);
        self.insert_ready(id);
        id
    }

    fn insert_ready(&mut self, id: ThreadId) {
        self.threads.get_mut(&id).unwrap().state = ThreadState::Ready;
        let priority = self.priority_of(id);
        let pos = self
            .ready
            .iter()
            .position(|&other| self.priority_of(other) < priority)
            .unwrap_or(self.ready.len());
        self.ready.insert(pos, id);
    }

    fn priority_of(&self, id: ThreadId) -> i32 {
        self.threads[&id].effective_priority()
    }

    pub fn current(&self) -> Option<ThreadId> {
        self.current
    }

    pub fn thread(&self, id: ThreadId) -> &Thread {
        &self.threads[&id]
    }

    pub fn thread_mut(&mut self, id: ThreadId) -> &mut Thread {
        self.threads.get_mut(&id).unwrap()
    }

    /// Picks the highest-priority ready thread and makes it current.
    /// If nothing is ready, the current thread (if any) keeps running.
    fn schedule(&mut self) {
        if let Some(next) = self.ready.first().copied() {
            if self.current.is_none() || self.priority_of(next) >= self.current_priority() {
                self.ready.remove(0);
                if let Some(prev) = self.current.take() {
                    if self.threads[&prev].state == ThreadState::Running {
                        self.insert_ready(prev);
                    }
                }
                self.threads.get_mut(&next).unwrap().state = ThreadState::Running;
                self.current = Some(next);
                self.ticks_on_current = 0;
            }
        }
    }

    fn current_priority(&self) -> i32 {
        self.current.map(|id| self.priority_of(id)).unwrap_or(PRI_MIN)
    }

    /// Returns the current thread to the ready queue and schedules the
    /// next highest-priority thread, matching `thread_yield`.
    pub fn yield_now(&mut self) {
        if let Some(current) = self.current.take() {
            self.insert_ready(current);
        }
        self.schedule();
    }

    /// Removes the current thread from scheduling without making it
    /// ready again (used when it blocks on a lock or other rendezvous).
    pub fn block_current(&mut self) -> Option<ThreadId> {
        let current = self.current.take()?;
        self.threads.get_mut(&current).unwrap().state = ThreadState::Blocked;
        self.schedule();
        Some(current)
    }

    /// Makes a blocked or sleeping thread ready again. If it now
    /// outranks the running thread, preempts immediately -- matching
    /// Pintos's convention that unblocking a higher-priority thread
    /// yields the CPU right away.
    pub fn unblock(&mut self, id: ThreadId) {
        self.insert_ready(id);
        if self.priority_of(id) > self.current_priority() {
            self.schedule();
        }
    }

    /// Re-seats `id` at its current effective-priority position in the
    /// ready queue, for when a donation changes a ready (not running,
    /// not blocked) thread's priority mid-queue.
    fn bump_ready_position(&mut self, id: ThreadId) {
        if let Some(pos) = self.ready.iter().position(|&x| x == id) {
            self.ready.remove(pos);
            self.insert_ready(id);
        }
    }

    /// Registers a new, unheld lock and returns its id. `sync::Lock`
    /// holds only this id; all the scheduling-relevant state lives here
    /// so a donation chain can walk from one lock into the next.
    pub fn new_lock(&mut self) -> LockId {
        let id = self.next_lock_id;
        self.next_lock_id += 1;
        self.locks.insert(
            id,
            LockState {
                holder: None,
                waiters: Vec::new(),
                max_giving_priority: None,
            },
        );
        id
    }

    pub fn lock_holder(&self, lock_id: LockId) -> Option<ThreadId> {
        self.locks[&lock_id].holder
    }

    /// Acquires `lock_id` for `thread` (must be the current thread).
    /// Returns `true` if it was free and acquired immediately; `false`
    /// if `thread` had to block, after donating its priority up the
    /// full chain of locks it is now blocked behind.
    pub fn lock_acquire(&mut self, lock_id: LockId, thread: ThreadId) -> bool {
        if self.locks[&lock_id].holder.is_none() {
            self.locks.get_mut(&lock_id).unwrap().holder = Some(thread);
            self.thread_mut(thread).held_locks.push(lock_id);
            return true;
        }
        self.locks.get_mut(&lock_id).unwrap().waiters.push(thread);
        self.thread_mut(thread).waiting_on = Some(lock_id);
        self.donate_chain(lock_id, self.priority_of(thread));
        self.block_current();
        false
    }

    /// Propagates `new_priority` to `lock_id`'s holder, and -- if that
    /// holder is itself blocked waiting on another lock -- recurses into
    /// that lock in turn, so a donation travels the whole chain rather
    /// than just one hop. Stops as soon as a step would not actually
    /// raise anything, exactly like the original's recursive
    /// `update_donated_priority` (its early `return` when
    /// `new_priority` is not an improvement is what bounds the walk).
    fn donate_chain(&mut self, lock_id: LockId, new_priority: i32) {
        let mut lock_id = lock_id;
        loop {
            let state = self.locks.get_mut(&lock_id).unwrap();
            let improves = state.max_giving_priority.map_or(true, |p| new_priority > p);
            if !improves {
                return;
            }
            state.max_giving_priority = Some(new_priority);
            let Some(holder) = state.holder else { return };

            if new_priority <= self.priority_of(holder) {
                return;
            }
            self.thread_mut(holder).set_donated_priority(Some(new_priority));
            self.bump_ready_position(holder);

            match self.thread(holder).waiting_on {
                Some(next) => lock_id = next,
                None => return,
            }
        }
    }

    /// Releases `lock_id`, handing it directly to the highest-priority
    /// waiter (if any) and waking it. Recomputes the releasing thread's
    /// donated priority from whatever locks it *still* holds, rather
    /// than clearing it outright -- matching `update_holding_lock`,
    /// which lets a thread holding two locks keep the higher of the two
    /// donations after giving up only one.
    pub fn lock_release(&mut self, lock_id: LockId, thread: ThreadId) {
        assert_eq!(
            self.locks[&lock_id].holder,
            Some(thread),
            "release by non-holder"
        );
        self.locks.get_mut(&lock_id).unwrap().holder = None;
        self.locks.get_mut(&lock_id).unwrap().max_giving_priority = None;
        self.thread_mut(thread).held_locks.retain(|&l| l != lock_id);
        self.recompute_donated_priority(thread);

        let waiters = std::mem::take(&mut self.locks.get_mut(&lock_id).unwrap().waiters);
        if waiters.is_empty() {
            return;
        }
        let (idx, &next) = waiters
            .iter()
            .enumerate()
            .max_by_key(|&(_, &w)| self.priority_of(w))
            .expect("waiters is non-empty");
        let mut waiters = waiters;
        waiters.remove(idx);
        self.locks.get_mut(&lock_id).unwrap().waiters = waiters;

        self.thread_mut(next).waiting_on = None;
        self.thread_mut(next).held_locks.push(lock_id);
        self.locks.get_mut(&lock_id).unwrap().holder = Some(next);
        self.unblock(next);
    }

    /// Sets `thread`'s donated priority to the highest
    /// `max_giving_priority` among the locks it still holds, or clears
    /// it if it now holds none.
    fn recompute_donated_priority(&mut self, thread: ThreadId) {
        let max = self.thread(thread)
            .held_locks
            .iter()
            .filter_map(|&l| self.locks[&l].max_giving_priority)
            .max();
        self.thread_mut(thread).set_donated_priority(max);
        self.bump_ready_position(thread);
    }

    pub fn sleep_current(&mut self, duration_ticks: u64) {
        if let Some(current) = self.current.take() {
            self.threads.get_mut(&current).unwrap().state =
                ThreadState::Sleeping(self.ticks + duration_ticks);
            self.schedule();
        }
    }

    /// Advances the simulated clock by one tick: wakes any threads
    /// whose sleep has expired, runs the once-a-second MLFQS recompute,
    /// and reports whether the running thread has used up its slice.
    pub fn tick(&mut self) -> bool {
        self.ticks += 1;
        self.ticks_on_current += 1;

        let woken: Vec<ThreadId> = self
            .threads
            .iter()
            .filter_map(|(&id, t)| match t.state {
                ThreadState::Sleeping(at) if at <= self.ticks => Some(id),
                _ => None,
            })
            .collect();
        for id in woken {
            self.unblock(id);
        }

        if self.mlfqs {
            if let Some(current) = self.current {
                self.thread_mut(current).recent_cpu = self.thread(current).recent_cpu.add_int(1);
            }
            if self.ticks % u64::from(TIMER_FREQ) == 0 {
                self.recompute_load_avg_and_recent_cpu();
            }
            if self.ticks % 4 == 0 {
                self.recompute_priorities();
            }
        }

        self.ticks_on_current >= TIME_SLICE
    }

    fn ready_count(&self) -> usize {
        let running = usize::from(self.current.is_some());
        self.ready.len() + running
    }

    /// `load_avg = (59/60) * load_avg + (1/60) * ready_threads`;
    /// `recent_cpu = (2*load_avg)/(2*load_avg+1) * recent_cpu + nice`.
    fn recompute_load_avg_and_recent_cpu(&mut self) {
        let ready = self.ready_count() as i32;
        self.load_avg = self
            .load_avg
            .mul(FixedPoint::from_int(59).div_int(60))
            .add(FixedPoint::from_int(ready).div_int(60));

        let coeff = self
            .load_avg
            .mul_int(2)
            .div(self.load_avg.mul_int(2).add_int(1));
        for t in self.threads.values_mut() {
            t.recent_cpu = coeff.mul(t.recent_cpu).add_int(t.nice);
        }
    }

    /// `priority = PRI_MAX - recent_cpu/4 - nice*2`, clamped.
    fn recompute_priorities(&mut self) {
        for t in self.threads.values_mut() {
            let computed = PRI_MAX - t.recent_cpu.div_int(4).round() - t.nice * 2;
            t.set_base_priority(computed.clamp(PRI_MIN, PRI_MAX));
        }
        self.ready.sort_by_key(|&id| std::cmp::Reverse(self.threads[&id].effective_priority()));
    }

    pub fn set_priority(&mut self, id: ThreadId, priority: i32) {
        if self.mlfqs {
            return;
        }
        self.thread_mut(id).set_base_priority(priority);
        if Some(id) == self.current && self.ready.first().map(|&r| self.priority_of(r) > self.priority_of(id)).unwrap_or(false) {
            self.yield_now();
        }
    }

    pub fn set_nice(&mut self, id: ThreadId, nice: i32) {
        self.thread_mut(id).nice = nice;
        self.recompute_priorities();
    }

    /// Returns `100 * load_avg`, rounded, matching Pintos's
    /// `thread_get_load_avg` convention for fixed-point display.
    pub fn load_avg_x100(&self) -> i32 {
        self.load_avg.mul_int(100).round()
    }

    pub fn recent_cpu_x100(&self, id: ThreadId) -> i32 {
        self.thread(id).recent_cpu.mul_int(100).round()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::PRI_DEFAULT;

    #[test]
    fn blocking_current_switches_to_next_highest_priority_ready_thread() {
        let mut s = Scheduler::new(false);
        let high = s.spawn("high", PRI_DEFAULT + 10);
        // spawn() alone doesn't preempt the running thread.
        assert_ne!(s.current(), Some(high));
        s.block_current();
        assert_eq!(s.current(), Some(high));
    }

    #[test]
    fn ready_queue_orders_by_effective_priority() {
        let mut s = Scheduler::new(false);
        let _low = s.spawn("low", 10);
        let high = s.spawn("high", 20);
        s.block_current();
        assert_eq!(s.current(), Some(high));
    }

    #[test]
    fn sleep_wakes_up_after_requested_ticks() {
        let mut s = Scheduler::new(false);
        let main = s.current().unwrap();
        s.sleep_current(10);
        for _ in 0..9 {
            s.tick();
        }
        assert_ne!(s.current(), Some(main));
        s.tick();
        assert_eq!(s.current(), Some(main));
    }

    #[test]
    fn mlfqs_recomputes_priority_from_recent_cpu_and_nice() {
        let mut s = Scheduler::new(true);
        let id = s.current().unwrap();
        s.set_nice(id, 10);
        for _ in 0..u64::from(crate::param::TIMER_FREQ) {
            s.tick();
        }
        let expected = (PRI_MAX - s.thread(id).recent_cpu.div_int(4).round() - 20).clamp(PRI_MIN, PRI_MAX);
        assert_eq!(s.thread(id).base_priority(), expected);
    }
}
