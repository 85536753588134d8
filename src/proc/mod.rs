//! Threads and the priority/MLFQS scheduler.
//!
//! Grounded directly on `original_source/src/threads/thread.c`, since
//! the teacher's own `proc/procs.rs` is a plain round-robin scheduler
//! with no priority donation or MLFQS. The teacher's *shape* survives
//! anyway: a `Thread`/`Proc` struct with state + scheduling fields
//! protected by a lock, looked up by a small integer id rather than a
//! raw pointer.
//!
//! The scheduler itself (`scheduler.rs`) is modeled as a deterministic
//! state machine driven by explicit calls (`tick`, `yield_now`,
//! `block_current`, `unblock`) instead of cooperating with a real
//! context switch, so that `spec.md` §8's tick-by-tick scenarios can be
//! exercised directly in unit tests.

pub mod scheduler;
pub mod sync;

use crate::fixed_point::FixedPoint;
use crate::param::PRI_DEFAULT;

pub type ThreadId = u32;
pub type LockId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    /// Blocked on a `sync::Lock` or other rendezvous.
    Blocked,
    /// Asleep until the given tick count is reached.
    Sleeping(u64),
}

pub struct Thread {
    pub id: ThreadId,
    pub name: String,
    pub state: ThreadState,

    base_priority: i32,
    /// Highest priority donated to this thread, transitively, by any
    /// thread waiting on a lock this thread holds (directly or via a
    /// chain of locks). Recomputed by `Scheduler::donate_chain` on
    /// acquire and `Scheduler::lock_release` on release; see
    /// `update_donated_priority`/`update_holding_lock` in the original
    /// source.
    donated_priority: Option<i32>,

    /// "Niceness" and `recent_cpu`, inputs to the MLFQS priority
    /// formula (`thread_get_nice`/`thread_get_recent_cpu`).
    pub nice: i32,
    pub recent_cpu: FixedPoint,

    /// Locks currently held, and the one lock (if any) this thread is
    /// itself blocked waiting to acquire -- ground:
    /// `original_source/src/threads/thread.c`'s `holding_locks`/
    /// `waiting_lock`. `scheduler::Scheduler::donate_chain` walks
    /// `waiting_on` to propagate a donation past the immediate lock
    /// holder to whatever lock *that* thread is blocked on in turn.
    pub held_locks: Vec<LockId>,
    pub waiting_on: Option<LockId>,
}

impl Thread {
    pub fn new(id: ThreadId, name: impl Into<String>, priority: i32) -> Self {
        Self {
            id,
            name: name.into(),
            state: ThreadState::Ready,
            base_priority: priority,
            donated_priority: None,
            nice: 0,
            recent_cpu: FixedPoint::ZERO,
            held_locks: Vec::new(),
            waiting_on: None,
        }
    }

    pub fn base_priority(&self) -> i32 {
        self.base_priority
    }

    pub fn set_base_priority(&mut self, priority: i32) {
        self.base_priority = priority;
    }

    /// `max(priority, donated_priority)`, matching
    /// `thread_get_priority`'s use of the donation field.
    pub fn effective_priority(&self) -> i32 {
        match self.donated_priority {
            Some(donated) => donated.max(self.base_priority),
            None => self.base_priority,
        }
    }

    pub fn donated_priority(&self) -> Option<i32> {
        self.donated_priority
    }

    pub(crate) fn set_donated_priority(&mut self, priority: Option<i32>) {
        self.donated_priority = priority;
    }
}

impl Default for Thread {
    fn default() -> Self {
        Self::new(0, "idle", PRI_DEFAULT)
    }
}
