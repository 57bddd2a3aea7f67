//! Process Scheduler Module
//!
//! This module implements a lottery scheduler with compensation tickets
//! for a single-CPU cooperative kernel. Each process holds a ticket
//! count seeded from its priority and nice value; on every yield the
//! scheduler draws a winning ticket across the ready set and dispatches
//! the holder. Processes that give up the CPU before exhausting their
//! quantum earn compensation tickets, so interactive and I/O-bound
//! processes are not starved by CPU hogs.
//!
//! The scheduler also owns the sleep/wakeup protocol used by the buffer
//! cache: `sleep_on` parks the current process on a wait queue and hands
//! the CPU to the next lottery winner, `wake_all` broadcasts readiness
//! to every sleeper on a queue.
//!
//! Context switching itself is a platform primitive. Selection routines
//! update process state and return the chosen pid; the trap layer
//! performs the switch.

pub mod lottery;
mod proc;

pub use proc::{Pid, ProcInfo, ProcState, Process, SchedError, SchedResult, IDLE};

use crate::config::{NR_PROCS, PRIO_USER, PROC_QUANTUM};
use crate::metrics::METRICS;
use crate::signal::{sig_bit, signals};
use crate::sync::WaitQueue;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

/// Mutable scheduler state, guarded by one lock
///
/// On the uniprocessor the lock degenerates to the interrupt-disable
/// window around scheduler critical sections.
struct SchedState {
    /// The process table; slot 0 is the idle process
    procs: [Process; NR_PROCS],

    /// Currently running process
    curr: Pid,

    /// Process that ran before the last selection
    last: Pid,
}

/// The process scheduler
pub struct Scheduler {
    state: Mutex<SchedState>,

    /// Clock ticks since boot, advanced by the platform timer
    ticks: AtomicU64,
}

impl Scheduler {
    /// Create a scheduler whose table holds only the running idle process
    pub fn new() -> Self {
        let mut procs = [Process::UNUSED; NR_PROCS];
        procs[IDLE] = Process {
            name: "idle",
            state: ProcState::Running,
            counter: PROC_QUANTUM,
            tickets: Process::normalized_tickets(PRIO_USER, 0),
            ..Process::UNUSED
        };

        Self {
            state: Mutex::new(SchedState {
                procs,
                curr: IDLE,
                last: IDLE,
            }),
            ticks: AtomicU64::new(0),
        }
    }

    /// Register a new process in the table
    ///
    /// The slot is seeded ready-to-run with the standard user priority
    /// and a ticket count derived from it; the current process becomes
    /// the parent. Address space and file setup happen elsewhere.
    ///
    /// # Errors
    /// Returns `SchedError::TooManyProcs` if the table is full.
    pub fn spawn(&self, name: &'static str, nice: i32) -> SchedResult<Pid> {
        let mut st = self.state.lock();
        let parent = st.curr;

        let pid = (1..NR_PROCS)
            .find(|&i| st.procs[i].state == ProcState::Unused)
            .ok_or(SchedError::TooManyProcs)?;

        st.procs[pid] = Process {
            name,
            state: ProcState::Ready,
            counter: 0,
            priority: PRIO_USER,
            nice,
            tickets: Process::normalized_tickets(PRIO_USER, nice),
            compensation: 0,
            alarm: 0,
            parent,
            pending_signals: 0,
        };
        drop(st);

        log_info!("sched", "spawned {} (pid {})", name, pid);
        Ok(pid)
    }

    /// Mark a process runnable with an empty quantum
    pub fn make_runnable(&self, pid: Pid) {
        let mut st = self.state.lock();
        Self::make_runnable_locked(&mut st, pid);
    }

    fn make_runnable_locked(st: &mut SchedState, pid: Pid) {
        assert!(pid < NR_PROCS, "make_runnable: bad pid");
        st.procs[pid].state = ProcState::Ready;
        st.procs[pid].counter = 0;
    }

    /// Stop the current process, notify its parent, and pick a successor
    ///
    /// Returns the pid the platform layer should switch to.
    pub fn stop_current(&self) -> Pid {
        let mut st = self.state.lock();
        let curr = st.curr;
        assert!(curr != IDLE, "stop_current: idle cannot stop");

        st.procs[curr].state = ProcState::Stopped;
        let parent = st.procs[curr].parent;
        Self::post_signal_locked(&mut st, parent, signals::SIGCHLD);

        self.yield_locked(&mut st)
    }

    /// Resume a stopped process
    ///
    /// Has no effect unless the process is currently stopped.
    pub fn resume(&self, pid: Pid) {
        assert!(pid < NR_PROCS, "resume: bad pid");
        let mut st = self.state.lock();
        if st.procs[pid].state == ProcState::Stopped {
            Self::make_runnable_locked(&mut st, pid);
        }
    }

    /// Yield the processor and select the next process to run
    ///
    /// A current process that is still running is awarded compensation
    /// for the unused part of its quantum and made ready again. One
    /// sweep over the table totals the tickets of the ready set and
    /// expires due alarms; the lottery then picks the winner, falling
    /// back to the idle process when no tickets are in play.
    ///
    /// Returns the pid the platform layer should switch to.
    pub fn yield_now(&self) -> Pid {
        let mut st = self.state.lock();
        self.yield_locked(&mut st)
    }

    fn yield_locked(&self, st: &mut SchedState) -> Pid {
        let ticks = self.ticks.load(Ordering::Relaxed);
        let curr = st.curr;

        // A process still running is yielding voluntarily: compensate it
        // for the quantum it did not use, then put it back in the draw.
        if st.procs[curr].state == ProcState::Running {
            if curr != IDLE {
                let (tickets, counter) = (st.procs[curr].tickets, st.procs[curr].counter);
                st.procs[curr].compensation = lottery::compensation(tickets, counter);
            }
            Self::make_runnable_locked(st, curr);
        }

        st.last = curr;

        // One table sweep: total the ready set's tickets and expire alarms.
        let mut total_tickets: i32 = 0;
        for pid in 1..NR_PROCS {
            let p = &mut st.procs[pid];
            if p.state == ProcState::Unused {
                continue;
            }
            if p.state == ProcState::Ready {
                total_tickets += p.lottery_weight();
            }
            if p.alarm != 0 && p.alarm < ticks {
                p.alarm = 0;
                p.pending_signals |= sig_bit(signals::SIGALRM);
                METRICS.inc_signals_delivered();
                METRICS.inc_alarms_fired();
            }
        }

        let next = if total_tickets == 0 {
            IDLE
        } else {
            METRICS.inc_lottery_draws();
            let winning = lottery::winning_ticket(ticks, total_tickets);

            // First ready process whose running sum exceeds the draw wins.
            let mut sum = 0;
            let mut chosen = IDLE;
            for pid in 1..NR_PROCS {
                let p = &st.procs[pid];
                if p.state != ProcState::Ready {
                    continue;
                }
                sum += p.lottery_weight();
                if sum > winning {
                    chosen = pid;
                    break;
                }
            }
            chosen
        };

        Self::dispatch_locked(st, next);
        log_trace!("sched", "switch {} -> {}", st.last, next);
        next
    }

    /// Record that the platform layer switched to `pid`
    ///
    /// This is the software half of switch_to: the process becomes the
    /// running one with a fresh quantum and a renormalized ticket count.
    pub fn dispatch(&self, pid: Pid) {
        let mut st = self.state.lock();
        Self::dispatch_locked(&mut st, pid);
    }

    fn dispatch_locked(st: &mut SchedState, pid: Pid) {
        assert!(pid < NR_PROCS, "dispatch: bad pid");

        // Only one process may be running: a previous occupant that
        // never went through yield is demoted.
        let prev = st.curr;
        if prev != pid && st.procs[prev].state == ProcState::Running {
            Self::make_runnable_locked(st, prev);
        }

        let p = &mut st.procs[pid];
        assert!(p.state != ProcState::Unused, "dispatch: dead pid");

        p.priority = PRIO_USER;
        p.state = ProcState::Running;
        p.counter = PROC_QUANTUM;
        p.tickets = Process::normalized_tickets(p.priority, p.nice);
        p.compensation = 0;
        st.curr = pid;

        METRICS.inc_context_switches();
    }

    /// Put the current process to sleep on a wait queue
    ///
    /// `guard` is the critical-section guard protecting the condition
    /// being slept on. It is dropped only after the process is queued
    /// and marked waiting, which closes the window where a wakeup could
    /// slip in between the condition check and the sleep.
    ///
    /// The caller must re-check its condition after this returns:
    /// wakeups are broadcast and the buffer may have been claimed again
    /// by the time this process runs.
    pub fn sleep_on<G>(&self, queue: &WaitQueue, priority: i32, guard: G) {
        let pid = {
            let mut st = self.state.lock();
            let pid = st.curr;
            assert!(pid != IDLE, "sleep_on: idle cannot sleep");

            st.procs[pid].priority = priority;
            st.procs[pid].state = ProcState::Waiting;
            queue.add(pid);

            // Hand the CPU over, as the dispatcher would after a block.
            self.yield_locked(&mut st);
            pid
        };
        drop(guard);

        self.wait_until_runnable(pid);
    }

    /// Wake every process sleeping on a queue
    ///
    /// Sleepers become ready with an empty quantum; the next lottery
    /// decides who actually runs. The queue is left empty.
    pub fn wake_all(&self, queue: &WaitQueue) {
        let mut st = self.state.lock();
        for pid in queue.drain() {
            if st.procs[pid].state == ProcState::Waiting {
                Self::make_runnable_locked(&mut st, pid);
            }
        }
    }

    /// Spin until `pid` has been woken, then take the CPU as it
    ///
    /// On hardware this wait is the time spent switched away; here the
    /// blocked caller busy-waits for `wake_all` to mark it ready.
    fn wait_until_runnable(&self, pid: Pid) {
        loop {
            {
                let mut st = self.state.lock();
                if st.procs[pid].state == ProcState::Ready {
                    Self::dispatch_locked(&mut st, pid);
                    return;
                }
            }
            core::hint::spin_loop();
        }
    }

    /// Advance the clock by one tick and charge the running process
    ///
    /// Returns true when the running process has exhausted its quantum,
    /// in which case the trap layer is expected to force a yield.
    pub fn tick(&self) -> bool {
        self.ticks.fetch_add(1, Ordering::Relaxed);

        let mut st = self.state.lock();
        let curr = st.curr;
        let p = &mut st.procs[curr];
        if p.state == ProcState::Running && p.counter > 0 {
            p.counter -= 1;
        }
        p.state == ProcState::Running && p.counter == 0
    }

    /// Clock ticks since boot
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Arm (or with 0, disarm) a process alarm
    ///
    /// The alarm expires at the first yield after the clock passes
    /// `tick`, delivering SIGALRM.
    pub fn set_alarm(&self, pid: Pid, tick: u64) {
        assert!(pid < NR_PROCS, "set_alarm: bad pid");
        self.state.lock().procs[pid].alarm = tick;
    }

    /// Post a signal to a process
    ///
    /// Signals to unused slots are dropped.
    pub fn send_signal(&self, pid: Pid, signal: u32) {
        let mut st = self.state.lock();
        Self::post_signal_locked(&mut st, pid, signal);
    }

    fn post_signal_locked(st: &mut SchedState, pid: Pid, signal: u32) {
        assert!(pid < NR_PROCS, "send_signal: bad pid");
        let p = &mut st.procs[pid];
        if p.state == ProcState::Unused && pid != IDLE {
            return;
        }
        p.pending_signals |= sig_bit(signal);
        METRICS.inc_signals_delivered();
    }

    /// Whether a signal is pending for a process
    pub fn has_pending_signal(&self, pid: Pid, signal: u32) -> bool {
        assert!(pid < NR_PROCS, "has_pending_signal: bad pid");
        self.state.lock().procs[pid].pending_signals & sig_bit(signal) != 0
    }

    /// Clear a pending signal, returning whether it was set
    ///
    /// The trap layer calls this when it actually delivers the signal.
    pub fn clear_pending_signal(&self, pid: Pid, signal: u32) -> bool {
        assert!(pid < NR_PROCS, "clear_pending_signal: bad pid");
        let mut st = self.state.lock();
        let was = st.procs[pid].pending_signals & sig_bit(signal) != 0;
        st.procs[pid].pending_signals &= !sig_bit(signal);
        was
    }

    /// Pid of the currently running process
    pub fn current(&self) -> Pid {
        self.state.lock().curr
    }

    /// Pid of the process that ran before the last selection
    pub fn last(&self) -> Pid {
        self.state.lock().last
    }

    /// Snapshot of a process table entry, or None for an unused slot
    pub fn proc_info(&self, pid: Pid) -> Option<ProcInfo> {
        assert!(pid < NR_PROCS, "proc_info: bad pid");
        let st = self.state.lock();
        let p = &st.procs[pid];
        if p.state == ProcState::Unused && pid != IDLE {
            return None;
        }
        Some(ProcInfo::of(p))
    }

    /// Audit the scheduler invariants
    ///
    /// At most one non-idle process is running, and the current pid
    /// names a live slot. Intended for tests and debug builds.
    pub fn assert_invariants(&self) {
        let st = self.state.lock();
        let running = st
            .procs
            .iter()
            .enumerate()
            .filter(|&(pid, p)| pid != IDLE && p.state == ProcState::Running)
            .count();
        assert!(running <= 1, "more than one running process");
        assert!(st.procs[st.curr].state != ProcState::Unused, "current pid is dead");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
