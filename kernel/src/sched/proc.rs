//! Process table entries
//!
//! The process table itself is owned by the scheduler; everything else
//! refers to processes by pid. Creation and destruction of real
//! processes (address spaces, files, credentials) live outside the core;
//! this module only carries the fields the scheduler reads and mutates.

use crate::config::{NORMALIZATION_VALUE, PRIO_USER};

/// Process identifier type
pub type Pid = usize;

/// Pid of the distinguished idle process
pub const IDLE: Pid = 0;

/// Scheduler error types
///
/// A pid out of table range is a kernel bug and panics instead of
/// surfacing here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// Process table is full
    TooManyProcs,
}

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Process state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// Table slot not in use
    Unused,

    /// Runnable, waiting to win the lottery
    Ready,

    /// Currently executing on the CPU
    Running,

    /// Sleeping on a wait queue
    Waiting,

    /// Stopped until resumed
    Stopped,

    /// Terminated, awaiting reaping by the parent
    Zombie,
}

/// One process table entry
#[derive(Debug, Clone, Copy)]
pub struct Process {
    /// Human-readable process name
    pub name: &'static str,

    /// Current state
    pub state: ProcState,

    /// Remaining quantum ticks
    pub counter: u32,

    /// Scheduling priority (lower is more urgent)
    pub priority: i32,

    /// Nice value subtracted from the ticket seed
    pub nice: i32,

    /// Current lottery ticket count
    pub tickets: i32,

    /// Bonus tickets awarded for an under-used quantum
    pub compensation: i32,

    /// Tick at which to deliver SIGALRM, or 0 for none
    pub alarm: u64,

    /// Parent process, target of SIGCHLD
    pub parent: Pid,

    /// Pending signals bitmask (bit N = signal N is pending)
    pub pending_signals: u64,
}

impl Process {
    /// An empty table slot
    pub const UNUSED: Process = Process {
        name: "",
        state: ProcState::Unused,
        counter: 0,
        priority: PRIO_USER,
        nice: 0,
        tickets: 0,
        compensation: 0,
        alarm: 0,
        parent: IDLE,
        pending_signals: 0,
    };

    /// Ticket seed for a given priority and nice value
    pub const fn normalized_tickets(priority: i32, nice: i32) -> i32 {
        -priority + NORMALIZATION_VALUE - nice
    }

    /// Effective weight of this process in the lottery
    pub fn lottery_weight(&self) -> i32 {
        self.tickets + self.compensation
    }
}

/// Read-only snapshot of a process table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcInfo {
    pub name: &'static str,
    pub state: ProcState,
    pub counter: u32,
    pub priority: i32,
    pub nice: i32,
    pub tickets: i32,
    pub compensation: i32,
    pub alarm: u64,
    pub parent: Pid,
    pub pending_signals: u64,
}

impl ProcInfo {
    pub(crate) fn of(p: &Process) -> Self {
        Self {
            name: p.name,
            state: p.state,
            counter: p.counter,
            priority: p.priority,
            nice: p.nice,
            tickets: p.tickets,
            compensation: p.compensation,
            alarm: p.alarm,
            parent: p.parent,
            pending_signals: p.pending_signals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_tickets() {
        // tickets = -priority + NORMALIZATION_VALUE - nice
        assert_eq!(Process::normalized_tickets(PRIO_USER, 0), 60);
        assert_eq!(Process::normalized_tickets(PRIO_USER, 50), 10);
        assert_eq!(Process::normalized_tickets(PRIO_USER, 30), 30);
    }

    #[test]
    fn test_lottery_weight() {
        let mut p = Process::UNUSED;
        p.tickets = 10;
        p.compensation = 30;
        assert_eq!(p.lottery_weight(), 40);
    }
}
