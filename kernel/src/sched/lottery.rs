//! Lottery draw and compensation arithmetic
//!
//! The generator is a linear congruential sequence reseeded from the
//! clock tick on every call, so all draws within one tick return the
//! same number. It is nowhere near cryptographic and does not need to
//! be; reseeding from the tick keeps the lottery reproducible under a
//! controlled clock.

use crate::config::PROC_QUANTUM;

/// Modulus of the generator output
const RAND_MAX: u64 = 32768;

/// Pseudo-random value in [0, 32768) derived from the current tick
pub fn rand(ticks: u64) -> u32 {
    let seed = ticks.wrapping_mul(1103515245).wrapping_add(12345);
    ((seed / 65536) % RAND_MAX) as u32
}

/// Winning ticket for a draw over `total_tickets`, in [1, total_tickets]
pub fn winning_ticket(ticks: u64, total_tickets: i32) -> i32 {
    debug_assert!(total_tickets > 0);
    (rand(ticks) as i64 * total_tickets as i64 / RAND_MAX as i64) as i32 + 1
}

/// Compensation tickets for a process that yielded with `counter` quantum
/// ticks left
///
/// Integer form of tickets / fraction_used - tickets, scaled through the
/// quantum so no floating point is needed:
/// tickets * PROC_QUANTUM / used - tickets.
///
/// A process that exhausted its quantum (counter 0) or never ran off it
/// (counter still PROC_QUANTUM) earns nothing.
pub fn compensation(tickets: i32, counter: u32) -> i32 {
    if counter == 0 || counter >= PROC_QUANTUM {
        return 0;
    }
    let used = (PROC_QUANTUM - counter) as i64;
    (tickets as i64 * PROC_QUANTUM as i64 / used - tickets as i64) as i32
}
