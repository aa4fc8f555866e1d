//! Plugin timer queue.
//!
//! Backs `setTimeout`/`setInterval`. The queue never runs anything itself:
//! the owning [`Sandbox`](crate::Sandbox) pops due callbacks and invokes them
//! when the host loop asks it to.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rquickjs::{Function, Persistent};

pub(crate) type TimerId = u32;

/// Smallest period a repeating timer may have.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Longest delay a timer may have, in milliseconds (`2^31 - 1`, as in browsers).
const MAX_DELAY_MS: f64 = i32::MAX as f64;

struct TimerEntry {
    callback: Persistent<Function<'static>>,
    due: Instant,
    period: Option<Duration>,
}

#[derive(Default)]
pub(crate) struct TimerQueue {
    next_id: TimerId,
    entries: HashMap<TimerId, TimerEntry>,
}

impl TimerQueue {
    /// Schedule a callback. Returns the handle handed back to JavaScript.
    pub(crate) fn schedule(
        &mut self,
        callback: Persistent<Function<'static>>,
        delay: Duration,
        repeat: bool,
        now: Instant,
    ) -> TimerId {
        // Handle 0 is falsy in JS, never hand it out
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let id = self.next_id;
        let period = repeat.then(|| delay.max(MIN_PERIOD));

        self.entries.insert(
            id,
            TimerEntry {
                callback,
                due: deadline_after(now, delay),
                period,
            },
        );
        id
    }

    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|entry| entry.due).min()
    }

    /// Ids of every timer due at `now`, oldest deadline first.
    pub(crate) fn due(&self, now: Instant) -> Vec<TimerId> {
        let mut due: Vec<(Instant, TimerId)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.due <= now)
            .map(|(id, entry)| (entry.due, *id))
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Take the callback for a due timer.
    ///
    /// One-shot timers are removed; periodic timers are re-armed relative to
    /// `now`. Returns `None` if the timer was cancelled in the meantime.
    pub(crate) fn take_for_run(
        &mut self,
        id: TimerId,
        now: Instant,
    ) -> Option<Persistent<Function<'static>>> {
        let entry = self.entries.get_mut(&id)?;
        match entry.period {
            Some(period) => {
                entry.due = deadline_after(now, period);
                Some(entry.callback.clone())
            }
            None => self.entries.remove(&id).map(|entry| entry.callback),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// `now + delay`, saturating at the latest representable instant.
fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(Duration::from_millis(MAX_DELAY_MS as u64)))
        .unwrap_or(now)
}

/// Convert a JS delay argument to a duration. Missing, negative and
/// non-finite values mean "as soon as possible"; huge values are clamped.
pub(crate) fn delay_from_js(ms: Option<f64>) -> Duration {
    match ms {
        Some(ms) if ms.is_finite() && ms > 0.0 => {
            Duration::from_secs_f64(ms.min(MAX_DELAY_MS) / 1000.0)
        }
        _ => Duration::ZERO,
    }
}
