//! Time-ordered note identifiers.
//!
//! An id is a UTC timestamp at microsecond resolution followed by a
//! four-digit counter: `YYYYMMDDTHHMMSSffffffNNNN`. Ids are fixed width, so
//! lexicographic order equals generation order.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

/// Ids that fit in one microsecond tick before the generator borrows the next one.
pub const IDS_PER_TICK: u32 = 10_000;

#[derive(Debug, Default)]
struct Cursor {
    tick: i64,
    counter: u32,
}

/// Generates strictly increasing, unique note ids. Safe to share between threads.
#[derive(Debug, Default)]
pub struct IdGenerator {
    cursor: Mutex<Cursor>,
}

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next id from the system clock.
    pub fn next_id(&self) -> String {
        self.next_id_at(Utc::now())
    }

    /// Produce the next id as if the clock read `now`.
    ///
    /// If `now` does not advance past the last tick (same microsecond or a
    /// clock step backwards), the last tick is reused and the counter
    /// increments. When the counter is exhausted the tick is advanced by one
    /// microsecond.
    pub fn next_id_at(&self, now: DateTime<Utc>) -> String {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let tick = now.timestamp_micros();

        if tick > cursor.tick {
            cursor.tick = tick;
            cursor.counter = 0;
        } else if cursor.counter + 1 < IDS_PER_TICK {
            cursor.counter += 1;
        } else {
            cursor.tick += 1;
            cursor.counter = 0;
        }

        format_id(cursor.tick, cursor.counter)
    }
}

fn format_id(tick: i64, counter: u32) -> String {
    let stamp = DateTime::<Utc>::from_timestamp_micros(tick).unwrap_or_default();
    format!("{}{counter:04}", stamp.format("%Y%m%dT%H%M%S%6f"))
}
