// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Time sources for bucket labels and cache staleness.
//!
//! Bucket labels follow local time, so the clock yields naive local
//! timestamps. Cache age is measured on a monotonic instant that never steps
//! back with the wall clock. `ManualClock` lets tests drive both.

use chrono::{Local, NaiveDateTime};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    /// Current local wall-clock time
    fn now(&self) -> NaiveDateTime;

    /// Monotonic instant for measuring elapsed time
    fn monotonic(&self) -> Instant;
}

/// Reads the system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn monotonic(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug)]
struct ManualState {
    wall: NaiveDateTime,
    elapsed: Duration,
}

/// Clock that only moves when told to.
///
/// Stepping the wall clock backwards leaves the monotonic reading where it is.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    state: Mutex<ManualState>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(ManualState {
                wall: start,
                elapsed: Duration::ZERO,
            }),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut state = self.state.lock();
        state.wall += by;
        if let Ok(forward) = by.to_std() {
            state.elapsed += forward;
        }
    }

    pub fn set(&self, to: NaiveDateTime) {
        let mut state = self.state.lock();
        if let Ok(forward) = to.signed_duration_since(state.wall).to_std() {
            state.elapsed += forward;
        }
        state.wall = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        self.state.lock().wall
    }

    fn monotonic(&self) -> Instant {
        self.origin + self.state.lock().elapsed
    }
}
