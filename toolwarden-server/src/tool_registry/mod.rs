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

//! Tool Access Registry
//!
//! Decides whether a user may invoke a tool and meters the calls they make.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   ToolAccessRegistry                     │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌────────────────┐   ┌────────────────┐   ┌──────────┐  │
//! │  │ RegistryCache  │   │ UsageCounter   │◀──│ Janitor  │  │
//! │  │ (TTL snapshot) │   │ Store (DashMap)│   │ (tokio)  │  │
//! │  └───────┬────────┘   └────────────────┘   └──────────┘  │
//! │          │ refresh                                       │
//! │  ┌───────▼────────────────────┐                          │
//! │  │  PolicyStore (SQLite)      │◀── preferences, admin    │
//! │  └────────────────────────────┘                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Decisions
//!
//! 1. **Fixed windows**: Counters are keyed by wall-clock minute and day
//!    labels. Bursts of up to twice the limit across a boundary are accepted.
//!
//! 2. **Process-local usage**: Counters live only in memory and are not shared
//!    between instances.
//!
//! 3. **Whole-snapshot cache**: The tool set is reloaded all at once when the
//!    validity window lapses; there is no per-row invalidation.

mod cache;
mod clock;
mod janitor;
mod registry;
mod service;
mod usage;

pub use cache::RegistryCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use janitor::JanitorHandle;
pub use registry::{RegistryError, ToolAccessRegistry, ToolRegistryConfig};
pub use service::RegistryService;
pub use usage::{
    bucket_label, day_label, minute_label, parse_minute_label, SweepStats, UsageCounterStore,
    UsageCounters, UsageKey,
};
