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

//! Access decisions
//!
//! Every permission check yields a [`Decision`]. Denials are ordinary values,
//! never errors; the machine-readable cause travels in [`Denial`] and the
//! human-readable `reason` is rendered from it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Granularity of a fixed-window rate limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatePeriod {
    Minute,
    Day,
}

impl RatePeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RatePeriod::Minute => "minute",
            RatePeriod::Day => "day",
        }
    }
}

impl fmt::Display for RatePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a call was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Denial {
    NotFound,
    DisabledGlobally,
    DisabledByPreference,
    MissingRole,
    RateLimited {
        period: RatePeriod,
        count: u64,
        limit: u32,
    },
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::NotFound => f.write_str("Tool not found in registry"),
            Denial::DisabledGlobally => f.write_str("Tool is disabled globally"),
            Denial::DisabledByPreference => f.write_str("Tool is disabled by user preference"),
            Denial::MissingRole => f.write_str("User does not have required role"),
            Denial::RateLimited {
                period,
                count,
                limit,
            } => write!(
                f,
                "Rate limit exceeded: {}/{} calls per {}",
                count, limit, period
            ),
        }
    }
}

/// Outcome of a permission check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial: Option<Denial>,
}

impl Decision {
    pub fn granted() -> Self {
        Self {
            allowed: true,
            reason: "Access granted".to_string(),
            denial: None,
        }
    }

    pub fn denied(denial: Denial) -> Self {
        Self {
            allowed: false,
            reason: denial.to_string(),
            denial: Some(denial),
        }
    }
}

/// Result of checking one rate period against its current bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitCheck {
    pub allowed: bool,
    pub reason: String,
    pub period: RatePeriod,
    /// Calls recorded in the current bucket
    pub count: u64,
    /// Configured limit, zero when the tool is unknown
    pub limit: u32,
}

impl LimitCheck {
    /// Compare a bucket count against a limit; `count >= limit` is exceeded
    pub fn evaluate(period: RatePeriod, count: u64, limit: u32) -> Self {
        if count >= u64::from(limit) {
            Self {
                allowed: false,
                reason: Denial::RateLimited {
                    period,
                    count,
                    limit,
                }
                .to_string(),
                period,
                count,
                limit,
            }
        } else {
            Self {
                allowed: true,
                reason: "Within rate limit".to_string(),
                period,
                count,
                limit,
            }
        }
    }

    pub fn unknown_tool(period: RatePeriod) -> Self {
        Self {
            allowed: false,
            reason: "Tool not found".to_string(),
            period,
            count: 0,
            limit: 0,
        }
    }

    /// The denial this check contributes to a [`Decision`], if any
    pub fn denial(&self) -> Option<Denial> {
        if self.allowed {
            None
        } else {
            Some(Denial::RateLimited {
                period: self.period,
                count: self.count,
                limit: self.limit,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_reasons() {
        assert_eq!(
            Decision::denied(Denial::NotFound).reason,
            "Tool not found in registry"
        );
        assert_eq!(
            Decision::denied(Denial::RateLimited {
                period: RatePeriod::Day,
                count: 100,
                limit: 100,
            })
            .reason,
            "Rate limit exceeded: 100/100 calls per day"
        );
        assert!(Decision::granted().allowed);
    }

    #[test]
    fn test_limit_check_boundary() {
        assert!(LimitCheck::evaluate(RatePeriod::Minute, 2, 3).allowed);

        let exceeded = LimitCheck::evaluate(RatePeriod::Minute, 3, 3);
        assert!(!exceeded.allowed);
        assert_eq!(exceeded.reason, "Rate limit exceeded: 3/3 calls per minute");

        // A zero limit refuses every call
        assert!(!LimitCheck::evaluate(RatePeriod::Day, 0, 0).allowed);
    }

    #[test]
    fn test_denial_serializes_with_kind_tag() {
        let decision = Decision::denied(Denial::RateLimited {
            period: RatePeriod::Minute,
            count: 3,
            limit: 3,
        });
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["denial"]["kind"], "rate_limited");
        assert_eq!(json["denial"]["period"], "minute");
        assert_eq!(json["denial"]["count"], 3);
    }
}
