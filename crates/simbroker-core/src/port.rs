//! Port constants and the reserved session port range.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known port the broker listens on unless configured otherwise.
pub const DEFAULT_BROKER_PORT: u16 = 18000;

/// Range session hosts are allocated from.
///
/// Sits above the broker's own port and below the conventional OS
/// ephemeral range (32768+ on Linux, 49152+ on Windows).
pub const DEFAULT_SESSION_PORT_RANGE: PortRange = PortRange {
    start: 18500,
    end: 20000,
};

/// Inclusive range of TCP ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    /// Creates a range; bounds are swapped if given in reverse.
    pub fn new(start: u16, end: u16) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    /// Number of ports in the range.
    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Draws a uniformly random port from the range.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> u16 {
        rng.gen_range(self.start..=self.end)
    }
}

impl Default for PortRange {
    fn default() -> Self {
        DEFAULT_SESSION_PORT_RANGE
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
