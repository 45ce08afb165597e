use crate::{CoreError, Result, MAX_PRIORITY};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message priority carried as a broker-native attribute.
/// Higher numerical values are delivered first; the valid range is `0..=10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const LOWEST: Priority = Priority(0);
    pub const HIGHEST: Priority = Priority(MAX_PRIORITY);

    /// Create a priority, rejecting values above [`MAX_PRIORITY`].
    pub fn new(value: u8) -> Result<Self> {
        if value > MAX_PRIORITY {
            return Err(CoreError::InvalidPriority {
                value,
                max: MAX_PRIORITY,
            });
        }
        Ok(Priority(value))
    }

    /// Get the raw priority value
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Cap this priority at a queue's declared maximum, the way a broker
    /// treats messages published above `x-max-priority`.
    pub fn capped_at(self, max: u8) -> Self {
        Priority(self.0.min(max))
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::LOWEST
    }
}

impl TryFrom<u8> for Priority {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self> {
        Priority::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
