//! Overflow policies for bounded sink queues
//!
//! Sink queues are unbounded unless `MaxQueue` is configured. When a bound is
//! set, these policies decide what happens to an item that does not fit.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Policy for handling a full sink queue
///
/// # Example
///
/// ```
/// use sourcelog::OverflowPolicy;
/// use std::time::Duration;
///
/// // Default behavior: alert and drop
/// let policy = OverflowPolicy::default();
///
/// let policy: OverflowPolicy = "BlockWithTimeout(250)".parse().unwrap();
/// assert_eq!(policy, OverflowPolicy::BlockWithTimeout(Duration::from_millis(250)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Drop the incoming item
    DropNewest,

    /// Evict the oldest queued item to make room
    DropOldest,

    /// Block the producer until the drain thread frees space
    ///
    /// Warning: this applies backpressure to application threads.
    Block,

    /// Block up to the timeout, then drop the incoming item
    BlockWithTimeout(Duration),

    /// Drop the incoming item and report it on the internal-error channel
    #[default]
    AlertAndDrop,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::DropNewest => write!(f, "DropNewest"),
            OverflowPolicy::DropOldest => write!(f, "DropOldest"),
            OverflowPolicy::Block => write!(f, "Block"),
            OverflowPolicy::BlockWithTimeout(d) => write!(f, "BlockWithTimeout({:?})", d),
            OverflowPolicy::AlertAndDrop => write!(f, "AlertAndDrop"),
        }
    }
}

impl FromStr for OverflowPolicy {
    type Err = String;

    /// Accepts the variant names; `BlockWithTimeout(ms)` takes milliseconds
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let lower = s.to_ascii_lowercase();
        if let Some(args) = lower
            .strip_prefix("blockwithtimeout(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let millis = args
                .trim()
                .trim_end_matches("ms")
                .parse::<u64>()
                .map_err(|_| format!("Invalid overflow timeout: '{}'", s))?;
            return Ok(OverflowPolicy::BlockWithTimeout(Duration::from_millis(millis)));
        }
        match lower.as_str() {
            "dropnewest" => Ok(OverflowPolicy::DropNewest),
            "dropoldest" => Ok(OverflowPolicy::DropOldest),
            "block" => Ok(OverflowPolicy::Block),
            "alertanddrop" => Ok(OverflowPolicy::AlertAndDrop),
            _ => Err(format!("Invalid overflow policy: '{}'", s)),
        }
    }
}

/// Callback type for overflow notifications
///
/// Called when items are dropped due to queue overflow.
/// The parameter is the total count of dropped items so far.
pub type OverflowCallback = Arc<dyn Fn(u64) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_policy_default() {
        assert_eq!(OverflowPolicy::default(), OverflowPolicy::AlertAndDrop);
    }

    #[test]
    fn test_overflow_policy_display() {
        assert_eq!(OverflowPolicy::DropOldest.to_string(), "DropOldest");
        assert_eq!(
            OverflowPolicy::BlockWithTimeout(Duration::from_millis(100)).to_string(),
            "BlockWithTimeout(100ms)"
        );
    }

    #[test]
    fn test_overflow_policy_parse() {
        assert_eq!("block".parse::<OverflowPolicy>(), Ok(OverflowPolicy::Block));
        assert_eq!(
            "BlockWithTimeout(100ms)".parse::<OverflowPolicy>(),
            Ok(OverflowPolicy::BlockWithTimeout(Duration::from_millis(100)))
        );
        assert!("sometimes".parse::<OverflowPolicy>().is_err());
    }
}
