//! Stream identification and log positions.
//!
//! This module defines the strong types used to address the log:
//!
//! - [`StreamType`] / [`StreamId`]: a logical append-only sub-sequence of the log
//! - [`Position`]: the log-global, strictly increasing sequence number of an event

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for `StreamId` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid stream ID: {0}")]
pub struct ParseStreamIdError(String);

/// The kind of a stream (`"Account"`, `"Payment"`, ...).
///
/// Projection caches select the events they fold by stream type.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamType(String);

impl StreamType {
    /// Create a new `StreamType`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the stream type as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StreamType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifies a logical append-only sub-sequence of the log.
///
/// A stream ID is a `(type, id)` pair. It is an immutable value and is used
/// as the key of projection caches and of by-stream reads.
///
/// # Validation
///
/// - `FromStr::from_str()`: parses `"type/id"` and rejects empty parts
/// - `new()`: no validation (for application-controlled values)
///
/// # Examples
///
/// ```
/// use eventide_core::stream::StreamId;
///
/// let stream_id = StreamId::new("Account", "A");
/// assert_eq!(stream_id.stream_type().as_str(), "Account");
/// assert_eq!(stream_id.to_string(), "Account/A");
///
/// let parsed: StreamId = "Account/A".parse().unwrap();
/// assert_eq!(parsed, stream_id);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamId {
    stream_type: StreamType,
    id: String,
}

impl StreamId {
    /// Create a new `StreamId` from a stream type and an id.
    #[must_use]
    pub fn new(stream_type: impl Into<StreamType>, id: impl Into<String>) -> Self {
        Self {
            stream_type: stream_type.into(),
            id: id.into(),
        }
    }

    /// The stream type component.
    #[must_use]
    pub const fn stream_type(&self) -> &StreamType {
        &self.stream_type
    }

    /// The id component.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether this stream belongs to the given type.
    #[must_use]
    pub fn is_of_type(&self, stream_type: &str) -> bool {
        self.stream_type.as_str() == stream_type
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stream_type, self.id)
    }
}

impl FromStr for StreamId {
    type Err = ParseStreamIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((stream_type, id)) = s.split_once('/') else {
            return Err(ParseStreamIdError(format!(
                "expected \"type/id\", got \"{s}\""
            )));
        };
        if stream_type.is_empty() || id.is_empty() {
            return Err(ParseStreamIdError(
                "Stream type and id cannot be empty".to_string(),
            ));
        }
        Ok(Self::new(stream_type, id))
    }
}

/// Log-global sequence number of an event.
///
/// Positions are assigned by the driver at write time, start at 0 and are
/// strictly increasing. A position is both the sole ordering key of the log
/// and the resumption cursor of polling.
///
/// [`Position::MAX`] stands for "+∞" when used as an exclusive upper bound.
///
/// # Examples
///
/// ```
/// use eventide_core::stream::Position;
///
/// let p = Position::new(41);
/// assert_eq!(p.next(), Position::new(42));
/// assert!(Position::ZERO < p);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position(u64);

impl Position {
    /// The position of the first event in the log.
    pub const ZERO: Self = Self(0);

    /// Unbounded upper limit for reads.
    pub const MAX: Self = Self(u64::MAX);

    /// Create a new `Position` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw sequence number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The position immediately after this one.
    ///
    /// Saturates at [`Position::MAX`].
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Whether this is the unbounded marker.
    #[must_use]
    pub const fn is_max(self) -> bool {
        self.0 == u64::MAX
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Position {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Position> for u64 {
    fn from(position: Position) -> Self {
        position.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod stream_id_tests {
        use super::*;

        #[test]
        fn new_creates_stream_id() {
            let id = StreamId::new("Account", "A");
            assert_eq!(id.stream_type(), &StreamType::new("Account"));
            assert_eq!(id.id(), "A");
            assert!(id.is_of_type("Account"));
            assert!(!id.is_of_type("Payment"));
        }

        #[test]
        #[allow(clippy::expect_used)] // Panics: Test will fail if parse fails
        fn parse_from_str() {
            let id: StreamId = "Account/A-1".parse().expect("parse should succeed");
            assert_eq!(id, StreamId::new("Account", "A-1"));
        }

        #[test]
        fn parse_rejects_missing_or_empty_parts() {
            assert!("".parse::<StreamId>().is_err());
            assert!("Account".parse::<StreamId>().is_err());
            assert!("/A".parse::<StreamId>().is_err());
            assert!("Account/".parse::<StreamId>().is_err());
        }

        #[test]
        fn display_round_trips_through_parse() {
            let id = StreamId::new("Account", "A");
            assert_eq!(format!("{id}"), "Account/A");
            assert_eq!(id.to_string().parse::<StreamId>(), Ok(id));
        }
    }

    mod position_tests {
        use super::*;

        #[test]
        fn next_position() {
            assert_eq!(Position::ZERO.next(), Position::new(1));
            assert_eq!(Position::new(7).next().next(), Position::new(9));
        }

        #[test]
        fn next_saturates_at_max() {
            assert_eq!(Position::MAX.next(), Position::MAX);
            assert!(Position::MAX.is_max());
        }

        #[test]
        fn ordering_follows_value() {
            assert!(Position::new(1) < Position::new(2));
            assert!(Position::MAX > Position::new(u64::MAX - 1));
        }

        #[test]
        fn conversions() {
            let position = Position::from(42_u64);
            let raw: u64 = position.into();
            assert_eq!(raw, 42);
            assert_eq!(format!("{position}"), "42");
        }
    }
}
