//! Business failures and the general-purpose operation result.
//!
//! [`Failure`] is the closed set of *business* outcomes that are not
//! successes. It is orthogonal to whether the command pipeline itself worked
//! mechanically (see [`ProcessingResult`](crate::command::ProcessingResult)).
//!
//! Independent failures combine into [`Failure::Multiple`]; `Multiple([])` is
//! the identity of [`Failure::combine`], and nested `Multiple`s are flattened.
//!
//! ```
//! use eventide_core::failure::Failure;
//!
//! let combined = Failure::not_found("account A")
//!     .combine(Failure::none())
//!     .combine(Failure::Multiple(vec![Failure::conflict("version")]));
//!
//! assert_eq!(
//!     combined,
//!     Failure::Multiple(vec![Failure::not_found("account A"), Failure::conflict("version")])
//! );
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type used at API boundaries: a value or a business [`Failure`].
pub type OperationResult<T> = Result<T, Failure>;

/// The business outcome of a handled command: an `Ok` message or a [`Failure`].
pub type FunctionalResult = OperationResult<String>;

/// A business failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Failure {
    /// The caller may not perform the operation.
    Forbidden(String),
    /// A referenced entity does not exist.
    NotFound(String),
    /// The operation conflicts with current state.
    Conflict(String),
    /// An unexpected internal problem.
    Internal(String),
    /// The input was rejected by validation.
    InvalidInput(String),
    /// The operation was cancelled.
    Cancelled(String),
    /// Several independent failures.
    Multiple(Vec<Failure>),
}

impl Failure {
    /// The identity element of [`Failure::combine`].
    #[must_use]
    pub const fn none() -> Self {
        Self::Multiple(Vec::new())
    }

    /// Shorthand for [`Failure::Forbidden`].
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    /// Shorthand for [`Failure::NotFound`].
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Shorthand for [`Failure::Conflict`].
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Shorthand for [`Failure::Internal`].
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Shorthand for [`Failure::InvalidInput`].
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Shorthand for [`Failure::Cancelled`].
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled(message.into())
    }

    /// The human readable message.
    ///
    /// For `Multiple`, the children's messages joined with `"; "`.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Forbidden(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::Internal(m)
            | Self::InvalidInput(m)
            | Self::Cancelled(m) => m.clone(),
            Self::Multiple(children) => children
                .iter()
                .map(Self::message)
                .collect::<Vec<_>>()
                .join("; "),
        }
    }

    /// Whether this is the empty `Multiple`.
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::Multiple(children) if children.is_empty())
    }

    /// Combine two independent failures.
    ///
    /// Nested `Multiple`s are flattened and the empty `Multiple` is dropped, so
    /// combining with [`Failure::none`] returns the other failure unchanged.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        let mut children = self.into_children();
        children.extend(other.into_children());
        if children.len() == 1 {
            children.remove(0)
        } else {
            Self::Multiple(children)
        }
    }

    fn into_children(self) -> Vec<Self> {
        match self {
            Self::Multiple(children) => children.into_iter().flat_map(Self::into_children).collect(),
            single => vec![single],
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Forbidden(_) => "Forbidden",
            Self::NotFound(_) => "NotFound",
            Self::Conflict(_) => "Conflict",
            Self::Internal(_) => "Internal",
            Self::InvalidInput(_) => "InvalidInput",
            Self::Cancelled(_) => "Cancelled",
            Self::Multiple(_) => "Multiple",
        };
        write!(f, "{kind}: {}", self.message())
    }
}

impl std::error::Error for Failure {}

impl FromIterator<Failure> for Failure {
    fn from_iter<I: IntoIterator<Item = Failure>>(iter: I) -> Self {
        iter.into_iter().fold(Self::none(), Self::combine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn none_is_identity() {
        let failure = Failure::conflict("stale");
        assert_eq!(failure.clone().combine(Failure::none()), failure);
        assert_eq!(Failure::none().combine(failure.clone()), failure);
        assert!(Failure::none().combine(Failure::none()).is_none());
    }

    #[test]
    fn combine_flattens_nested_multiples() {
        let nested = Failure::Multiple(vec![
            Failure::forbidden("a"),
            Failure::Multiple(vec![Failure::invalid_input("b"), Failure::none()]),
        ]);
        let combined = nested.combine(Failure::internal("c"));
        assert_eq!(
            combined,
            Failure::Multiple(vec![
                Failure::forbidden("a"),
                Failure::invalid_input("b"),
                Failure::internal("c"),
            ])
        );
    }

    #[test]
    fn collect_combines_all() {
        let failure: Failure = vec![Failure::not_found("x"), Failure::cancelled("y")]
            .into_iter()
            .collect();
        assert_eq!(failure.message(), "x; y");
    }

    #[test]
    fn display_names_the_kind() {
        assert_eq!(
            Failure::not_found("account A").to_string(),
            "NotFound: account A"
        );
    }

    fn leaf() -> impl Strategy<Value = Failure> {
        prop_oneof![
            "[a-z]{1,4}".prop_map(Failure::Forbidden),
            "[a-z]{1,4}".prop_map(Failure::NotFound),
            "[a-z]{1,4}".prop_map(Failure::Conflict),
        ]
    }

    fn failure() -> impl Strategy<Value = Failure> {
        leaf().prop_recursive(3, 16, 4, |inner| {
            prop::collection::vec(inner, 0..4).prop_map(Failure::Multiple)
        })
    }

    fn leaves(failure: &Failure) -> Vec<Failure> {
        match failure {
            Failure::Multiple(children) => children.iter().flat_map(leaves).collect(),
            single => vec![single.clone()],
        }
    }

    proptest! {
        #[test]
        fn combine_is_associative(a in failure(), b in failure(), c in failure()) {
            let left = a.clone().combine(b.clone()).combine(c.clone());
            let right = a.combine(b.combine(c));
            prop_assert_eq!(left, right);
        }

        #[test]
        fn combine_never_nests(a in failure(), b in failure()) {
            let expected: Vec<Failure> = leaves(&a).into_iter().chain(leaves(&b)).collect();
            match a.combine(b) {
                Failure::Multiple(children) => {
                    prop_assert!(children.iter().all(|c| !matches!(c, Failure::Multiple(_))));
                    prop_assert_eq!(children, expected);
                }
                single => prop_assert_eq!(vec![single], expected),
            }
        }
    }
}
