//! Error types for the dependency-resolution runtime.

use std::fmt;

use thiserror::Error;

use crate::scope::{Scope, ScopeKind};
use crate::token::RawToken;

/// Boxed error for factory and cleanup failures raised by user code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for resolution operations.
pub type DiResult<T> = Result<T, DiError>;

/// The ordered list of tokens visited during one resolution, innermost last.
///
/// Carried by every resolution error so failures are diagnosable without
/// additional instrumentation. Displays as `a -> b -> c`.
#[derive(Debug, Clone, Default)]
pub struct ResolutionChain(Vec<RawToken>);

impl ResolutionChain {
    pub(crate) fn new(tokens: Vec<RawToken>) -> Self {
        Self(tokens)
    }

    /// The visited tokens, in traversal order.
    pub fn tokens(&self) -> &[RawToken] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for ResolutionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            fmt::Display::fmt(token, f)?;
        }
        Ok(())
    }
}

fn suggestion_fragment(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!("; did you mean {}?", suggestions.join(", "))
    }
}

/// Dependency-resolution errors.
///
/// Every resolution variant carries the token it failed on and the complete
/// resolution chain as structured fields, so callers can render diagnostics
/// without re-deriving context.
///
/// # Examples
///
/// ```rust
/// use stratum_di::{Container, DiError, Token};
///
/// struct Missing;
///
/// let container = Container::new();
/// let token = Token::<Missing>::singleton("missing");
/// match container.get(&token) {
///     Err(DiError::UnresolvedToken { token, .. }) => {
///         assert_eq!(token.name(), "missing");
///     }
///     Err(other) => panic!("expected UnresolvedToken, got {other}"),
///     Ok(_) => panic!("resolved a token with no provider"),
/// }
/// ```
#[derive(Debug, Error)]
pub enum DiError {
    /// A provider is already bound to this token.
    #[error("provider already registered for `{token}`")]
    RegistrationConflict {
        /// The token that was already bound.
        token: RawToken,
    },

    /// No provider is registered for the requested token.
    #[error("no provider registered for `{token}` (chain: {chain}){}", suggestion_fragment(.suggestions))]
    UnresolvedToken {
        /// The token that could not be resolved.
        token: RawToken,
        /// The resolution chain that led here.
        chain: ResolutionChain,
        /// Registered token names within edit distance of the request.
        suggestions: Vec<String>,
    },

    /// The token is already on the active resolution path.
    #[error("circular dependency detected: {chain}")]
    CircularDependency {
        /// The full cycle, ending with the repeated token.
        chain: ResolutionChain,
    },

    /// A session- or request-scoped provider was resolved without an active
    /// context layer of that kind.
    #[error("no active {kind} scope while resolving `{token}` (chain: {chain})")]
    ScopeContextMissing {
        /// The token that required the layer.
        token: RawToken,
        /// The kind of layer that was missing.
        kind: ScopeKind,
        /// The resolution chain that led here.
        chain: ResolutionChain,
    },

    /// An async-only factory was reached from the synchronous path.
    #[error("provider for `{token}` is async; resolve it with `get_async` (chain: {chain})")]
    AsyncResolutionRequired {
        /// The token bound to the async factory.
        token: RawToken,
        /// The resolution chain that led here.
        chain: ResolutionChain,
    },

    /// A context-bound dependency would be captured by a broader-scoped
    /// provider. Register the provider with `allow_capture()` to opt out.
    #[error(
        "`{dependency}` ({dependency_scope}) cannot be captured by `{token}` ({scope}) \
         without allow_capture() (chain: {chain})"
    )]
    ScopeCapture {
        /// The broader-scoped provider under construction.
        token: RawToken,
        /// Its lifetime tier.
        scope: Scope,
        /// The narrower dependency being captured.
        dependency: RawToken,
        /// The dependency's lifetime tier.
        dependency_scope: Scope,
        /// The resolution chain that led here.
        chain: ResolutionChain,
    },

    /// The cached instance does not downcast to the token's declared type.
    #[error("cached instance for `{token}` is not a {expected}")]
    TypeMismatch {
        /// The token whose cache entry was inconsistent.
        token: RawToken,
        /// The declared type name.
        expected: &'static str,
    },

    /// A factory failed with a non-resolution error.
    #[error("factory for `{token}` failed: {source} (chain: {chain})")]
    Factory {
        /// The token whose factory failed.
        token: RawToken,
        /// The resolution chain that led here.
        chain: ResolutionChain,
        /// The underlying factory error.
        #[source]
        source: BoxError,
    },

    /// A foreign error raised inside a factory, wrapped with token and chain
    /// context by the resolver before it propagates.
    #[error("provider error: {0}")]
    Other(#[source] BoxError),

    /// Teardown failures collected across a full LIFO cleanup pass.
    #[error(transparent)]
    Cleanup(#[from] AggregateCleanupError),
}

impl DiError {
    /// Wraps a foreign error for propagation out of a factory with `?`.
    pub fn other(err: impl Into<BoxError>) -> Self {
        DiError::Other(err.into())
    }

    /// The resolution chain, for variants that carry one.
    pub fn chain(&self) -> Option<&ResolutionChain> {
        match self {
            DiError::UnresolvedToken { chain, .. }
            | DiError::CircularDependency { chain }
            | DiError::ScopeContextMissing { chain, .. }
            | DiError::AsyncResolutionRequired { chain, .. }
            | DiError::ScopeCapture { chain, .. }
            | DiError::Factory { chain, .. } => Some(chain),
            _ => None,
        }
    }
}

/// One failed teardown entry inside an [`AggregateCleanupError`].
#[derive(Debug, Error)]
#[error("`{token}` (seq {seq}): {reason}")]
pub struct CleanupFailure {
    /// The token whose instance failed to tear down.
    pub token: RawToken,
    /// The entry's publish-time sequence number within its layer.
    pub seq: u64,
    /// The stringified failure.
    pub reason: String,
}

/// Teardown failures collected after a complete LIFO pass over one layer.
///
/// A failing entry never stops the pass; every entry is attempted and the
/// failures are raised together afterwards.
#[derive(Debug)]
pub struct AggregateCleanupError {
    /// The failed entries, in teardown (descending-sequence) order.
    pub failures: Vec<CleanupFailure>,
}

impl fmt::Display for AggregateCleanupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cleanup failed for {} entr{}: ", self.failures.len(), if self.failures.len() == 1 { "y" } else { "ies" })?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            fmt::Display::fmt(failure, f)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateCleanupError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;

    struct A;
    struct B;

    #[test]
    fn chain_display_uses_arrows() {
        let chain = ResolutionChain::new(vec![
            Token::<A>::singleton("a").raw(),
            Token::<B>::singleton("b").raw(),
            Token::<A>::singleton("a").raw(),
        ]);
        assert_eq!(chain.to_string(), "a -> b -> a");
    }

    #[test]
    fn unresolved_renders_suggestions() {
        let err = DiError::UnresolvedToken {
            token: Token::<A>::singleton("datbase").raw(),
            chain: ResolutionChain::new(vec![Token::<A>::singleton("datbase").raw()]),
            suggestions: vec!["database".to_string()],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("did you mean database?"), "{rendered}");
    }

    #[test]
    fn aggregate_lists_every_failure() {
        let err = AggregateCleanupError {
            failures: vec![
                CleanupFailure {
                    token: Token::<A>::singleton("a").raw(),
                    seq: 2,
                    reason: "boom".into(),
                },
                CleanupFailure {
                    token: Token::<B>::singleton("b").raw(),
                    seq: 1,
                    reason: "bang".into(),
                },
            ],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("2 entries"));
        assert!(rendered.contains("boom") && rendered.contains("bang"));
    }
}
