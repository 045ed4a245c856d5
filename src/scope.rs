//! Lifetime tier definitions.

use std::fmt;

/// Lifetime tiers controlling instance caching behavior.
///
/// Tiers are ordered by lifetime breadth: a `Singleton` outlives a `Session`,
/// which outlives a `Request`; `Transient` instances are never cached at all.
/// The derived ordering follows breadth, so `Scope::Singleton > Scope::Request`.
///
/// # Tier Characteristics
///
/// - **Singleton**: one instance per container, cached until the container closes
/// - **Session**: one instance per entered session layer
/// - **Request**: one instance per entered request layer
/// - **Transient**: a fresh instance on every resolution, never cached
///
/// # Examples
///
/// ```rust
/// use stratum_di::Scope;
///
/// assert!(Scope::Singleton > Scope::Session);
/// assert!(Scope::Session > Scope::Request);
/// assert!(Scope::Request > Scope::Transient);
/// assert!(Scope::Singleton.outlives(Scope::Request));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    /// New instance per resolution, never cached.
    Transient,
    /// Single instance per entered request layer.
    Request,
    /// Single instance per entered session layer.
    Session,
    /// Single instance per container, cached until close.
    Singleton,
}

impl Scope {
    /// True when `self` is a strictly broader tier than `other`.
    pub fn outlives(self, other: Scope) -> bool {
        self > other
    }

    /// True for the tiers that live inside an entered context layer.
    pub fn is_context_bound(self) -> bool {
        matches!(self, Scope::Session | Scope::Request)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scope::Transient => "transient",
            Scope::Request => "request",
            Scope::Session => "session",
            Scope::Singleton => "singleton",
        };
        f.write_str(s)
    }
}

/// The enterable subset of [`Scope`]: the tiers that own a context layer.
///
/// `Singleton` is always active (the container itself) and `Transient` never
/// caches, so only sessions and requests are entered and exited explicitly.
///
/// # Examples
///
/// ```rust
/// use stratum_di::{Container, ScopeKind};
///
/// let container = Container::new();
/// let guard = container.enter_scope(ScopeKind::Request);
/// assert_eq!(guard.kind(), ScopeKind::Request);
/// guard.close().unwrap();
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// A session layer, typically spanning many requests.
    Session,
    /// A request layer, the innermost cache tier.
    Request,
}

impl ScopeKind {
    /// The [`Scope`] tier this kind of layer caches.
    pub fn as_scope(self) -> Scope {
        match self {
            ScopeKind::Session => Scope::Session,
            ScopeKind::Request => Scope::Request,
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScopeKind::Session => "session",
            ScopeKind::Request => "request",
        };
        f.write_str(s)
    }
}
