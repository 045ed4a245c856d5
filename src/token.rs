//! Token identities for requestable dependencies.

use std::any::TypeId;
use std::borrow::Cow;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::scope::Scope;

/// Immutable, hashable identity for a requestable dependency.
///
/// A token couples a human-readable name with the declared Rust type, a
/// lifetime [`Scope`], an optional qualifier, and an ordered set of tags.
/// Hash and equality derive from that full tuple, and the hash is computed
/// once at construction, so tokens are cheap map keys on the resolution
/// hot path. Two distinct `Token` values built from identical tuples are
/// interchangeable for registration and resolution.
///
/// # Examples
///
/// ```rust
/// use stratum_di::{Scope, Token};
///
/// struct Database;
///
/// let a = Token::<Database>::singleton("db");
/// let b = Token::<Database>::singleton("db");
/// // Identical tuples are the same identity, whatever object they live in.
/// assert_eq!(a.raw(), b.raw());
///
/// let primary = Token::<Database>::builder("db")
///     .in_scope(Scope::Singleton)
///     .qualifier("primary")
///     .tag("infra")
///     .build();
/// // A qualifier makes a distinct identity.
/// assert_ne!(a.raw(), primary.raw());
/// ```
pub struct Token<T> {
    raw: RawToken,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Token<T> {
    /// Creates a token with the given name and scope.
    pub fn new(name: impl Into<Cow<'static, str>>, scope: Scope) -> Self {
        Self::builder(name).in_scope(scope).build()
    }

    /// Creates a singleton-scoped token.
    pub fn singleton(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, Scope::Singleton)
    }

    /// Creates a session-scoped token.
    pub fn session(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, Scope::Session)
    }

    /// Creates a request-scoped token.
    pub fn request(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, Scope::Request)
    }

    /// Creates a transient-scoped token.
    pub fn transient(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, Scope::Transient)
    }

    /// Starts building a token with a qualifier and/or tags.
    pub fn builder(name: impl Into<Cow<'static, str>>) -> TokenBuilder<T> {
        TokenBuilder {
            name: name.into(),
            scope: Scope::Transient,
            qualifier: None,
            tags: Vec::new(),
            _marker: PhantomData,
        }
    }
}

impl<T> Token<T> {
    /// The token's name.
    pub fn name(&self) -> &str {
        self.raw.name()
    }

    /// The token's lifetime tier.
    pub fn scope(&self) -> Scope {
        self.raw.scope()
    }

    /// The optional qualifier distinguishing same-named, same-typed tokens.
    pub fn qualifier(&self) -> Option<&str> {
        self.raw.qualifier()
    }

    /// The token's tags, in declaration order.
    pub fn tags(&self) -> impl Iterator<Item = &str> + '_ {
        self.raw.tags()
    }

    /// The type-erased identity, cheap to clone.
    pub fn raw(&self) -> RawToken {
        self.raw.clone()
    }

    /// Borrows the type-erased identity.
    pub fn as_raw(&self) -> &RawToken {
        &self.raw
    }
}

impl<T> Clone for Token<T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for Token<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Token<T> {}

impl<T> Hash for Token<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> fmt::Debug for Token<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.raw, f)
    }
}

impl<T> fmt::Display for Token<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.raw, f)
    }
}

/// Fluent construction for [`Token`] identities carrying a qualifier or tags.
pub struct TokenBuilder<T> {
    name: Cow<'static, str>,
    scope: Scope,
    qualifier: Option<Cow<'static, str>>,
    tags: Vec<Cow<'static, str>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> TokenBuilder<T> {
    /// Sets the lifetime tier (defaults to [`Scope::Transient`]).
    pub fn in_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the qualifier.
    pub fn qualifier(mut self, qualifier: impl Into<Cow<'static, str>>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// Appends a tag. Duplicates are dropped, first occurrence wins.
    pub fn tag(mut self, tag: impl Into<Cow<'static, str>>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Finalizes the identity, computing its hash once.
    pub fn build(self) -> Token<T> {
        let mut tags = self.tags;
        let mut seen = Vec::with_capacity(tags.len());
        tags.retain(|t| {
            if seen.contains(t) {
                false
            } else {
                seen.push(t.clone());
                true
            }
        });
        let inner = TokenInner::new::<T>(self.name, self.scope, self.qualifier, tags.into());
        Token {
            raw: RawToken(Arc::new(inner)),
            _marker: PhantomData,
        }
    }
}

pub(crate) struct TokenInner {
    name: Cow<'static, str>,
    type_id: TypeId,
    type_name: &'static str,
    scope: Scope,
    qualifier: Option<Cow<'static, str>>,
    tags: Box<[Cow<'static, str>]>,
    hash: u64,
}

impl TokenInner {
    fn new<T: 'static>(
        name: Cow<'static, str>,
        scope: Scope,
        qualifier: Option<Cow<'static, str>>,
        tags: Box<[Cow<'static, str>]>,
    ) -> Self {
        let type_id = TypeId::of::<T>();
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        type_id.hash(&mut hasher);
        scope.hash(&mut hasher);
        qualifier.hash(&mut hasher);
        tags.hash(&mut hasher);
        Self {
            name,
            type_id,
            type_name: std::any::type_name::<T>(),
            scope,
            qualifier,
            tags,
            hash: hasher.finish(),
        }
    }
}

/// Type-erased token identity, used as the registry and cache key and in
/// error diagnostics. Cheap to clone (`Arc` internally).
#[derive(Clone)]
pub struct RawToken(Arc<TokenInner>);

impl RawToken {
    /// The token's name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The declared type's `TypeId`.
    pub fn type_id(&self) -> TypeId {
        self.0.type_id
    }

    /// The declared type's name, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.0.type_name
    }

    /// The token's lifetime tier.
    pub fn scope(&self) -> Scope {
        self.0.scope
    }

    /// The optional qualifier.
    pub fn qualifier(&self) -> Option<&str> {
        self.0.qualifier.as_deref()
    }

    /// The token's tags, in declaration order.
    pub fn tags(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.tags.iter().map(|t| t.as_ref())
    }
}

impl PartialEq for RawToken {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        // Precomputed hashes disagree for almost every non-equal pair.
        self.0.hash == other.0.hash
            && self.0.type_id == other.0.type_id
            && self.0.scope == other.0.scope
            && self.0.name == other.0.name
            && self.0.qualifier == other.0.qualifier
            && self.0.tags == other.0.tags
    }
}

impl Eq for RawToken {}

impl Hash for RawToken {
    #[inline(always)]
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Debug for RawToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawToken")
            .field("name", &self.0.name)
            .field("type", &self.0.type_name)
            .field("scope", &self.0.scope)
            .field("qualifier", &self.0.qualifier)
            .finish()
    }
}

impl fmt::Display for RawToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.qualifier() {
            Some(q) => write!(f, "{}@{}", self.name(), q),
            None => f.write_str(self.name()),
        }
    }
}
