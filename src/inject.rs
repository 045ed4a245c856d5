//! Injected callables with wrap-time parameter classification.
//!
//! Wrapping captures the ordered (parameter, token) list exactly once;
//! calling resolves whatever was not supplied explicitly against the
//! currently active scope context, discovered through the same
//! task/thread-local state the rest of the resolver uses.

use std::future::Future;
use std::sync::Arc;

use crate::container::Container;
use crate::error::DiResult;
use crate::token::Token;

/// Tuple of `&Token<T>` references accepted at wrap time.
pub trait TokenRefs {
    /// The owned token tuple captured inside the wrapper.
    type Owned: TokenBundle;
    /// Clones the referenced tokens into the wrapper.
    fn to_owned_bundle(&self) -> Self::Owned;
}

/// An ordered tuple of tokens resolvable as one unit.
pub trait TokenBundle: Send + Sync + 'static {
    /// The resolved instances, positionally matching the tokens.
    type Resolved;
    /// Explicitly supplied arguments; `None` entries are resolved.
    type Partial;

    /// Resolves every token against the active scope context.
    fn resolve(&self, container: &Container) -> DiResult<Self::Resolved>;

    /// Resolves pending tokens, keeping explicitly supplied entries as-is.
    fn resolve_with(&self, container: &Container, partial: Self::Partial)
        -> DiResult<Self::Resolved>;
}

/// A wrapped synchronous callable with injectable parameters.
///
/// Built by [`Container::inject`]; the sync/async nature of the wrapper is
/// fixed at wrap time by which constructor was used.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use stratum_di::{Container, Token};
///
/// struct Greeter { prefix: String }
///
/// let container = Container::new();
/// let greeter = Token::<Greeter>::singleton("greeter");
/// container
///     .provide(&greeter)
///     .factory(|_| Ok(Greeter { prefix: "hello".into() }))
///     .unwrap();
///
/// let handler = container.inject((&greeter,), |g: Arc<Greeter>| {
///     format!("{}, world", g.prefix)
/// });
/// assert_eq!(handler.call().unwrap(), "hello, world");
///
/// // Explicitly supplied arguments always win.
/// let out = handler
///     .call_with((Some(Arc::new(Greeter { prefix: "hi".into() })),))
///     .unwrap();
/// assert_eq!(out, "hi, world");
/// ```
pub struct Injected<B, F> {
    container: Container,
    tokens: B,
    f: F,
}

/// A wrapped asynchronous callable with injectable parameters.
///
/// Built by [`Container::inject_async`]; pending tokens resolve through the
/// async path, so async factories are reachable.
pub struct InjectedAsync<B, F> {
    container: Container,
    tokens: B,
    f: F,
}

impl Container {
    /// Wraps a synchronous callable, classifying its injectable parameters
    /// once. Call time only resolves and invokes.
    pub fn inject<P: TokenRefs, F>(&self, tokens: P, f: F) -> Injected<P::Owned, F> {
        Injected {
            container: self.clone(),
            tokens: tokens.to_owned_bundle(),
            f,
        }
    }

    /// Wraps an asynchronous callable, classifying its injectable parameters
    /// once.
    pub fn inject_async<P: TokenRefs, F>(&self, tokens: P, f: F) -> InjectedAsync<P::Owned, F> {
        InjectedAsync {
            container: self.clone(),
            tokens: tokens.to_owned_bundle(),
            f,
        }
    }
}

macro_rules! impl_token_bundle {
    ( $( ($T:ident, $value:ident, $idx:tt) ),+ ) => {
        impl<'a, $($T: Send + Sync + 'static),+> TokenRefs for ($(&'a Token<$T>,)+) {
            type Owned = ($(Token<$T>,)+);

            fn to_owned_bundle(&self) -> Self::Owned {
                ($((*self.$idx).clone(),)+)
            }
        }

        impl<$($T: Send + Sync + 'static),+> TokenBundle for ($(Token<$T>,)+) {
            type Resolved = ($(Arc<$T>,)+);
            type Partial = ($(Option<Arc<$T>>,)+);

            fn resolve(&self, container: &Container) -> DiResult<Self::Resolved> {
                Ok(($(container.get(&self.$idx)?,)+))
            }

            fn resolve_with(
                &self,
                container: &Container,
                partial: Self::Partial,
            ) -> DiResult<Self::Resolved> {
                Ok(($(
                    match partial.$idx {
                        Some(explicit) => explicit,
                        None => container.get(&self.$idx)?,
                    },
                )+))
            }
        }

        impl<F, R, $($T: Send + Sync + 'static),+> Injected<($(Token<$T>,)+), F>
        where
            F: Fn($(Arc<$T>),+) -> R,
        {
            /// Resolves every parameter and invokes the callable.
            pub fn call(&self) -> DiResult<R> {
                let ($($value,)+) = self.tokens.resolve(&self.container)?;
                Ok((self.f)($($value),+))
            }

            /// Invokes with explicitly supplied arguments taking precedence;
            /// `None` entries are resolved.
            pub fn call_with(&self, partial: ($(Option<Arc<$T>>,)+)) -> DiResult<R> {
                let ($($value,)+) = self.tokens.resolve_with(&self.container, partial)?;
                Ok((self.f)($($value),+))
            }
        }

        impl<F, Fut, R, $($T: Send + Sync + 'static),+> InjectedAsync<($(Token<$T>,)+), F>
        where
            F: Fn($(Arc<$T>),+) -> Fut,
            Fut: Future<Output = R>,
        {
            /// Resolves every parameter through the async path and awaits
            /// the callable.
            pub async fn call(&self) -> DiResult<R> {
                $(let $value = self.container.get_async(&self.tokens.$idx).await?;)+
                Ok((self.f)($($value),+).await)
            }

            /// Async invocation with explicitly supplied arguments taking
            /// precedence; `None` entries are resolved.
            pub async fn call_with(&self, partial: ($(Option<Arc<$T>>,)+)) -> DiResult<R> {
                $(
                    let $value = match partial.$idx {
                        Some(explicit) => explicit,
                        None => self.container.get_async(&self.tokens.$idx).await?,
                    };
                )+
                Ok((self.f)($($value),+).await)
            }
        }
    };
}

impl_token_bundle!((T1, v1, 0));
impl_token_bundle!((T1, v1, 0), (T2, v2, 1));
impl_token_bundle!((T1, v1, 0), (T2, v2, 1), (T3, v3, 2));
impl_token_bundle!((T1, v1, 0), (T2, v2, 1), (T3, v3, 2), (T4, v4, 3));
impl_token_bundle!((T1, v1, 0), (T2, v2, 1), (T3, v3, 2), (T4, v4, 3), (T5, v5, 4));
impl_token_bundle!(
    (T1, v1, 0),
    (T2, v2, 1),
    (T3, v3, 2),
    (T4, v4, 3),
    (T5, v5, 4),
    (T6, v6, 5)
);
