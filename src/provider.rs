//! Provider records and the registration builder.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use crate::cleanup::{AnyArc, AsyncDispose, CleanupHook, CleanupStrategy, Dispose};
use crate::container::Container;
use crate::error::DiResult;
use crate::resolver::{AsyncResolverCtx, ResolverCtx};
use crate::scope::Scope;
use crate::token::{RawToken, Token};

pub(crate) type BoxResolveFuture = Pin<Box<dyn Future<Output = DiResult<AnyArc>> + Send>>;

/// Type-erased factory, sync or async. Async-ness is fixed by the variant,
/// so the resolver never inspects the callable at resolution time.
pub(crate) enum Factory {
    Sync(Arc<dyn for<'a> Fn(&ResolverCtx<'a>) -> DiResult<AnyArc> + Send + Sync>),
    Async(Arc<dyn Fn(AsyncResolverCtx) -> BoxResolveFuture + Send + Sync>),
}

impl Factory {
    pub(crate) fn is_async(&self) -> bool {
        matches!(self, Factory::Async(_))
    }
}

/// Immutable binding of a token to a factory, its scope, cleanup strategy,
/// precomputed async-ness, and declared dependency tokens.
///
/// Records are immutable once registered; replacing one fails with
/// [`crate::DiError::RegistrationConflict`] unless done through a stack-scoped
/// override ([`Container::push_override`]).
pub struct ProviderRecord {
    pub(crate) token: RawToken,
    pub(crate) scope: Scope,
    pub(crate) factory: Factory,
    pub(crate) hook: CleanupHook,
    pub(crate) strategy: CleanupStrategy,
    pub(crate) dependencies: Box<[RawToken]>,
    pub(crate) allow_capture: bool,
}

impl ProviderRecord {
    /// The bound token.
    pub fn token(&self) -> &RawToken {
        &self.token
    }

    /// The caching tier instances of this provider live in.
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// The declared cleanup strategy.
    pub fn cleanup(&self) -> CleanupStrategy {
        self.strategy
    }

    /// Whether the factory must be resolved through the async path.
    pub fn is_async(&self) -> bool {
        self.factory.is_async()
    }

    /// Dependency tokens declared at registration, for diagnostics and the
    /// [`Container::check`] pre-flight.
    pub fn dependencies(&self) -> &[RawToken] {
        &self.dependencies
    }
}

/// Fluent registration of a provider for one token.
///
/// Finish with [`factory`](ProviderBuilder::factory) or
/// [`async_factory`](ProviderBuilder::async_factory); both insert the record
/// and fail with [`crate::DiError::RegistrationConflict`] if the token is already
/// bound.
///
/// # Examples
///
/// ```rust
/// use stratum_di::{Container, Token};
///
/// struct Config { url: String }
/// struct Database { url: String }
///
/// let container = Container::new();
/// let config = Token::<Config>::singleton("config");
/// let db = Token::<Database>::singleton("db");
///
/// container
///     .provide(&config)
///     .factory(|_| Ok(Config { url: "postgres://localhost".into() }))
///     .unwrap();
/// container
///     .provide(&db)
///     .depends_on(&config)
///     .factory(|cx| {
///         let config = cx.get(&Token::<Config>::singleton("config"))?;
///         Ok(Database { url: config.url.clone() })
///     })
///     .unwrap();
///
/// let db = container.get(&db).unwrap();
/// assert_eq!(db.url, "postgres://localhost");
/// ```
pub struct ProviderBuilder<'c, T> {
    container: &'c Container,
    token: RawToken,
    hook: CleanupHook,
    strategy: CleanupStrategy,
    dependencies: Vec<RawToken>,
    allow_capture: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<'c, T: Send + Sync + 'static> ProviderBuilder<'c, T> {
    pub(crate) fn new(container: &'c Container, token: &Token<T>) -> Self {
        Self {
            container,
            token: token.raw(),
            hook: CleanupHook::None,
            strategy: CleanupStrategy::None,
            dependencies: Vec::new(),
            allow_capture: false,
            _marker: PhantomData,
        }
    }

    /// Declares a dependency token, recorded for diagnostics and the
    /// [`Container::check`] pre-flight. Declaring is optional; resolution
    /// always follows what the factory actually requests.
    pub fn depends_on<U>(mut self, dependency: &Token<U>) -> Self {
        self.dependencies.push(dependency.raw());
        self
    }

    /// Tears instances down through their [`Dispose`] implementation.
    pub fn dispose(mut self) -> Self
    where
        T: Dispose,
    {
        self.strategy = CleanupStrategy::SyncContext;
        self.hook = CleanupHook::Sync(Arc::new(|instance: &AnyArc| {
            match instance.clone().downcast::<T>() {
                Ok(typed) => typed.dispose(),
                Err(_) => Err("cleanup entry holds an unexpected type".into()),
            }
        }));
        self
    }

    /// Tears instances down through their [`AsyncDispose`] implementation.
    /// Valid only on the async teardown path.
    pub fn async_dispose(mut self) -> Self
    where
        T: AsyncDispose,
    {
        self.strategy = CleanupStrategy::AsyncContext;
        self.hook = CleanupHook::Async(Arc::new(|instance: AnyArc| {
            Box::pin(async move {
                match instance.downcast::<T>() {
                    Ok(typed) => typed.dispose().await,
                    Err(_) => Err("cleanup entry holds an unexpected type".into()),
                }
            })
        }));
        self
    }

    /// Tears instances down with an ad-hoc callback. Panics inside the
    /// callback are caught and collected like any other teardown failure.
    pub fn dispose_with(mut self, f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.strategy = CleanupStrategy::Callback;
        self.hook = CleanupHook::Sync(Arc::new(move |instance: &AnyArc| {
            match instance.downcast_ref::<T>() {
                Some(typed) => {
                    f(typed);
                    Ok(())
                }
                None => Err("cleanup entry holds an unexpected type".into()),
            }
        }));
        self
    }

    /// Permits session/request-scoped dependencies to be captured by this
    /// provider even when its own tier is broader.
    pub fn allow_capture(mut self) -> Self {
        self.allow_capture = true;
        self
    }

    /// Registers a synchronous factory and finishes the registration.
    pub fn factory<F>(self, f: F) -> DiResult<()>
    where
        F: for<'a> Fn(&ResolverCtx<'a>) -> DiResult<T> + Send + Sync + 'static,
    {
        self.container.register_record(ProviderRecord {
            scope: self.token.scope(),
            token: self.token,
            factory: Factory::Sync(Arc::new(move |cx: &ResolverCtx| -> DiResult<AnyArc> {
                f(cx).map(|value| Arc::new(value) as AnyArc)
            })),
            hook: self.hook,
            strategy: self.strategy,
            dependencies: self.dependencies.into(),
            allow_capture: self.allow_capture,
        })
    }

    /// Registers an asynchronous factory and finishes the registration.
    /// Instances bound this way resolve only through
    /// [`Container::get_async`]; the sync path fails fast with
    /// [`crate::DiError::AsyncResolutionRequired`].
    pub fn async_factory<F, Fut>(self, f: F) -> DiResult<()>
    where
        F: Fn(AsyncResolverCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DiResult<T>> + Send + 'static,
    {
        self.container.register_record(ProviderRecord {
            scope: self.token.scope(),
            token: self.token,
            factory: Factory::Async(Arc::new(move |cx: AsyncResolverCtx| -> BoxResolveFuture {
                let fut = f(cx);
                Box::pin(async move { fut.await.map(|value| Arc::new(value) as AnyArc) })
            })),
            hook: self.hook,
            strategy: self.strategy,
            dependencies: self.dependencies.into(),
            allow_capture: self.allow_capture,
        })
    }
}
