//! The recursive resolution algorithm and factory-facing resolver contexts.

use std::cell::RefCell;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::cleanup::AnyArc;
use crate::container::Container;
use crate::context::{OverrideFrame, ScopeChain};
use crate::error::{DiError, DiResult, ResolutionChain};
use crate::internal::suggest;
use crate::provider::{BoxResolveFuture, Factory, ProviderRecord};
use crate::scope::{Scope, ScopeKind};
use crate::token::{RawToken, Token};

/// Ordered tokens visited by the resolution in flight, used for cycle
/// detection and for the chain carried by every resolution error.
#[derive(Clone, Default)]
pub(crate) struct ResolutionPath {
    tokens: SmallVec<[RawToken; 8]>,
}

impl ResolutionPath {
    pub(crate) fn contains(&self, token: &RawToken) -> bool {
        self.tokens.iter().any(|t| t == token)
    }

    fn push(&mut self, token: RawToken) {
        self.tokens.push(token);
    }

    fn pop(&mut self) {
        self.tokens.pop();
    }

    /// Owned extension for the async path, where each recursion carries its
    /// own branch of the path.
    pub(crate) fn pushed(&self, token: RawToken) -> Self {
        let mut next = self.clone();
        next.push(token);
        next
    }

    pub(crate) fn to_chain(&self) -> ResolutionChain {
        ResolutionChain::new(self.tokens.iter().cloned().collect())
    }

    /// The chain closed with the token that resolution failed on.
    pub(crate) fn chain_with(&self, token: &RawToken) -> ResolutionChain {
        let mut tokens: Vec<RawToken> = self.tokens.iter().cloned().collect();
        tokens.push(token.clone());
        ResolutionChain::new(tokens)
    }
}

/// Push-on-construct, pop-on-drop frame so the sync path stays balanced on
/// every exit, including error returns.
struct PathFrame<'p> {
    path: &'p RefCell<ResolutionPath>,
}

impl<'p> PathFrame<'p> {
    fn push(path: &'p RefCell<ResolutionPath>, token: RawToken) -> Self {
        path.borrow_mut().push(token);
        Self { path }
    }
}

impl Drop for PathFrame<'_> {
    fn drop(&mut self) {
        self.path.borrow_mut().pop();
    }
}

/// Fails when a context-bound dependency would be cached beyond its tier.
fn check_capture(record: &ProviderRecord, dependency: &RawToken, path: &ResolutionPath) -> DiResult<()> {
    let dependency_scope = dependency.scope();
    if dependency_scope.is_context_bound()
        && record.scope > dependency_scope
        && !record.allow_capture
    {
        return Err(DiError::ScopeCapture {
            token: record.token.clone(),
            scope: record.scope,
            dependency: dependency.clone(),
            dependency_scope,
            chain: path.chain_with(dependency),
        });
    }
    Ok(())
}

/// Resolver view handed to synchronous factories.
///
/// Dependencies requested through it join the caller's resolution path, so
/// cycles are reported with the full chain, and are checked against the
/// requesting provider's tier for capture hazards.
///
/// # Examples
///
/// ```rust
/// use stratum_di::{Container, Token};
///
/// struct Logger;
/// struct Service { _logger: std::sync::Arc<Logger> }
///
/// let container = Container::new();
/// let logger = Token::<Logger>::singleton("logger");
/// let service = Token::<Service>::transient("service");
///
/// container.provide(&logger).factory(|_| Ok(Logger)).unwrap();
/// let logger_dep = logger.clone();
/// container
///     .provide(&service)
///     .factory(move |cx| Ok(Service { _logger: cx.get(&logger_dep)? }))
///     .unwrap();
///
/// assert!(container.get(&service).is_ok());
/// ```
pub struct ResolverCtx<'a> {
    pub(crate) container: &'a Container,
    pub(crate) chain: &'a ScopeChain,
    pub(crate) overrides: &'a [OverrideFrame],
    pub(crate) path: &'a RefCell<ResolutionPath>,
    pub(crate) record: &'a ProviderRecord,
}

impl<'a> ResolverCtx<'a> {
    /// Resolves a dependency on the synchronous path.
    pub fn get<T: Send + Sync + 'static>(&self, token: &Token<T>) -> DiResult<Arc<T>> {
        check_capture(self.record, token.as_raw(), &self.path.borrow())?;
        let any = self
            .container
            .resolve_sync(token.as_raw(), self.chain, self.overrides, self.path)?;
        downcast(token, any)
    }

    /// The container this resolution runs against.
    pub fn container(&self) -> &Container {
        self.container
    }
}

/// Resolver view handed to asynchronous factories. Owns clones of the
/// resolution state so it can move into the factory's future.
pub struct AsyncResolverCtx {
    pub(crate) container: Container,
    pub(crate) chain: ScopeChain,
    pub(crate) overrides: Arc<[OverrideFrame]>,
    pub(crate) path: ResolutionPath,
    pub(crate) record: Arc<ProviderRecord>,
}

impl AsyncResolverCtx {
    /// Resolves a dependency, awaiting async factories as needed.
    pub async fn get<T: Send + Sync + 'static>(&self, token: &Token<T>) -> DiResult<Arc<T>> {
        check_capture(&self.record, token.as_raw(), &self.path)?;
        let any = self
            .container
            .resolve_async_inner(
                token.raw(),
                self.chain.clone(),
                self.overrides.clone(),
                self.path.clone(),
            )
            .await?;
        downcast(token, any)
    }

    /// The container this resolution runs against.
    pub fn container(&self) -> &Container {
        &self.container
    }
}

pub(crate) fn downcast<T: Send + Sync + 'static>(token: &Token<T>, any: AnyArc) -> DiResult<Arc<T>> {
    any.downcast::<T>().map_err(|_| DiError::TypeMismatch {
        token: token.raw(),
        expected: std::any::type_name::<T>(),
    })
}

impl Container {
    /// Synchronous resolution, steps 1-8 of the core algorithm.
    pub(crate) fn resolve_sync(
        &self,
        token: &RawToken,
        chain: &ScopeChain,
        overrides: &[OverrideFrame],
        path: &RefCell<ResolutionPath>,
    ) -> DiResult<AnyArc> {
        if path.borrow().contains(token) {
            return Err(DiError::CircularDependency {
                chain: path.borrow().chain_with(token),
            });
        }

        // Lock-free fast path: overrides, entered layers, singleton cache.
        if let Some(frame) = overrides.iter().rev().find(|f| &f.token == token) {
            self.note_hit();
            return Ok(frame.value.clone());
        }
        if let Some(cached) = chain.probe(token) {
            self.note_hit();
            return Ok(cached);
        }
        if let Some(cached) = self.singleton_cached(token) {
            self.note_hit();
            return Ok(cached);
        }
        self.note_miss();

        let record = match self.registry().lookup(token) {
            Some(record) => record,
            None => return Err(self.unresolved(token, &path.borrow())),
        };

        let _frame = PathFrame::push(path, token.clone());
        tracing::debug!(token = %token, scope = %record.scope, "constructing instance");
        match record.scope {
            Scope::Singleton => self.construct_singleton_sync(&record, chain, overrides, path),
            Scope::Session => {
                self.construct_layered_sync(ScopeKind::Session, &record, chain, overrides, path)
            }
            Scope::Request => {
                self.construct_layered_sync(ScopeKind::Request, &record, chain, overrides, path)
            }
            Scope::Transient => {
                let value = self.invoke_sync(&record, chain, overrides, path)?;
                if !record.hook.is_none() {
                    match chain.innermost() {
                        Some(layer) => layer.push_cleanup(
                            record.token.clone(),
                            value.clone(),
                            record.hook.clone(),
                        ),
                        None => self.push_root_cleanup(
                            record.token.clone(),
                            value.clone(),
                            record.hook.clone(),
                        ),
                    }
                }
                Ok(value)
            }
        }
    }

    /// Double-checked singleton construction under the per-token sync lock.
    fn construct_singleton_sync(
        &self,
        record: &Arc<ProviderRecord>,
        chain: &ScopeChain,
        overrides: &[OverrideFrame],
        path: &RefCell<ResolutionPath>,
    ) -> DiResult<AnyArc> {
        let lock = self.construction_lock(&record.token);
        let _guard = lock.sync.lock();
        if let Some(cached) = self.singleton_cached(&record.token) {
            return Ok(cached);
        }
        let value = self.invoke_sync(record, chain, overrides, path)?;
        Ok(self.publish_singleton(&record.token, value, &record.hook))
    }

    fn construct_layered_sync(
        &self,
        kind: ScopeKind,
        record: &Arc<ProviderRecord>,
        chain: &ScopeChain,
        overrides: &[OverrideFrame],
        path: &RefCell<ResolutionPath>,
    ) -> DiResult<AnyArc> {
        let layer = match chain.layer_for(kind) {
            Some(layer) => layer.clone(),
            None => {
                return Err(DiError::ScopeContextMissing {
                    token: record.token.clone(),
                    kind,
                    chain: path.borrow().to_chain(),
                })
            }
        };
        if let Some(cached) = layer.get(&record.token) {
            return Ok(cached);
        }
        let value = self.invoke_sync(record, chain, overrides, path)?;
        Ok(layer.publish(&record.token, value, &record.hook))
    }

    fn invoke_sync(
        &self,
        record: &Arc<ProviderRecord>,
        chain: &ScopeChain,
        overrides: &[OverrideFrame],
        path: &RefCell<ResolutionPath>,
    ) -> DiResult<AnyArc> {
        let factory = match &record.factory {
            Factory::Sync(factory) => factory.clone(),
            Factory::Async(_) => {
                return Err(DiError::AsyncResolutionRequired {
                    token: record.token.clone(),
                    chain: path.borrow().to_chain(),
                })
            }
        };
        let cx = ResolverCtx {
            container: self,
            chain,
            overrides,
            path,
            record: &**record,
        };
        match factory(&cx) {
            Ok(value) => Ok(value),
            Err(DiError::Other(source)) => Err(DiError::Factory {
                token: record.token.clone(),
                chain: path.borrow().to_chain(),
                source,
            }),
            Err(other) => Err(other),
        }
    }

    /// Asynchronous resolution; boxed for recursion through factory futures.
    pub(crate) fn resolve_async_inner(
        &self,
        token: RawToken,
        chain: ScopeChain,
        overrides: Arc<[OverrideFrame]>,
        path: ResolutionPath,
    ) -> BoxResolveFuture {
        let container = self.clone();
        Box::pin(async move {
            if path.contains(&token) {
                return Err(DiError::CircularDependency {
                    chain: path.chain_with(&token),
                });
            }

            if let Some(frame) = overrides.iter().rev().find(|f| f.token == token) {
                container.note_hit();
                return Ok(frame.value.clone());
            }
            if let Some(cached) = chain.probe(&token) {
                container.note_hit();
                return Ok(cached);
            }
            if let Some(cached) = container.singleton_cached(&token) {
                container.note_hit();
                return Ok(cached);
            }
            container.note_miss();

            let record = match container.registry().lookup(&token) {
                Some(record) => record,
                None => return Err(container.unresolved(&token, &path)),
            };

            let path = path.pushed(token.clone());
            tracing::debug!(token = %token, scope = %record.scope, "constructing instance");
            match record.scope {
                Scope::Singleton => {
                    let lock = container.construction_lock(&record.token);
                    // Cancel-safe: dropping this future releases the guard
                    // without publishing a partially constructed instance.
                    let _guard = lock.task.lock().await;
                    if let Some(cached) = container.singleton_cached(&record.token) {
                        return Ok(cached);
                    }
                    let value = container
                        .invoke_async(&record, &chain, &overrides, &path)
                        .await?;
                    Ok(container.publish_singleton(&record.token, value, &record.hook))
                }
                Scope::Session | Scope::Request => {
                    let kind = if record.scope == Scope::Session {
                        ScopeKind::Session
                    } else {
                        ScopeKind::Request
                    };
                    let layer = match chain.layer_for(kind) {
                        Some(layer) => layer.clone(),
                        None => {
                            return Err(DiError::ScopeContextMissing {
                                token: record.token.clone(),
                                kind,
                                chain: path.to_chain(),
                            })
                        }
                    };
                    if let Some(cached) = layer.get(&record.token) {
                        return Ok(cached);
                    }
                    let value = container
                        .invoke_async(&record, &chain, &overrides, &path)
                        .await?;
                    Ok(layer.publish(&record.token, value, &record.hook))
                }
                Scope::Transient => {
                    let value = container
                        .invoke_async(&record, &chain, &overrides, &path)
                        .await?;
                    if !record.hook.is_none() {
                        match chain.innermost() {
                            Some(layer) => layer.push_cleanup(
                                record.token.clone(),
                                value.clone(),
                                record.hook.clone(),
                            ),
                            None => container.push_root_cleanup(
                                record.token.clone(),
                                value.clone(),
                                record.hook.clone(),
                            ),
                        }
                    }
                    Ok(value)
                }
            }
        })
    }

    async fn invoke_async(
        &self,
        record: &Arc<ProviderRecord>,
        chain: &ScopeChain,
        overrides: &Arc<[OverrideFrame]>,
        path: &ResolutionPath,
    ) -> DiResult<AnyArc> {
        match &record.factory {
            Factory::Sync(factory) => {
                let factory = factory.clone();
                let result = {
                    let cell = RefCell::new(path.clone());
                    let cx = ResolverCtx {
                        container: self,
                        chain,
                        overrides: &**overrides,
                        path: &cell,
                        record: &**record,
                    };
                    factory(&cx)
                };
                match result {
                    Ok(value) => Ok(value),
                    Err(DiError::Other(source)) => Err(DiError::Factory {
                        token: record.token.clone(),
                        chain: path.to_chain(),
                        source,
                    }),
                    Err(other) => Err(other),
                }
            }
            Factory::Async(factory) => {
                let cx = AsyncResolverCtx {
                    container: self.clone(),
                    chain: chain.clone(),
                    overrides: overrides.clone(),
                    path: path.clone(),
                    record: record.clone(),
                };
                match factory(cx).await {
                    Ok(value) => Ok(value),
                    Err(DiError::Other(source)) => Err(DiError::Factory {
                        token: record.token.clone(),
                        chain: path.to_chain(),
                        source,
                    }),
                    Err(other) => Err(other),
                }
            }
        }
    }

    fn unresolved(&self, token: &RawToken, path: &ResolutionPath) -> DiError {
        let suggestions = suggest::suggestions_for(token.name(), self.registry().token_names());
        DiError::UnresolvedToken {
            token: token.clone(),
            chain: path.chain_with(token),
            suggestions,
        }
    }
}
