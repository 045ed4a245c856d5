//! The container: registration surface, caches, and scope entry points.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::cleanup::{self, AnyArc, CleanupHook, CleanupLedger};
use crate::context::{self, OverrideGuard, ScopeGuard};
use crate::error::{DiError, DiResult, ResolutionChain};
use crate::internal::suggest;
use crate::provider::{ProviderBuilder, ProviderRecord};
use crate::registry::Registry;
use crate::resolver::{self, ResolutionPath};
use crate::scope::ScopeKind;
use crate::token::{RawToken, Token};

/// Per-token construction lock pair: the sync mutex serves blocking callers,
/// the task mutex serves async callers and releases cleanly on cancellation.
#[derive(Default)]
pub(crate) struct ConstructionLock {
    pub(crate) sync: Mutex<()>,
    pub(crate) task: tokio::sync::Mutex<()>,
}

/// The container-wide singleton tier: instance cache, lazily created
/// per-token construction locks, and the root cleanup ledger.
struct SingletonTier {
    instances: RwLock<HashMap<RawToken, AnyArc>>,
    locks: Mutex<HashMap<RawToken, Arc<ConstructionLock>>>,
    ledger: Mutex<CleanupLedger>,
}

#[derive(Default)]
struct Stats {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Cache and registration counters, a point-in-time snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ContainerStats {
    /// Registered provider records.
    pub providers: usize,
    /// Cached singleton instances.
    pub singletons: usize,
    /// Resolutions served from a cache or an override.
    pub cache_hits: u64,
    /// Resolutions that had to construct.
    pub cache_misses: u64,
}

impl ContainerStats {
    /// Fraction of resolutions served without construction.
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

/// A reusable group of registrations, installed under one serialized
/// registration pass so modules may compose further modules.
pub trait Module {
    /// Registers this module's providers.
    fn register(&self, container: &Container) -> DiResult<()>;
}

struct ContainerInner {
    registry: Registry,
    singletons: SingletonTier,
    stats: Stats,
}

/// Token-based dependency-resolution container.
///
/// The container owns the provider registry and the singleton tier; session
/// and request tiers are entered per task or thread through
/// [`enter_scope`](Container::enter_scope) and
/// [`run_scoped`](Container::run_scoped). Cloning is cheap and every clone
/// shares the same runtime.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use stratum_di::{Container, ScopeKind, Token};
///
/// struct Database { url: String }
/// struct RequestId(u64);
///
/// let container = Container::new();
/// let db = Token::<Database>::singleton("db");
/// let req = Token::<RequestId>::request("request_id");
///
/// container
///     .provide(&db)
///     .factory(|_| Ok(Database { url: "postgres://localhost".into() }))
///     .unwrap();
/// container.provide(&req).factory(|_| Ok(RequestId(1))).unwrap();
///
/// // Singletons resolve anywhere; the same instance is shared.
/// let a = container.get(&db).unwrap();
/// let b = container.get(&db).unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
///
/// // Request-scoped tokens need an entered request layer.
/// assert!(container.get(&req).is_err());
/// let guard = container.enter_scope(ScopeKind::Request);
/// assert_eq!(container.get(&req).unwrap().0, 1);
/// guard.close().unwrap();
/// ```
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                registry: Registry::new(),
                singletons: SingletonTier {
                    instances: RwLock::new(HashMap::new()),
                    locks: Mutex::new(HashMap::new()),
                    ledger: Mutex::new(CleanupLedger::default()),
                },
                stats: Stats::default(),
            }),
        }
    }

    // ===== Registration =====

    /// Starts registering a provider for `token`. See [`ProviderBuilder`].
    pub fn provide<'c, T: Send + Sync + 'static>(&'c self, token: &Token<T>) -> ProviderBuilder<'c, T> {
        ProviderBuilder::new(self, token)
    }

    /// Registers a pre-created value in the singleton tier.
    ///
    /// Conflicts with an existing record or cached value for the token.
    pub fn register_value<T: Send + Sync + 'static>(&self, token: &Token<T>, value: T) -> DiResult<()> {
        let raw = token.raw();
        if self.inner.registry.contains(&raw) {
            return Err(DiError::RegistrationConflict { token: raw });
        }
        let mut instances = self.inner.singletons.instances.write();
        if instances.contains_key(&raw) {
            return Err(DiError::RegistrationConflict { token: raw });
        }
        instances.insert(raw, Arc::new(value));
        Ok(())
    }

    /// Installs a [`Module`] under one serialized registration pass.
    pub fn install<M: Module>(&self, module: M) -> DiResult<()> {
        self.inner.registry.with_write_serialized(|| module.register(self))
    }

    /// True when the token has a provider record or a cached singleton value.
    pub fn contains<T>(&self, token: &Token<T>) -> bool {
        let raw = token.as_raw();
        self.inner.registry.contains(raw)
            || self.inner.singletons.instances.read().contains_key(raw)
    }

    /// Every registered token name, the view suggestions are rendered from.
    pub fn token_names(&self) -> Vec<String> {
        self.inner.registry.token_names()
    }

    /// Returns the provider record bound to `token`, if any.
    pub fn lookup<T>(&self, token: &Token<T>) -> Option<Arc<ProviderRecord>> {
        self.inner.registry.lookup(token.as_raw())
    }

    // ===== Resolution =====

    /// Resolves a token on the synchronous path.
    ///
    /// The active scope chain and override stack are discovered from
    /// task/thread-local state set by the scope-entry blocks.
    pub fn get<T: Send + Sync + 'static>(&self, token: &Token<T>) -> DiResult<Arc<T>> {
        let (chain, overrides) = context::current_snapshot();
        let path = RefCell::new(ResolutionPath::default());
        let any = self.resolve_sync(token.as_raw(), &chain, &overrides, &path)?;
        resolver::downcast(token, any)
    }

    /// Resolves a token, awaiting async factories as needed.
    pub async fn get_async<T: Send + Sync + 'static>(&self, token: &Token<T>) -> DiResult<Arc<T>> {
        let (chain, overrides) = context::current_snapshot();
        let any = self
            .resolve_async_inner(token.raw(), chain, overrides, ResolutionPath::default())
            .await?;
        resolver::downcast(token, any)
    }

    // ===== Scopes and overrides =====

    /// Enters a session or request layer on the current thread (or task,
    /// inside [`run_scoped`](Container::run_scoped)). The returned guard
    /// tears the layer down on [`close`](ScopeGuard::close) or on drop.
    ///
    /// A request entered while a session is active nests under it; absent a
    /// session it nests directly under the singleton tier.
    pub fn enter_scope(&self, kind: ScopeKind) -> ScopeGuard {
        ScopeGuard::enter(kind)
    }

    /// Runs `f` inside a freshly entered layer, tearing it down on every
    /// exit path and surfacing collected teardown failures.
    pub fn scope_sync<R, E, F>(&self, kind: ScopeKind, f: F) -> Result<R, E>
    where
        F: FnOnce() -> Result<R, E>,
        E: From<DiError>,
    {
        context::run_in_thread_scope(kind, f)
    }

    /// Runs a future inside a freshly entered layer carried in task-local
    /// state, so concurrently running sibling tasks never observe it.
    /// Teardown (including async-context strategies) drains after the future
    /// completes or fails.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use stratum_di::{Container, DiError, ScopeKind, Token};
    ///
    /// struct Session { user: String }
    ///
    /// # async fn demo() -> Result<(), DiError> {
    /// let container = Container::new();
    /// let session = Token::<Session>::session("session");
    /// container
    ///     .provide(&session)
    ///     .factory(|_| Ok(Session { user: "ada".into() }))
    ///     .unwrap();
    ///
    /// let session_token = session.clone();
    /// let resolver = container.clone();
    /// let user = container
    ///     .run_scoped(ScopeKind::Session, || async move {
    ///         let s = resolver.get_async(&session_token).await?;
    ///         Ok::<_, DiError>(s.user.clone())
    ///     })
    ///     .await?;
    /// assert_eq!(user, "ada");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run_scoped<F, Fut, R, E>(&self, kind: ScopeKind, f: F) -> Result<R, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<DiError>,
    {
        context::run_in_task_scope(kind, f).await
    }

    /// Pushes a stack-scoped override: until the guard drops, `get` returns
    /// `value` for `token` on this thread or task. Registration stays
    /// untouched, so restoration is automatic and idempotent.
    pub fn push_override<T: Send + Sync + 'static>(&self, token: &Token<T>, value: T) -> OverrideGuard {
        OverrideGuard::push(token.raw(), Arc::new(value))
    }

    /// Runs `f` with `token` overridden by `value`, reverting afterwards.
    pub fn with_override<T: Send + Sync + 'static, R>(
        &self,
        token: &Token<T>,
        value: T,
        f: impl FnOnce() -> R,
    ) -> R {
        let guard = self.push_override(token, value);
        let result = f();
        guard.restore();
        result
    }

    // ===== Diagnostics =====

    /// Cache and registration counters.
    pub fn stats(&self) -> ContainerStats {
        ContainerStats {
            providers: self.inner.registry.len(),
            singletons: self.inner.singletons.instances.read().len(),
            cache_hits: self.inner.stats.hits.load(Ordering::Relaxed),
            cache_misses: self.inner.stats.misses.load(Ordering::Relaxed),
        }
    }

    /// Pre-flight validation over declared dependency tuples: missing
    /// providers, declared capture hazards, and declared cycles. Providers
    /// without declared dependencies are skipped; resolution-time checks
    /// still apply to them.
    pub fn check(&self) -> Result<(), Vec<DiError>> {
        let records = self.inner.registry.records();
        let mut issues = Vec::new();

        for record in &records {
            for dependency in record.dependencies() {
                if !self.inner.registry.contains(dependency)
                    && !self.inner.singletons.instances.read().contains_key(dependency)
                {
                    issues.push(DiError::UnresolvedToken {
                        token: dependency.clone(),
                        chain: ResolutionChain::new(vec![
                            record.token().clone(),
                            dependency.clone(),
                        ]),
                        suggestions: suggest::suggestions_for(
                            dependency.name(),
                            self.inner.registry.token_names(),
                        ),
                    });
                }
                if dependency.scope().is_context_bound()
                    && record.scope() > dependency.scope()
                    && !record.allow_capture
                {
                    issues.push(DiError::ScopeCapture {
                        token: record.token().clone(),
                        scope: record.scope(),
                        dependency: dependency.clone(),
                        dependency_scope: dependency.scope(),
                        chain: ResolutionChain::new(vec![
                            record.token().clone(),
                            dependency.clone(),
                        ]),
                    });
                }
            }
        }

        declared_cycles(&records, &mut issues);

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    // ===== Teardown =====

    /// Drains the singleton-tier cleanup ledger in LIFO order and clears the
    /// singleton cache. Async-context entries are reported as failures here;
    /// use [`close_async`](Container::close_async) for them.
    pub fn close(&self) -> DiResult<()> {
        let entries = self.inner.singletons.ledger.lock().drain();
        let result = cleanup::teardown_sync(entries);
        self.inner.singletons.instances.write().clear();
        result.map_err(DiError::Cleanup)
    }

    /// Async counterpart of [`close`](Container::close); drains every entry,
    /// awaiting async-context strategies.
    pub async fn close_async(&self) -> DiResult<()> {
        let entries = self.inner.singletons.ledger.lock().drain();
        let result = cleanup::teardown_async(entries).await;
        self.inner.singletons.instances.write().clear();
        result.map_err(DiError::Cleanup)
    }

    // ===== Internals shared with the resolver =====

    pub(crate) fn register_record(&self, record: ProviderRecord) -> DiResult<()> {
        if self.inner.singletons.instances.read().contains_key(&record.token) {
            return Err(DiError::RegistrationConflict {
                token: record.token.clone(),
            });
        }
        tracing::debug!(token = %record.token, scope = %record.scope, "registering provider");
        self.inner.registry.register(record)
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub(crate) fn singleton_cached(&self, token: &RawToken) -> Option<AnyArc> {
        self.inner.singletons.instances.read().get(token).cloned()
    }

    /// Publishes into the singleton cache; first writer wins and sequences
    /// the cleanup entry.
    pub(crate) fn publish_singleton(
        &self,
        token: &RawToken,
        value: AnyArc,
        hook: &CleanupHook,
    ) -> AnyArc {
        {
            let mut instances = self.inner.singletons.instances.write();
            if let Some(existing) = instances.get(token) {
                return existing.clone();
            }
            instances.insert(token.clone(), value.clone());
        }
        if !hook.is_none() {
            self.inner
                .singletons
                .ledger
                .lock()
                .push(token.clone(), value.clone(), hook.clone());
        }
        value
    }

    pub(crate) fn construction_lock(&self, token: &RawToken) -> Arc<ConstructionLock> {
        self.inner
            .singletons
            .locks
            .lock()
            .entry(token.clone())
            .or_default()
            .clone()
    }

    pub(crate) fn push_root_cleanup(&self, token: RawToken, instance: AnyArc, hook: CleanupHook) {
        self.inner.singletons.ledger.lock().push(token, instance, hook);
    }

    pub(crate) fn note_hit(&self) {
        self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_miss(&self) {
        self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ContainerInner {
    fn drop(&mut self) {
        if !self.singletons.ledger.get_mut().is_empty() {
            tracing::warn!("container dropped with pending cleanup; call close() or close_async()");
        }
    }
}

/// Reports cycles in the declared dependency graph.
fn declared_cycles(records: &[Arc<ProviderRecord>], issues: &mut Vec<DiError>) {
    let by_token: HashMap<&RawToken, &Arc<ProviderRecord>> =
        records.iter().map(|r| (r.token(), r)).collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InStack,
        Done,
    }

    fn visit<'r>(
        token: &'r RawToken,
        by_token: &HashMap<&'r RawToken, &'r Arc<ProviderRecord>>,
        marks: &mut HashMap<&'r RawToken, Mark>,
        stack: &mut Vec<RawToken>,
        issues: &mut Vec<DiError>,
    ) {
        match marks.get(token) {
            Some(Mark::Done) => return,
            Some(Mark::InStack) => {
                let start = stack.iter().position(|t| t == token).unwrap_or(0);
                let mut cycle: Vec<RawToken> = stack[start..].to_vec();
                cycle.push(token.clone());
                issues.push(DiError::CircularDependency {
                    chain: ResolutionChain::new(cycle),
                });
                return;
            }
            None => {}
        }
        marks.insert(token, Mark::InStack);
        stack.push(token.clone());
        if let Some(record) = by_token.get(token) {
            for dependency in record.dependencies() {
                if let Some((&key, _)) = by_token.get_key_value(dependency) {
                    visit(key, by_token, marks, stack, issues);
                }
            }
        }
        stack.pop();
        marks.insert(token, Mark::Done);
    }

    let mut marks = HashMap::new();
    let mut stack = Vec::new();
    for record in records {
        visit(record.token(), &by_token, &mut marks, &mut stack, issues);
    }
}
