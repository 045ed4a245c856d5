//! Entered scope layers, the layered lookup chain, and task/thread-local
//! carriage of the active context.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::cleanup::{self, AnyArc, CleanupEntry, CleanupHook, CleanupLedger};
use crate::error::DiError;
use crate::scope::ScopeKind;
use crate::token::RawToken;

static NEXT_LAYER_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_OVERRIDE_ID: AtomicU64 = AtomicU64::new(1);

/// One entered, owned mutable cache layer for session or request scope.
///
/// Layers are shared by `Arc` between the guard that entered them and every
/// chain snapshot that includes them, so lookups are live views: a value
/// published through one chain is immediately visible to all dependents.
pub(crate) struct ScopeLayer {
    id: u64,
    kind: ScopeKind,
    cache: RwLock<HashMap<RawToken, AnyArc>>,
    ledger: Mutex<CleanupLedger>,
}

impl ScopeLayer {
    pub(crate) fn new(kind: ScopeKind) -> Self {
        Self {
            id: NEXT_LAYER_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            cache: RwLock::new(HashMap::new()),
            ledger: Mutex::new(CleanupLedger::default()),
        }
    }

    pub(crate) fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub(crate) fn get(&self, token: &RawToken) -> Option<AnyArc> {
        self.cache.read().get(token).cloned()
    }

    /// Publishes `value` into the layer cache; first writer wins. The
    /// cleanup entry is sequenced only for the writer that published.
    pub(crate) fn publish(&self, token: &RawToken, value: AnyArc, hook: &CleanupHook) -> AnyArc {
        {
            let mut cache = self.cache.write();
            if let Some(existing) = cache.get(token) {
                return existing.clone();
            }
            cache.insert(token.clone(), value.clone());
        }
        if !hook.is_none() {
            self.ledger.lock().push(token.clone(), value.clone(), hook.clone());
        }
        value
    }

    /// Sequences a teardown entry without caching (transient providers).
    pub(crate) fn push_cleanup(&self, token: RawToken, instance: AnyArc, hook: CleanupHook) {
        self.ledger.lock().push(token, instance, hook);
    }

    pub(crate) fn drain(&self) -> Vec<CleanupEntry> {
        self.ledger.lock().drain()
    }
}

impl Drop for ScopeLayer {
    fn drop(&mut self) {
        // Reached when a scope future is cancelled before teardown ran.
        let entries = self.ledger.get_mut().drain();
        if entries.is_empty() {
            return;
        }
        tracing::warn!(kind = %self.kind, "scope layer dropped with pending cleanup");
        if let Err(err) = cleanup::teardown_sync(entries) {
            tracing::error!(error = %err, "teardown failures while dropping scope layer");
        }
    }
}

/// Ordered list of live layer references, innermost last. Probed
/// front-to-back from the innermost end; never a snapshot copy.
#[derive(Clone, Default)]
pub(crate) struct ScopeChain {
    layers: Vec<Arc<ScopeLayer>>,
}

impl ScopeChain {
    /// Probes every layer innermost→outermost for a cached instance.
    pub(crate) fn probe(&self, token: &RawToken) -> Option<AnyArc> {
        self.layers.iter().rev().find_map(|layer| layer.get(token))
    }

    /// The innermost layer of the given kind, if one is active.
    pub(crate) fn layer_for(&self, kind: ScopeKind) -> Option<&Arc<ScopeLayer>> {
        self.layers.iter().rev().find(|layer| layer.kind == kind)
    }

    /// The innermost layer of any kind.
    pub(crate) fn innermost(&self) -> Option<&Arc<ScopeLayer>> {
        self.layers.last()
    }

    pub(crate) fn push(&mut self, layer: Arc<ScopeLayer>) {
        self.layers.push(layer);
    }

    fn remove(&mut self, id: u64) {
        if let Some(pos) = self.layers.iter().rposition(|layer| layer.id == id) {
            if pos + 1 != self.layers.len() {
                tracing::warn!("scope layer released out of stack order");
            }
            self.layers.remove(pos);
        }
    }
}

/// One stack-scoped override: a value standing in for a token's provider.
#[derive(Clone)]
pub(crate) struct OverrideFrame {
    pub(crate) token: RawToken,
    pub(crate) value: AnyArc,
    id: u64,
}

/// Per-task (or per-thread) resolution context: the entered layer chain and
/// the override stack. Never shared between sibling tasks.
#[derive(Clone, Default)]
pub(crate) struct LocalContext {
    pub(crate) chain: ScopeChain,
    pub(crate) overrides: Vec<OverrideFrame>,
}

thread_local! {
    static THREAD_CTX: RefCell<LocalContext> = RefCell::new(LocalContext::default());
}

tokio::task_local! {
    static TASK_CTX: RefCell<LocalContext>;
}

/// Runs `f` against the active local context: the task-local one inside an
/// async scope block, the thread-local one otherwise.
pub(crate) fn with_local<R>(f: impl FnOnce(&mut LocalContext) -> R) -> R {
    if TASK_CTX.try_with(|_| ()).is_ok() {
        TASK_CTX.with(|ctx| f(&mut ctx.borrow_mut()))
    } else {
        THREAD_CTX.with(|ctx| f(&mut ctx.borrow_mut()))
    }
}

/// Snapshot of the active chain and override stack for one resolution.
pub(crate) fn current_snapshot() -> (ScopeChain, Arc<[OverrideFrame]>) {
    with_local(|local| (local.chain.clone(), local.overrides.clone().into()))
}

/// An entered scope, torn down on [`close`](ScopeGuard::close) or on drop.
///
/// Dropping the guard runs the same LIFO teardown but can only log failures;
/// call `close()` to receive them as an error. Guards are bound to the thread
/// or task that entered the scope and are not `Send`.
///
/// # Examples
///
/// ```rust
/// use stratum_di::{Container, ScopeKind, Token};
///
/// struct RequestId(u64);
///
/// let container = Container::new();
/// let req = Token::<RequestId>::request("request_id");
/// container.provide(&req).factory(|_| Ok(RequestId(7))).unwrap();
///
/// let guard = container.enter_scope(ScopeKind::Request);
/// let id = container.get(&req).unwrap();
/// assert_eq!(id.0, 7);
/// guard.close().unwrap();
/// ```
pub struct ScopeGuard {
    layer: Arc<ScopeLayer>,
    closed: bool,
    _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
    pub(crate) fn enter(kind: ScopeKind) -> Self {
        let layer = Arc::new(ScopeLayer::new(kind));
        with_local(|local| local.chain.push(layer.clone()));
        tracing::debug!(kind = %kind, "entered scope");
        Self {
            layer,
            closed: false,
            _not_send: PhantomData,
        }
    }

    /// The kind of layer this guard owns.
    pub fn kind(&self) -> ScopeKind {
        self.layer.kind()
    }

    /// Detaches the layer and drains its cleanup ledger in LIFO order,
    /// returning collected teardown failures.
    pub fn close(mut self) -> Result<(), DiError> {
        self.closed = true;
        with_local(|local| local.chain.remove(self.layer.id));
        tracing::debug!(kind = %self.layer.kind(), "closing scope");
        cleanup::teardown_sync(self.layer.drain()).map_err(DiError::Cleanup)
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        with_local(|local| local.chain.remove(self.layer.id));
        if let Err(err) = cleanup::teardown_sync(self.layer.drain()) {
            tracing::error!(error = %err, "scope teardown failed during drop");
        }
    }
}

/// A stack-scoped override, reverted when the guard drops.
///
/// Restoration is idempotent: calling [`restore`](OverrideGuard::restore)
/// and then dropping (or dropping twice through nesting) removes the frame
/// exactly once. Guards are bound to the entering thread or task.
pub struct OverrideGuard {
    id: u64,
    restored: bool,
    _not_send: PhantomData<*const ()>,
}

impl OverrideGuard {
    pub(crate) fn push(token: RawToken, value: AnyArc) -> Self {
        let id = NEXT_OVERRIDE_ID.fetch_add(1, Ordering::Relaxed);
        with_local(|local| local.overrides.push(OverrideFrame { token, value, id }));
        Self {
            id,
            restored: false,
            _not_send: PhantomData,
        }
    }

    /// Removes the override eagerly instead of waiting for drop.
    pub fn restore(mut self) {
        self.restored = true;
        Self::remove(self.id);
    }

    fn remove(id: u64) {
        with_local(|local| {
            if let Some(pos) = local.overrides.iter().rposition(|frame| frame.id == id) {
                local.overrides.remove(pos);
            }
        });
    }
}

impl Drop for OverrideGuard {
    fn drop(&mut self) {
        if !self.restored {
            Self::remove(self.id);
        }
    }
}

/// Runs a sync closure inside a freshly entered layer, tearing it down on
/// every exit path. The closure's error wins over a teardown error, which is
/// then only logged.
pub(crate) fn run_in_thread_scope<R, E, F>(kind: ScopeKind, f: F) -> Result<R, E>
where
    F: FnOnce() -> Result<R, E>,
    E: From<DiError>,
{
    let guard = ScopeGuard::enter(kind);
    let result = f();
    match (result, guard.close()) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup_err)) => Err(E::from(cleanup_err)),
        (Err(user), Ok(())) => Err(user),
        (Err(user), Err(cleanup_err)) => {
            tracing::error!(error = %cleanup_err, "scope teardown failed after task error");
            Err(user)
        }
    }
}

/// Runs a future inside a freshly entered layer carried in task-local state,
/// so sibling tasks on the same thread never observe it. Teardown is drained
/// asynchronously after the future completes or fails.
pub(crate) async fn run_in_task_scope<F, Fut, R, E>(kind: ScopeKind, f: F) -> Result<R, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R, E>>,
    E: From<DiError>,
{
    let layer = Arc::new(ScopeLayer::new(kind));
    let mut inherited = with_local(|local| local.clone());
    inherited.chain.push(layer.clone());
    tracing::debug!(kind = %kind, "entered async scope");

    let result = TASK_CTX
        .scope(RefCell::new(inherited), async move { f().await })
        .await;

    tracing::debug!(kind = %kind, "closing async scope");
    let teardown = cleanup::teardown_async(layer.drain()).await;
    match (result, teardown) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup_err)) => Err(E::from(DiError::Cleanup(cleanup_err))),
        (Err(user), Ok(())) => Err(user),
        (Err(user), Err(cleanup_err)) => {
            tracing::error!(error = %cleanup_err, "async scope teardown failed after task error");
            Err(user)
        }
    }
}
