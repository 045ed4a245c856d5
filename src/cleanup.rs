//! Cleanup strategies and the per-layer teardown ledger.

use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{AggregateCleanupError, BoxError, CleanupFailure};
use crate::token::RawToken;

/// Type-erased instance shared between caches and cleanup entries.
pub(crate) type AnyArc = Arc<dyn Any + Send + Sync>;

/// Future type for async teardown hooks.
pub(crate) type BoxCleanupFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

/// Trait for synchronous resource teardown.
///
/// Implement this for instances that need structured teardown (flushing
/// caches, closing connections). Hooks run in LIFO order when the owning
/// layer is torn down; a returned error is collected into the layer's
/// [`AggregateCleanupError`](crate::AggregateCleanupError) without stopping
/// the pass.
///
/// # Examples
///
/// ```rust
/// use stratum_di::{BoxError, Container, Dispose, ScopeKind, Token};
///
/// struct Connection;
///
/// impl Dispose for Connection {
///     fn dispose(&self) -> Result<(), BoxError> {
///         // flush, close...
///         Ok(())
///     }
/// }
///
/// let container = Container::new();
/// let conn = Token::<Connection>::request("conn");
/// container
///     .provide(&conn)
///     .dispose()
///     .factory(|_| Ok(Connection))
///     .unwrap();
///
/// container
///     .scope_sync(ScopeKind::Request, || {
///         let _conn = container.get(&conn)?;
///         Ok::<_, stratum_di::DiError>(())
///     })
///     .unwrap();
/// // Connection::dispose ran when the request layer closed.
/// ```
pub trait Dispose: Send + Sync + 'static {
    /// Tears the instance down synchronously.
    fn dispose(&self) -> Result<(), BoxError>;
}

/// Trait for asynchronous resource teardown.
///
/// Hooks with this strategy are valid only on the async teardown path
/// ([`Container::run_scoped`](crate::Container::run_scoped) or
/// [`Container::close_async`](crate::Container::close_async)); a sync
/// teardown pass records them as failures instead of blocking.
#[async_trait::async_trait]
pub trait AsyncDispose: Send + Sync + 'static {
    /// Tears the instance down asynchronously.
    async fn dispose(&self) -> Result<(), BoxError>;
}

/// Declared teardown strategy of a provider, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStrategy {
    /// No teardown.
    None,
    /// The instance implements [`Dispose`].
    SyncContext,
    /// The instance implements [`AsyncDispose`].
    AsyncContext,
    /// A teardown closure was registered alongside the factory.
    Callback,
}

/// Executable teardown hook, built at registration time while the concrete
/// type is still known.
#[derive(Clone)]
pub(crate) enum CleanupHook {
    None,
    Sync(Arc<dyn Fn(&AnyArc) -> Result<(), BoxError> + Send + Sync>),
    Async(Arc<dyn Fn(AnyArc) -> BoxCleanupFuture + Send + Sync>),
}

impl CleanupHook {
    pub(crate) fn is_none(&self) -> bool {
        matches!(self, CleanupHook::None)
    }
}

/// One teardown entry: token, instance, hook, and the publish-time sequence
/// number that fixes its position in the layer's LIFO order.
pub(crate) struct CleanupEntry {
    pub(crate) token: RawToken,
    pub(crate) instance: AnyArc,
    pub(crate) hook: CleanupHook,
    pub(crate) seq: u64,
}

/// Ordered teardown entries for one scope layer.
///
/// Sequence numbers are assigned at publish time under the ledger lock, so
/// LIFO order is deterministic even when concurrent resolutions interleave.
#[derive(Default)]
pub(crate) struct CleanupLedger {
    entries: Vec<CleanupEntry>,
    next_seq: u64,
}

impl CleanupLedger {
    pub(crate) fn push(&mut self, token: RawToken, instance: AnyArc, hook: CleanupHook) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(CleanupEntry {
            token,
            instance,
            hook,
            seq,
        });
        seq
    }

    /// Takes every entry in strictly descending sequence order.
    pub(crate) fn drain(&mut self) -> Vec<CleanupEntry> {
        let mut entries = std::mem::take(&mut self.entries);
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        entries
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn run_sync_hook(entry: &CleanupEntry) -> Result<(), String> {
    match &entry.hook {
        CleanupHook::None => Ok(()),
        CleanupHook::Sync(hook) => {
            match catch_unwind(AssertUnwindSafe(|| hook(&entry.instance))) {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(err.to_string()),
                Err(payload) => Err(panic_reason(payload)),
            }
        }
        CleanupHook::Async(_) => {
            Err("async cleanup strategy requires async teardown".to_string())
        }
    }
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        format!("cleanup panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("cleanup panicked: {msg}")
    } else {
        "cleanup panicked".to_string()
    }
}

/// Runs every entry in descending sequence order, collecting failures.
pub(crate) fn teardown_sync(entries: Vec<CleanupEntry>) -> Result<(), AggregateCleanupError> {
    let mut failures = Vec::new();
    for entry in &entries {
        if let Err(reason) = run_sync_hook(entry) {
            failures.push(CleanupFailure {
                token: entry.token.clone(),
                seq: entry.seq,
                reason,
            });
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(AggregateCleanupError { failures })
    }
}

/// Async teardown pass: sync hooks run inline, async hooks are awaited.
pub(crate) async fn teardown_async(entries: Vec<CleanupEntry>) -> Result<(), AggregateCleanupError> {
    let mut failures = Vec::new();
    for entry in &entries {
        let outcome = match &entry.hook {
            CleanupHook::Async(hook) => hook(entry.instance.clone()).await.map_err(|e| e.to_string()),
            _ => run_sync_hook(entry),
        };
        if let Err(reason) = outcome {
            failures.push(CleanupFailure {
                token: entry.token.clone(),
                seq: entry.seq,
                reason,
            });
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(AggregateCleanupError { failures })
    }
}
