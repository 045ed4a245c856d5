//! # stratum-di
//!
//! Token-based, scope-layered dependency resolution for Rust.
//!
//! ## Features
//!
//! - **Typed tokens**: named, typed identities with precomputed hashes
//! - **Layered scopes**: singleton, session, request, and transient tiers
//!   composed as live views, probed innermost-first
//! - **Concurrency-safe singletons**: per-token locks collapse concurrent
//!   construction to one factory run
//! - **Circular dependency detection**: immediate failure with the full
//!   ordered chain, never a deadlock
//! - **Deterministic teardown**: per-layer LIFO cleanup with aggregated
//!   failure reporting
//! - **Mixed concurrency**: OS threads and cooperative tasks against the
//!   same container, with per-task isolation of entered layers
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use stratum_di::{Container, Token};
//!
//! struct Database {
//!     connection_string: String,
//! }
//!
//! struct UserService {
//!     db: Arc<Database>,
//! }
//!
//! let container = Container::new();
//! let db = Token::<Database>::singleton("db");
//! let users = Token::<UserService>::transient("user_service");
//!
//! container
//!     .provide(&db)
//!     .factory(|_| {
//!         Ok(Database {
//!             connection_string: "postgres://localhost".to_string(),
//!         })
//!     })
//!     .unwrap();
//!
//! let db_dep = db.clone();
//! container
//!     .provide(&users)
//!     .depends_on(&db)
//!     .factory(move |cx| Ok(UserService { db: cx.get(&db_dep)? }))
//!     .unwrap();
//!
//! let service = container.get(&users).unwrap();
//! assert_eq!(service.db.connection_string, "postgres://localhost");
//! ```
//!
//! ## Scope Layers
//!
//! Session and request tiers are entered explicitly. A request nests under
//! any active session, otherwise directly under the singleton tier, and
//! entered layers ride in task/thread-local state so sibling tasks never see
//! each other's caches.
//!
//! ```rust
//! use stratum_di::{Container, ScopeKind, Token};
//!
//! struct RequestId(u64);
//!
//! let container = Container::new();
//! let req = Token::<RequestId>::request("request_id");
//!
//! container
//!     .provide(&req)
//!     .factory(|_| Ok(RequestId(7)))
//!     .unwrap();
//!
//! let guard = container.enter_scope(ScopeKind::Request);
//! let a = container.get(&req).unwrap();
//! let b = container.get(&req).unwrap();
//! assert!(std::sync::Arc::ptr_eq(&a, &b)); // cached within the layer
//! guard.close().unwrap();
//!
//! assert!(container.get(&req).is_err()); // no silent fallback outside
//! ```
//!
//! ## Teardown
//!
//! Providers registered with a cleanup strategy get a sequenced entry in
//! their owning layer's ledger; layers drain strictly last-in-first-out on
//! exit, and every failure is collected before being raised together.
//!
//! ```rust
//! use stratum_di::{BoxError, Container, Dispose, ScopeKind, Token};
//!
//! struct Connection;
//!
//! impl Dispose for Connection {
//!     fn dispose(&self) -> Result<(), BoxError> {
//!         Ok(())
//!     }
//! }
//!
//! let container = Container::new();
//! let conn = Token::<Connection>::request("conn");
//! container
//!     .provide(&conn)
//!     .dispose()
//!     .factory(|_| Ok(Connection))
//!     .unwrap();
//!
//! container
//!     .scope_sync(ScopeKind::Request, || {
//!         container.get(&conn)?;
//!         Ok::<_, stratum_di::DiError>(())
//!     })
//!     .unwrap();
//! ```

// Module declarations
pub mod cleanup;
pub mod container;
pub mod context;
pub mod error;
pub mod inject;
pub mod provider;
pub mod resolver;
pub mod scope;
pub mod token;

// Internal modules
mod internal;
mod registry;

// Re-export core types
pub use cleanup::{AsyncDispose, CleanupStrategy, Dispose};
pub use container::{Container, ContainerStats, Module};
pub use context::{OverrideGuard, ScopeGuard};
pub use error::{
    AggregateCleanupError, BoxError, CleanupFailure, DiError, DiResult, ResolutionChain,
};
pub use inject::{Injected, InjectedAsync, TokenBundle, TokenRefs};
pub use provider::{ProviderBuilder, ProviderRecord};
pub use resolver::{AsyncResolverCtx, ResolverCtx};
pub use scope::{Scope, ScopeKind};
pub use token::{RawToken, Token, TokenBuilder};
