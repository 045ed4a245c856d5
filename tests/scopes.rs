use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use stratum_di::{Container, DiError, ScopeKind, Token};

#[derive(Debug)]
struct SessionState {
    id: u64,
}

#[derive(Debug)]
struct RequestState {
    id: u64,
}

#[derive(Debug)]
struct Worker {
    request: Arc<RequestState>,
}

fn counting_factory<T: Send + Sync + 'static>(
    make: impl Fn(u64) -> T + Send + Sync + 'static,
) -> impl Fn(&stratum_di::ResolverCtx<'_>) -> stratum_di::DiResult<T> + Send + Sync + 'static {
    let counter = AtomicU64::new(0);
    move |_| Ok(make(counter.fetch_add(1, Ordering::SeqCst)))
}

#[test]
fn request_scope_caches_within_one_layer() {
    let container = Container::new();
    let req = Token::<RequestState>::request("request_state");
    container
        .provide(&req)
        .factory(counting_factory(|id| RequestState { id }))
        .unwrap();

    let guard = container.enter_scope(ScopeKind::Request);
    let a = container.get(&req).unwrap();
    let b = container.get(&req).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    guard.close().unwrap();

    let guard = container.enter_scope(ScopeKind::Request);
    let c = container.get(&req).unwrap();
    assert_ne!(a.id, c.id);
    guard.close().unwrap();
}

#[test]
fn request_scope_missing_is_an_error_not_a_fallback() {
    let container = Container::new();
    let req = Token::<RequestState>::request("request_state");
    container
        .provide(&req)
        .factory(counting_factory(|id| RequestState { id }))
        .unwrap();

    match container.get(&req) {
        Err(DiError::ScopeContextMissing { token, kind, .. }) => {
            assert_eq!(token.name(), "request_state");
            assert_eq!(kind, ScopeKind::Request);
        }
        other => panic!("expected ScopeContextMissing, got {other:?}"),
    }

    // A session layer is not a substitute for a request layer.
    let guard = container.enter_scope(ScopeKind::Session);
    assert!(matches!(
        container.get(&req),
        Err(DiError::ScopeContextMissing { .. })
    ));
    guard.close().unwrap();
}

#[test]
fn request_nests_under_active_session() {
    let container = Container::new();
    let session = Token::<SessionState>::session("session_state");
    let req = Token::<RequestState>::request("request_state");
    container
        .provide(&session)
        .factory(counting_factory(|id| SessionState { id }))
        .unwrap();
    container
        .provide(&req)
        .factory(counting_factory(|id| RequestState { id }))
        .unwrap();

    let session_guard = container.enter_scope(ScopeKind::Session);

    let request_guard = container.enter_scope(ScopeKind::Request);
    let s1 = container.get(&session).unwrap();
    let r1 = container.get(&req).unwrap();
    request_guard.close().unwrap();

    // A second request under the same session sees the same session state
    // but a fresh request state.
    let request_guard = container.enter_scope(ScopeKind::Request);
    let s2 = container.get(&session).unwrap();
    let r2 = container.get(&req).unwrap();
    request_guard.close().unwrap();

    assert!(Arc::ptr_eq(&s1, &s2));
    assert_ne!(r1.id, r2.id);

    session_guard.close().unwrap();
}

#[test]
fn transients_are_never_cached_in_layers() {
    let container = Container::new();
    let worker = Token::<Worker>::transient("worker");
    let req = Token::<RequestState>::request("request_state");
    container
        .provide(&req)
        .factory(counting_factory(|id| RequestState { id }))
        .unwrap();
    let req_dep = req.clone();
    container
        .provide(&worker)
        .factory(move |cx| {
            Ok(Worker {
                request: cx.get(&req_dep)?,
            })
        })
        .unwrap();

    let guard = container.enter_scope(ScopeKind::Request);
    let a = container.get(&worker).unwrap();
    let b = container.get(&worker).unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    // Both workers share the request-scoped state of the entered layer.
    assert!(Arc::ptr_eq(&a.request, &b.request));
    guard.close().unwrap();
}

#[test]
fn entered_layers_are_invisible_to_other_threads() {
    let container = Container::new();
    let req = Token::<RequestState>::request("request_state");
    container
        .provide(&req)
        .factory(counting_factory(|id| RequestState { id }))
        .unwrap();

    let guard = container.enter_scope(ScopeKind::Request);
    container.get(&req).unwrap();

    let remote = container.clone();
    let seen = thread::spawn(move || {
        let fresh = Token::<RequestState>::request("request_state");
        remote.get(&fresh)
    })
    .join()
    .unwrap();

    assert!(matches!(seen, Err(DiError::ScopeContextMissing { .. })));
    guard.close().unwrap();
}

#[test]
fn sibling_threads_get_isolated_layers() {
    let container = Container::new();
    let req = Token::<RequestState>::request("request_state");
    container
        .provide(&req)
        .factory(counting_factory(|id| RequestState { id }))
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let container = container.clone();
        let token = req.clone();
        handles.push(thread::spawn(move || {
            container
                .scope_sync(ScopeKind::Request, || {
                    let state = container.get(&token)?;
                    Ok::<_, DiError>(state.id)
                })
                .unwrap()
        }));
    }

    let mut ids: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 4, "each thread must get its own request state");
}

#[test]
fn capture_hazard_fails_at_resolution_time() {
    #[derive(Debug)]
    struct Cacheish {
        _request: Arc<RequestState>,
    }

    let container = Container::new();
    let req = Token::<RequestState>::request("request_state");
    let cache = Token::<Cacheish>::singleton("cache");
    container
        .provide(&req)
        .factory(counting_factory(|id| RequestState { id }))
        .unwrap();
    let req_dep = req.clone();
    container
        .provide(&cache)
        .factory(move |cx| {
            Ok(Cacheish {
                _request: cx.get(&req_dep)?,
            })
        })
        .unwrap();

    let guard = container.enter_scope(ScopeKind::Request);
    match container.get(&cache) {
        Err(DiError::ScopeCapture {
            token, dependency, ..
        }) => {
            assert_eq!(token.name(), "cache");
            assert_eq!(dependency.name(), "request_state");
        }
        other => panic!("expected ScopeCapture, got {other:?}"),
    }
    guard.close().unwrap();
}

#[test]
fn allow_capture_opts_out_of_the_hazard_check() {
    #[derive(Debug)]
    struct Snapshot {
        request_id: u64,
    }

    let container = Container::new();
    let req = Token::<RequestState>::request("request_state");
    let snapshot = Token::<Snapshot>::singleton("snapshot");
    container
        .provide(&req)
        .factory(counting_factory(|id| RequestState { id }))
        .unwrap();
    let req_dep = req.clone();
    container
        .provide(&snapshot)
        .allow_capture()
        .factory(move |cx| {
            Ok(Snapshot {
                request_id: cx.get(&req_dep)?.id,
            })
        })
        .unwrap();

    let guard = container.enter_scope(ScopeKind::Request);
    assert_eq!(container.get(&snapshot).unwrap().request_id, 0);
    guard.close().unwrap();
}

#[test]
fn session_dependency_in_request_provider_is_fine() {
    #[derive(Debug)]
    struct Handler {
        session: Arc<SessionState>,
    }

    let container = Container::new();
    let session = Token::<SessionState>::session("session_state");
    let handler = Token::<Handler>::request("handler");
    container
        .provide(&session)
        .factory(counting_factory(|id| SessionState { id }))
        .unwrap();
    let session_dep = session.clone();
    container
        .provide(&handler)
        .factory(move |cx| {
            Ok(Handler {
                session: cx.get(&session_dep)?,
            })
        })
        .unwrap();

    let outcome: Result<(), DiError> = container.scope_sync(ScopeKind::Session, || {
        container.scope_sync(ScopeKind::Request, || {
            let h = container.get(&handler)?;
            let s = container.get(&session)?;
            assert!(Arc::ptr_eq(&h.session, &s));
            Ok(())
        })
    });
    outcome.unwrap();
}

#[test]
fn scope_closure_form_tears_down_on_error_paths() {
    let container = Container::new();
    let req = Token::<RequestState>::request("request_state");
    container
        .provide(&req)
        .factory(counting_factory(|id| RequestState { id }))
        .unwrap();

    let result: Result<(), DiError> = container.scope_sync(ScopeKind::Request, || {
        container.get(&req)?;
        Err(DiError::other("handler exploded"))
    });
    assert!(result.is_err());

    // The failed request's layer is gone; a new one starts fresh.
    let next: u64 = container
        .scope_sync(ScopeKind::Request, || {
            Ok::<_, DiError>(container.get(&req)?.id)
        })
        .unwrap();
    assert_eq!(next, 1);
}
