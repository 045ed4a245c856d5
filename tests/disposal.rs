use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use stratum_di::{
    AsyncDispose, BoxError, Container, DiError, Dispose, ScopeKind, Token,
};

struct Tracked {
    name: &'static str,
    order: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl Dispose for Tracked {
    fn dispose(&self) -> Result<(), BoxError> {
        self.order.lock().unwrap().push(self.name.to_string());
        if self.fail {
            Err(format!("{} refused to close", self.name).into())
        } else {
            Ok(())
        }
    }
}

fn register_tracked(
    container: &Container,
    token: &Token<Tracked>,
    name: &'static str,
    order: Arc<Mutex<Vec<String>>>,
    fail: bool,
) {
    container
        .provide(token)
        .dispose()
        .factory(move |_| {
            Ok(Tracked {
                name,
                order: order.clone(),
                fail,
            })
        })
        .unwrap();
}

#[test]
fn teardown_runs_in_reverse_construction_order() {
    let container = Container::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let first = Token::<Tracked>::request("first");
    let second = Token::<Tracked>::request("second");
    let third = Token::<Tracked>::request("third");
    register_tracked(&container, &first, "first", order.clone(), false);
    register_tracked(&container, &second, "second", order.clone(), false);
    register_tracked(&container, &third, "third", order.clone(), false);

    container
        .scope_sync(ScopeKind::Request, || {
            container.get(&first)?;
            container.get(&second)?;
            container.get(&third)?;
            Ok::<_, DiError>(())
        })
        .unwrap();

    assert_eq!(
        *order.lock().unwrap(),
        vec!["third", "second", "first"],
        "teardown must be exact reverse of construction"
    );
}

#[test]
fn failing_entry_does_not_stop_the_pass() {
    let container = Container::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let a = Token::<Tracked>::request("a");
    let b = Token::<Tracked>::request("b");
    let c = Token::<Tracked>::request("c");
    register_tracked(&container, &a, "a", order.clone(), false);
    register_tracked(&container, &b, "b", order.clone(), true);
    register_tracked(&container, &c, "c", order.clone(), false);

    let result: Result<(), DiError> = container.scope_sync(ScopeKind::Request, || {
        container.get(&a)?;
        container.get(&b)?;
        container.get(&c)?;
        Ok(())
    });

    // Every callback ran despite the failure in the middle of the pass.
    assert_eq!(*order.lock().unwrap(), vec!["c", "b", "a"]);
    match result {
        Err(DiError::Cleanup(aggregate)) => {
            assert_eq!(aggregate.failures.len(), 1);
            assert_eq!(aggregate.failures[0].token.name(), "b");
            assert!(aggregate.failures[0].reason.contains("b refused to close"));
        }
        other => panic!("expected Cleanup aggregate, got {other:?}"),
    }
}

#[test]
fn callback_cleanup_and_panics_are_collected() {
    struct Flaky;

    let container = Container::new();
    let calm = Token::<Tracked>::request("calm");
    let flaky = Token::<Flaky>::request("flaky");
    let order = Arc::new(Mutex::new(Vec::new()));

    register_tracked(&container, &calm, "calm", order.clone(), false);
    container
        .provide(&flaky)
        .dispose_with(|_: &Flaky| panic!("teardown blew up"))
        .factory(|_| Ok(Flaky))
        .unwrap();

    let result: Result<(), DiError> = container.scope_sync(ScopeKind::Request, || {
        container.get(&calm)?;
        container.get(&flaky)?;
        Ok(())
    });

    assert_eq!(*order.lock().unwrap(), vec!["calm"]);
    match result {
        Err(DiError::Cleanup(aggregate)) => {
            assert_eq!(aggregate.failures.len(), 1);
            assert!(aggregate.failures[0].reason.contains("teardown blew up"));
        }
        other => panic!("expected Cleanup aggregate, got {other:?}"),
    }
}

#[test]
fn container_close_drains_the_singleton_ledger() {
    let container = Container::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let pool = Token::<Tracked>::singleton("pool");
    let cache = Token::<Tracked>::singleton("cache");
    register_tracked(&container, &pool, "pool", order.clone(), false);
    register_tracked(&container, &cache, "cache", order.clone(), false);

    container.get(&pool).unwrap();
    container.get(&cache).unwrap();
    container.close().unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["cache", "pool"]);
    // The cache was cleared along with the ledger.
    assert_eq!(container.stats().singletons, 0);
}

#[test]
fn transient_cleanup_belongs_to_the_innermost_layer() {
    let container = Container::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let scratch = Token::<Tracked>::transient("scratch");
    register_tracked(&container, &scratch, "scratch", order.clone(), false);

    container
        .scope_sync(ScopeKind::Request, || {
            container.get(&scratch)?;
            container.get(&scratch)?;
            assert!(order.lock().unwrap().is_empty());
            Ok::<_, DiError>(())
        })
        .unwrap();

    // Two transient constructions, two teardown entries, LIFO drained.
    assert_eq!(*order.lock().unwrap(), vec!["scratch", "scratch"]);
}

#[test]
fn async_context_strategy_fails_on_the_sync_path() {
    struct Client {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl AsyncDispose for Client {
        async fn dispose(&self) -> Result<(), BoxError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    let container = Container::new();
    let client = Token::<Client>::request("client");
    let closed = Arc::new(AtomicBool::new(false));
    let flag = closed.clone();
    container
        .provide(&client)
        .async_dispose()
        .factory(move |_| Ok(Client { closed: flag.clone() }))
        .unwrap();

    let result: Result<(), DiError> = container.scope_sync(ScopeKind::Request, || {
        container.get(&client)?;
        Ok(())
    });

    match result {
        Err(DiError::Cleanup(aggregate)) => {
            assert!(aggregate.failures[0].reason.contains("async teardown"));
        }
        other => panic!("expected Cleanup aggregate, got {other:?}"),
    }
    assert!(!closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn async_context_strategy_runs_on_the_async_path() {
    struct Client {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl AsyncDispose for Client {
        async fn dispose(&self) -> Result<(), BoxError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    let container = Container::new();
    let client = Token::<Client>::session("client");
    let closed = Arc::new(AtomicBool::new(false));
    let flag = closed.clone();
    container
        .provide(&client)
        .async_dispose()
        .factory(move |_| Ok(Client { closed: flag.clone() }))
        .unwrap();

    let resolver = container.clone();
    let token = client.clone();
    container
        .run_scoped(ScopeKind::Session, || async move {
            resolver.get_async(&token).await?;
            Ok::<_, DiError>(())
        })
        .await
        .unwrap();

    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn close_async_awaits_async_strategies() {
    struct Pool {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl AsyncDispose for Pool {
        async fn dispose(&self) -> Result<(), BoxError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    let container = Container::new();
    let pool = Token::<Pool>::singleton("pool");
    let closed = Arc::new(AtomicBool::new(false));
    let flag = closed.clone();
    container
        .provide(&pool)
        .async_dispose()
        .factory(move |_| Ok(Pool { closed: flag.clone() }))
        .unwrap();

    container.get(&pool).unwrap();
    container.close_async().await.unwrap();
    assert!(closed.load(Ordering::SeqCst));
}
