use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stratum_di::{Container, DiError, ScopeKind, Token};

// ===== Micro Benchmarks =====

fn bench_singleton_hit(c: &mut Criterion) {
    let container = Container::new();
    let answer = Token::<u64>::singleton("answer");
    container.provide(&answer).factory(|_| Ok(42u64)).unwrap();

    // Prime the singleton
    let _ = container.get(&answer).unwrap();

    c.bench_function("singleton_hit_u64", |b| {
        b.iter(|| {
            let v = container.get(&answer).unwrap();
            black_box(v);
        })
    });
}

fn bench_singleton_cold(c: &mut Criterion) {
    struct ExpensiveToCreate {
        data: Vec<u64>,
    }

    let token = Token::<ExpensiveToCreate>::singleton("expensive");
    c.bench_function("singleton_cold_expensive", |b| {
        b.iter_batched(
            || {
                let container = Container::new();
                container
                    .provide(&token)
                    .factory(|_| {
                        Ok(ExpensiveToCreate {
                            data: (0..1000).collect(),
                        })
                    })
                    .unwrap();
                container
            },
            |container| {
                let v = container.get(&token).unwrap();
                black_box(v.data.len());
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_request_vs_transient(c: &mut Criterion) {
    struct Service {
        data: [u8; 64],
    }

    let mut group = c.benchmark_group("request_vs_transient");

    let container = Container::new();
    let request = Token::<Service>::request("service");
    container
        .provide(&request)
        .factory(|_| Ok(Service { data: [0; 64] }))
        .unwrap();

    let guard = container.enter_scope(ScopeKind::Request);
    // Prime the layer cache
    let _ = container.get(&request).unwrap();
    group.bench_function("request_hit", |b| {
        b.iter(|| {
            let v = container.get(&request).unwrap();
            black_box(&v.data);
        })
    });
    guard.close().unwrap();

    let transient_container = Container::new();
    let transient = Token::<Service>::transient("service");
    transient_container
        .provide(&transient)
        .factory(|_| Ok(Service { data: [0; 64] }))
        .unwrap();

    group.bench_function("transient", |b| {
        b.iter(|| {
            let v = transient_container.get(&transient).unwrap();
            black_box(&v.data);
        })
    });

    group.finish();
}

fn bench_scope_lifecycle(c: &mut Criterion) {
    struct RequestService {
        data: Vec<u8>,
    }

    let mut group = c.benchmark_group("scope_lifecycle");

    let empty = Container::new();
    group.bench_function("empty_scope_enter_close", |b| {
        b.iter(|| {
            empty
                .scope_sync(ScopeKind::Request, || Ok::<_, DiError>(()))
                .unwrap();
        })
    });

    let container = Container::new();
    let token = Token::<RequestService>::request("request_service");
    container
        .provide(&token)
        .factory(|_| {
            Ok(RequestService {
                data: vec![0; 1024],
            })
        })
        .unwrap();

    group.bench_function("scope_with_service", |b| {
        b.iter(|| {
            container
                .scope_sync(ScopeKind::Request, || {
                    let service = container.get(&token)?;
                    black_box(&service.data);
                    Ok::<_, DiError>(())
                })
                .unwrap();
        })
    });

    group.finish();
}

fn bench_dependency_chain_depth(c: &mut Criterion) {
    struct Level(usize);

    let mut group = c.benchmark_group("dependency_chain");

    let container = Container::new();
    let tokens: Vec<Token<Level>> = (0..8)
        .map(|i| {
            Token::<Level>::builder(format!("level_{i}"))
                .in_scope(stratum_di::Scope::Singleton)
                .build()
        })
        .collect();

    container
        .provide(&tokens[0])
        .factory(|_| Ok(Level(0)))
        .unwrap();
    for i in 1..8 {
        let previous = tokens[i - 1].clone();
        container
            .provide(&tokens[i])
            .factory(move |cx| {
                let below = cx.get(&previous)?;
                Ok(Level(below.0 + 1))
            })
            .unwrap();
    }

    let deepest = tokens[7].clone();
    group.bench_function("chain_depth_8", |b| {
        b.iter(|| {
            let v = container.get(&deepest).unwrap();
            black_box(v.0);
        })
    });

    group.finish();
}

fn bench_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention");

    let container = Container::new();
    let answer = Token::<u64>::singleton("answer");
    container.provide(&answer).factory(|_| Ok(42u64)).unwrap();

    // Prime the singleton
    let _ = container.get(&answer).unwrap();

    for &thread_count in &[1, 2, 4, 8] {
        group.bench_with_input(
            BenchmarkId::new("singleton_threads", thread_count),
            &thread_count,
            |b, &threads| {
                b.iter_custom(|iters| {
                    let start = std::time::Instant::now();
                    std::thread::scope(|s| {
                        for _ in 0..threads {
                            let container = &container;
                            let answer = &answer;
                            s.spawn(move || {
                                for _ in 0..iters / threads as u64 {
                                    let v = container.get(answer).unwrap();
                                    black_box(v);
                                }
                            });
                        }
                    });
                    start.elapsed()
                })
            },
        );
    }

    group.finish();
}

// ===== Macro Benchmarks =====

fn bench_large_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("large_registry");

    for &token_count in &[10, 100, 1000] {
        let container = Container::new();
        let answer = Token::<u64>::singleton("answer");
        container.provide(&answer).factory(|_| Ok(42u64)).unwrap();

        for i in 0..token_count {
            let filler = Token::<u32>::builder(format!("filler_{i}"))
                .in_scope(stratum_di::Scope::Singleton)
                .build();
            container
                .provide(&filler)
                .factory(move |_| Ok(i as u32))
                .unwrap();
        }
        let _ = container.get(&answer).unwrap();

        group.bench_with_input(
            BenchmarkId::new("resolve_from_large_registry", token_count),
            &token_count,
            |b, _| {
                b.iter(|| {
                    let v = container.get(&answer).unwrap();
                    black_box(v);
                })
            },
        );
    }

    group.finish();
}

fn bench_mixed_workload(c: &mut Criterion) {
    // Realistic call mix: 70% singleton hits, 20% request hits, 10% transient.
    struct SingletonService(u64);
    struct RequestService(u64);
    struct TransientService(u64);

    let container = Container::new();
    let singleton = Token::<SingletonService>::singleton("singleton_service");
    let request = Token::<RequestService>::request("request_service");
    let transient = Token::<TransientService>::transient("transient_service");

    container
        .provide(&singleton)
        .factory(|_| Ok(SingletonService(1)))
        .unwrap();
    container
        .provide(&request)
        .factory(|_| Ok(RequestService(2)))
        .unwrap();
    container
        .provide(&transient)
        .factory(|_| Ok(TransientService(3)))
        .unwrap();

    let guard = container.enter_scope(ScopeKind::Request);
    let _ = container.get(&singleton).unwrap();
    let _ = container.get(&request).unwrap();

    c.bench_function("mixed_workload_realistic", |b| {
        b.iter(|| {
            for _ in 0..7 {
                let v = container.get(&singleton).unwrap();
                black_box(v.0);
            }
            for _ in 0..2 {
                let v = container.get(&request).unwrap();
                black_box(v.0);
            }
            let v = container.get(&transient).unwrap();
            black_box(v.0);
        })
    });

    guard.close().unwrap();
}

criterion_group!(
    micro_benches,
    bench_singleton_hit,
    bench_singleton_cold,
    bench_request_vs_transient,
    bench_scope_lifecycle,
    bench_dependency_chain_depth,
    bench_contention
);

criterion_group!(macro_benches, bench_large_registry, bench_mixed_workload);

criterion_main!(micro_benches, macro_benches);
