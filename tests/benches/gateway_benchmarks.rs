//! # PM Gateway Benchmarks
//!
//! Hot-path costs paid by every proxied request:
//!
//! | Component | Operation | Target |
//! |-----------|-----------|--------|
//! | Rate limiter | check, existing key | < 1µs |
//! | Rate limiter | check, new key with eviction | O(max_keys) |
//! | Circuit breaker | acquire + record success | < 1µs |

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use pm_api_gateway::domain::config::BucketStoreConfig;
use pm_api_gateway::domain::{CircuitBreakerConfig, RateLimitConfig};
use pm_api_gateway::ports::{Clock, SystemClock};
use pm_api_gateway::{CircuitBreakerManager, RateLimitKey, RateLimiter};

fn clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

fn bench_rate_limiter(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate-limiter");
    group.measurement_time(Duration::from_secs(5));

    let config = RateLimitConfig {
        capacity: 1_000_000,
        refill_per_second: 1_000_000.0,
        enabled: true,
    };

    let limiter = RateLimiter::new("bench", config.clone(), &BucketStoreConfig::default(), clock());
    let key = RateLimitKey::new("10.0.0.1");
    group.bench_function("check_existing_key", |b| {
        b.iter(|| black_box(limiter.check(black_box(&key))))
    });

    for max_keys in [100usize, 1_000] {
        let store = BucketStoreConfig {
            max_keys,
            ..BucketStoreConfig::default()
        };
        let limiter = RateLimiter::new("bench", config.clone(), &store, clock());
        let keys: Vec<RateLimitKey> = (0..max_keys * 2)
            .map(|i| RateLimitKey::new(format!("10.{}.{}.{}", (i >> 16) & 0xff, (i >> 8) & 0xff, i & 0xff)))
            .collect();

        group.throughput(Throughput::Elements(keys.len() as u64));
        group.bench_with_input(BenchmarkId::new("check_new_keys_bounded", max_keys), &keys, |b, keys| {
            b.iter(|| {
                for key in keys {
                    black_box(limiter.check(key));
                }
            })
        });
    }

    group.finish();
}

fn bench_circuit_breaker(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit-breaker");

    let manager = CircuitBreakerManager::new(CircuitBreakerConfig::default(), clock());
    manager.register("auth-service", CircuitBreakerConfig::default());

    group.bench_function("acquire_and_record_success", |b| {
        b.iter(|| {
            if let Ok(permit) = manager.try_acquire(black_box("auth-service")) {
                permit.record_success();
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_rate_limiter, bench_circuit_breaker);
criterion_main!(benches);
