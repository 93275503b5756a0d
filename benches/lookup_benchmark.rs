//! Benchmarks for the request-time lookup path.
//!
//! Run with: cargo bench
//!
//! Measures range matcher lookups at different table sizes, the local
//! decision store, a full resolve, and the cost of publishing a new range
//! snapshot.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use k2bouncer::decision::{DecisionDelta, DecisionRecord};
use k2bouncer::store::DecisionStore;
use k2bouncer::{
    CacheClient, DecisionKind, DecisionSource, FallbackConfig, LocalStore, RangeMatcher, Resolver,
    StreamSync, SyncError, Synchronizer,
};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Matcher holding `count` distinct /24 ranges (and a few /16s).
fn build_matcher(count: usize) -> RangeMatcher {
    let matcher = RangeMatcher::new();
    let expires = Instant::now() + Duration::from_secs(3600);
    matcher.update(|tables| {
        for i in 0..count {
            let net = format!("{}.{}.{}.0/24", 10 + (i >> 16) % 200, (i >> 8) & 0xff, i & 0xff);
            let kind = if i % 4 == 0 {
                DecisionKind::Captcha
            } else {
                DecisionKind::Ban
            };
            if let Ok(net) = net.parse() {
                tables.insert(net, kind, expires, "bench");
            }
        }
        for i in 0..(count / 100) {
            if let Ok(net) = format!("{}.{}.0.0/16", 10 + (i >> 8) % 200, i & 0xff).parse() {
                tables.insert(net, DecisionKind::Captcha, expires, "bench");
            }
        }
    });
    matcher
}

/// Mix of addresses inside and outside the generated ranges.
fn generate_addresses(count: usize) -> Vec<IpAddr> {
    (0..count)
        .map(|i| {
            if i % 2 == 0 {
                IpAddr::V4(Ipv4Addr::new(10, (i >> 8) as u8, i as u8, 7))
            } else {
                IpAddr::V4(Ipv4Addr::new(230, (i >> 8) as u8, i as u8, 7))
            }
        })
        .collect()
}

fn bench_range_lookup(c: &mut Criterion) {
    let addresses = generate_addresses(1000);
    let mut group = c.benchmark_group("range_lookup");
    group.throughput(Throughput::Elements(addresses.len() as u64));

    for size in [100, 1_000, 10_000, 100_000].iter() {
        let matcher = build_matcher(*size);
        group.bench_with_input(BenchmarkId::new("ranges", size), size, |b, _| {
            b.iter(|| {
                for ip in &addresses {
                    black_box(matcher.contains(*ip));
                }
            })
        });
    }

    group.finish();
}

fn bench_ipv6_lookup(c: &mut Criterion) {
    let matcher = RangeMatcher::new();
    let expires = Instant::now() + Duration::from_secs(3600);
    matcher.update(|tables| {
        for i in 0..10_000u32 {
            if let Ok(net) = format!("2001:db8:{:x}::/48", i).parse() {
                tables.insert(net, DecisionKind::Ban, expires, "bench");
            }
        }
    });

    let hit: IpAddr = "2001:db8:42::1".parse().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
    let miss: IpAddr = "2001:db9::1".parse().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    let mut group = c.benchmark_group("ipv6_lookup");
    group.bench_function("hit", |b| b.iter(|| black_box(matcher.contains(hit))));
    group.bench_function("miss", |b| b.iter(|| black_box(matcher.contains(miss))));
    group.finish();
}

fn bench_local_store(c: &mut Criterion) {
    let store = LocalStore::new();
    for i in 0..10_000 {
        store.set(&format!("10.0.{}.{}", i >> 8, i & 0xff), "t", Duration::from_secs(3600));
    }

    let mut group = c.benchmark_group("local_store");
    group.bench_function("get_hit", |b| b.iter(|| black_box(store.get("10.0.20.20"))));
    group.bench_function("get_miss", |b| b.iter(|| black_box(store.get("192.0.2.1"))));
    group.bench_function("set", |b| {
        b.iter(|| store.set("198.51.100.1", "c", Duration::from_secs(60)))
    });
    group.finish();
}

struct NoFeed;

impl DecisionSource for NoFeed {
    fn query_ip(&self, _ip: IpAddr) -> Result<Vec<DecisionRecord>, SyncError> {
        Ok(Vec::new())
    }

    fn pull_stream(&self, _startup: bool) -> Result<DecisionDelta, SyncError> {
        Ok(DecisionDelta::default())
    }
}

fn bench_resolve(c: &mut Criterion) {
    let cache = CacheClient::local();
    let ranges = Arc::new(build_matcher(10_000));
    let stream = Arc::new(StreamSync::new(
        Arc::new(NoFeed),
        cache.clone(),
        ranges.clone(),
        Duration::from_secs(86400),
        None,
    ));
    let resolver = Resolver::new(
        cache.clone(),
        ranges,
        Synchronizer::Stream(stream),
        FallbackConfig::default(),
    );
    cache.set("192.0.2.5", "t", Duration::from_secs(3600));

    let addresses = generate_addresses(1000);
    let cached: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 5));

    let mut group = c.benchmark_group("resolve");
    group.bench_function("cached_address", |b| {
        b.iter(|| black_box(resolver.resolve(cached)))
    });
    group.throughput(Throughput::Elements(addresses.len() as u64));
    group.bench_function("range_mix", |b| {
        b.iter(|| {
            for ip in &addresses {
                black_box(resolver.resolve(*ip));
            }
        })
    });
    group.finish();
}

fn bench_snapshot_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_publish");

    for size in [1_000, 10_000].iter() {
        let matcher = build_matcher(*size);
        let expires = Instant::now() + Duration::from_secs(60);
        group.bench_with_input(BenchmarkId::new("insert_one", size), size, |b, _| {
            b.iter(|| {
                let _ = matcher.insert("203.0.113.0/24", DecisionKind::Ban, expires);
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_range_lookup,
    bench_ipv6_lookup,
    bench_local_store,
    bench_resolve,
    bench_snapshot_publish,
);

criterion_main!(benches);
