use std::sync::Arc;
use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use vacant_room_guard::config::{AlertConfig, GuardConfig};
use vacant_room_guard::core::{AbuseGuard, LogAlertSink};

fn abuse_guard_benchmark(c: &mut Criterion) {
    let guard = AbuseGuard::new(
        GuardConfig::default(),
        &AlertConfig::default(),
        Arc::new(LogAlertSink),
    )
    .unwrap();
    let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let keys: Vec<String> = (0..1024).map(|i| format!("10.0.{}.{}", i / 256, i % 256)).collect();

    let mut tick = 0i64;
    c.bench_function("check_request_spread_keys", |b| {
        b.iter(|| {
            tick += 1;
            let key = &keys[(tick as usize) % keys.len()];
            let now = start + Duration::milliseconds(tick);
            black_box(guard.check_request_at(key, now))
        })
    });

    c.bench_function("check_request_banned_key", |b| {
        guard.ban_key("192.0.2.1", Duration::days(1), start);
        b.iter(|| black_box(guard.check_request_at("192.0.2.1", start)))
    });
}

criterion_group!(benches, abuse_guard_benchmark);
criterion_main!(benches);
