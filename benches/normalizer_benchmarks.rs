use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndr_core::models::CarrierSignal;
use ndr_core::normalizer::{signal_key, RuleRegistry, SignalNormalizer};

fn signal(carrier: &str, code: &str, remarks: &str) -> CarrierSignal {
    CarrierSignal {
        carrier_id: carrier.to_string(),
        shipment_reference: "AWB-1029384756".to_string(),
        status_code: code.to_string(),
        remarks: remarks.to_string(),
        attempt_number: Some(2),
        timestamp: Utc
            .with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
            .single()
            .unwrap_or_else(Utc::now),
        carrier_event_key: None,
    }
}

fn benchmark_status_code_classification(c: &mut Criterion) {
    let normalizer = SignalNormalizer::new(RuleRegistry::builtin(), 60);
    let refused = signal("bluedart", "REFUSED", "");
    c.bench_function("classify_status_code", |b| {
        b.iter(|| normalizer.normalize(black_box(&refused)))
    });
}

fn benchmark_keyword_classification(c: &mut Criterion) {
    let normalizer = SignalNormalizer::new(RuleRegistry::builtin(), 60);
    let remarks = signal(
        "delhivery",
        "NDR",
        "Consignee not reachable on phone, door locked at the time of visit",
    );
    c.bench_function("classify_keywords", |b| {
        b.iter(|| normalizer.normalize(black_box(&remarks)))
    });
}

fn benchmark_fingerprint(c: &mut Criterion) {
    let unkeyed = signal("delhivery", "NDR", "customer not available");
    c.bench_function("signal_fingerprint", |b| {
        b.iter(|| signal_key(black_box(&unkeyed)))
    });
}

criterion_group!(
    benches,
    benchmark_status_code_classification,
    benchmark_keyword_classification,
    benchmark_fingerprint
);
criterion_main!(benches);
