//! Property tests for signal idempotency and attempt accounting.

use chrono::Duration;
use ndr_core::models::ActionType;
use ndr_core::orchestration::IngestDisposition;
use ndr_core::services::Clock;
use ndr_core::test_helpers::{ndr_signal, ndr_signal_at, with_event_key, TestEngine};
use proptest::prelude::*;

fn remarks_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        "customer not available",
        "door locked",
        "customer refused",
        "incomplete address",
        "cash not ready",
        "see notes",
    ])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// N deliveries of one keyed signal create one event with one detection
    #[test]
    fn repeated_keyed_signal_creates_exactly_one_event(
        copies in 1usize..12,
        remarks in remarks_strategy(),
    ) {
        tokio_test::block_on(async {
            let engine = TestEngine::new();
            let signal = with_event_key(ndr_signal("X", "S1", "NDR", remarks, Some(1)), "carrier-evt-1");

            let mut dispositions = Vec::new();
            for _ in 0..copies {
                dispositions.push(engine.ingest_response(signal.clone()).await.disposition);
            }

            prop_assert_eq!(dispositions[0], IngestDisposition::Created);
            prop_assert!(dispositions[1..].iter().all(|d| *d == IngestDisposition::Duplicate));

            let events = engine.store.events_for_shipment("S1");
            prop_assert_eq!(events.len(), 1);
            prop_assert_eq!(events[0].actions_of(ActionType::Detected).count(), 1);
            prop_assert_eq!(events[0].attempt_number, 1);
            Ok(())
        })?;
    }

    /// Attempts grow by exactly one per distinct carrier attempt, whatever the redelivery pattern
    #[test]
    fn attempt_number_is_monotonic(
        copies_per_attempt in prop::collection::vec(1usize..4, 1..6),
    ) {
        tokio_test::block_on(async {
            let engine = TestEngine::new();
            let start = engine.clock.now();

            let mut previous = 0u32;
            for (index, copies) in copies_per_attempt.iter().enumerate() {
                let attempt = index as u32 + 1;
                for _ in 0..*copies {
                    let response = engine
                        .ingest_response(ndr_signal_at("S1", "door locked", attempt, start))
                        .await;
                    let current = response.attempt_number.unwrap_or_default();
                    prop_assert!(current >= previous);
                    prop_assert!(current - previous <= 1);
                    prop_assert_eq!(current, attempt);
                    previous = current;
                }
            }

            let events = engine.store.events_for_shipment("S1");
            prop_assert_eq!(events.len(), 1);
            prop_assert_eq!(events[0].attempt_number, copies_per_attempt.len() as u32);
            Ok(())
        })?;
    }

    /// The deadline set at detection survives every later write
    #[test]
    fn resolution_deadline_is_fixed_at_creation(
        attempts in 1u32..=3,
        hours_between in 0i64..20,
    ) {
        tokio_test::block_on(async {
            let engine = TestEngine::new();
            let start = engine.clock.now();
            let first = engine
                .ingest(ndr_signal_at("S1", "door locked", 1, start))
                .await;
            let deadline = engine.event(first).await.resolution_deadline;

            for attempt in 2..=attempts {
                engine.clock.advance(Duration::hours(hours_between));
                engine
                    .ingest_response(ndr_signal_at("S1", "door locked", attempt, engine.clock.now()))
                    .await;
            }

            prop_assert_eq!(deadline, start + Duration::hours(48));
            prop_assert_eq!(engine.event(first).await.resolution_deadline, deadline);
            Ok(())
        })?;
    }
}
