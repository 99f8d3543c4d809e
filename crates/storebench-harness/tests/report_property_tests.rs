//! Property-based tests for the result registry.

use proptest::prelude::*;
use storebench_backends::{ElapsedMs, Phase};
use storebench_harness::{Cell, ResultKind, ResultRegistry, WorkerEvent};

// ============================================================================
// Strategies
// ============================================================================

fn backend_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("redb".to_string()),
        Just("sqlite-actor".to_string()),
        Just("sqlite-wal".to_string()),
        Just("duckdb".to_string()),
    ]
}

fn phase_strategy() -> impl Strategy<Value = Phase> {
    prop_oneof![
        Just(Phase::Setup),
        Just(Phase::Load),
        Just(Phase::Search),
        Just(Phase::Update),
    ]
}

fn event_strategy() -> impl Strategy<Value = WorkerEvent> {
    prop_oneof![
        (backend_strategy(), 0usize..3, 0.0f64..10_000.0).prop_map(|(db, kind, ms)| {
            WorkerEvent::result(ResultKind::ALL[kind], ElapsedMs(ms), db)
        }),
        (backend_strategy(), phase_strategy(), any::<bool>()).prop_map(|(db, phase, timed_out)| {
            WorkerEvent::PhaseFailed {
                phase,
                database: db,
                error: "failed".to_string(),
                timed_out,
            }
        }),
    ]
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_every_backend_has_a_cell_per_row(events in prop::collection::vec(event_strategy(), 0..40)) {
        let mut registry = ResultRegistry::new(300, ["redb"]);
        for event in &events {
            registry.apply(event);
        }

        for backend in &registry.backends {
            for kind in ResultKind::ALL {
                prop_assert!(registry.cell(kind, backend).is_some());
            }
        }
        prop_assert_eq!(registry.render_table().lines().count(), 5);
    }

    #[test]
    fn prop_last_event_wins(events in prop::collection::vec(event_strategy(), 1..40)) {
        let mut registry = ResultRegistry::new(300, Vec::<String>::new());
        for event in &events {
            registry.apply(event);
        }

        let last = events.last().unwrap();
        let kinds = match last.kind() {
            Some(kind) => vec![kind],
            None => ResultKind::ALL.to_vec(),
        };
        for kind in kinds {
            let cell = registry.cell(kind, last.database()).unwrap();
            match last {
                WorkerEvent::PhaseFailed { .. } => {
                    prop_assert!(matches!(cell, Cell::Failed(_)));
                }
                _ => {
                    prop_assert_eq!(cell, &Cell::Done(last.total_time().unwrap()));
                }
            }
        }
    }
}
