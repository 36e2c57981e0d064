//! Property tests for the numeric heuristics: moving averages, success
//! rates, duration estimation, and decision confidence.

use proptest::prelude::*;
use std::collections::HashMap;

use hivemind::domain::models::agent::AgentPerformance;
use hivemind::domain::models::task::estimate_duration_ms;
use hivemind::domain::models::QueenType;
use hivemind::services::QueenCoordinator;

proptest! {
    /// The moving average of completed-task durations always stays within
    /// the range of observed durations.
    #[test]
    fn moving_average_bounded_by_observations(
        durations in prop::collection::vec(1.0f64..100_000.0, 1..50)
    ) {
        let mut perf = AgentPerformance::default();
        for (i, duration) in durations.iter().enumerate() {
            perf.record_completion(*duration, (i + 1) as u64);
        }
        let min = durations.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = durations.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(perf.avg_task_time_ms >= min - 1e-6);
        prop_assert!(perf.avg_task_time_ms <= max + 1e-6);
    }

    /// The weighted success rate never leaves the unit interval, whatever
    /// the outcome sequence.
    #[test]
    fn success_rate_stays_in_unit_interval(
        outcomes in prop::collection::vec(any::<bool>(), 1..100)
    ) {
        let mut perf = AgentPerformance::default();
        for (i, outcome) in outcomes.iter().enumerate() {
            perf.record_outcome(*outcome, (i + 1) as u64);
        }
        prop_assert!(perf.success_rate >= 0.0);
        prop_assert!(perf.success_rate <= 1.0);
    }

    /// Duration estimates are a multiple of the 5 s bucket and clipped to
    /// 60 s for any description; zero keywords means a zero estimate.
    #[test]
    fn duration_estimate_clipped(description in ".{0,500}") {
        let estimate = estimate_duration_ms(&description);
        prop_assert!(estimate <= 60_000);
        prop_assert_eq!(estimate % 5_000, 0);
    }

    /// Decision confidence lands in (0, 1] for any non-empty option list
    /// and any worker vote assignment over those options.
    #[test]
    fn decision_confidence_in_unit_interval(
        options in prop::collection::vec("[a-z]{1,12}", 1..6),
        votes in prop::collection::vec((0usize..6, 0usize..6), 0..20)
    ) {
        let queen = QueenCoordinator::new(QueenType::Strategic);
        let mut worker_votes = HashMap::new();
        for (voter, choice) in votes {
            let option = options[choice % options.len()].clone();
            worker_votes.insert(format!("w{voter}"), option);
        }
        let outcome = queen
            .make_decision("topic", &options, &worker_votes)
            .expect("non-empty options always decide");
        prop_assert!(outcome.confidence > 0.0);
        prop_assert!(outcome.confidence <= 1.0);
        prop_assert!(options.contains(&outcome.result));
    }
}
