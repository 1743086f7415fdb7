//! Property-based tests for parcel core

use parcel_core::*;
use proptest::prelude::*;
use std::time::Duration;

proptest! {
    #[test]
    fn props_plan_tiles_file_exactly(
        file_size in 1u64..50_000_000,
        part_size in 1u64..20_000_000
    ) {
        let plan = PartPlan::new(file_size, part_size).unwrap();
        let parts: Vec<PartSpec> = plan.iter().collect();

        prop_assert_eq!(parts.len() as u32, plan.len());
        prop_assert_eq!(parts[0].byte_offset, 0);
        prop_assert_eq!(parts.last().unwrap().end(), file_size);

        for (i, part) in parts.iter().enumerate() {
            // Contiguous 1-based numbering
            prop_assert_eq!(part.part_number, i as u32 + 1);
            prop_assert!(part.byte_length > 0);

            // No gap or overlap with the next part
            if let Some(next) = parts.get(i + 1) {
                prop_assert_eq!(part.end(), next.byte_offset);
                prop_assert_eq!(part.byte_length, part_size);
            } else {
                prop_assert!(part.byte_length <= part_size);
            }
        }

        let total: u64 = parts.iter().map(|p| p.byte_length).sum();
        prop_assert_eq!(total, file_size);
    }

    #[test]
    fn props_plan_lookup_agrees_with_iteration(
        file_size in 1u64..1_000_000,
        part_size in 1u64..100_000
    ) {
        let plan = PartPlan::new(file_size, part_size).unwrap();
        for spec in &plan {
            prop_assert_eq!(plan.part(spec.part_number), Some(spec));
        }
        prop_assert_eq!(plan.part(plan.len() + 1), None);
    }

    #[test]
    fn props_backoff_never_exceeds_cap(
        max_attempts in 1u32..20,
        base_ms in 1u64..1_000,
        extra_ms in 0u64..10_000
    ) {
        let policy = RetryPolicy::new(
            max_attempts,
            Duration::from_millis(base_ms),
            Duration::from_millis(base_ms + extra_ms),
        );
        let mut state = policy.start();
        let err = RemoteError::transient("503 slow down");
        let mut previous = Duration::ZERO;
        let mut retries = 0;

        loop {
            state.begin_attempt();
            match policy.on_failure(&mut state, &err) {
                RetryDecision::RetryAfter(delay) => {
                    prop_assert!(delay <= policy.max_delay);
                    prop_assert!(delay >= previous);
                    previous = delay;
                    retries += 1;
                }
                RetryDecision::Exhausted => break,
                RetryDecision::Fail => prop_assert!(false, "transient error failed"),
            }
        }

        prop_assert_eq!(retries, max_attempts - 1);
        prop_assert_eq!(state.attempts, max_attempts);
    }
}

#[test]
fn test_concrete_plans() {
    let plan = PartPlan::new(26_000_000, 10_000_000).unwrap();
    let lengths: Vec<u64> = plan.iter().map(|p| p.byte_length).collect();
    assert_eq!(lengths, vec![10_000_000, 10_000_000, 6_000_000]);

    let plan = PartPlan::new(1, 10_000_000).unwrap();
    let only = plan.part(1).unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(only.byte_offset, 0);
    assert_eq!(only.byte_length, 1);
}
