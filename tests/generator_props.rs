//! Property checks on generated command streams

use ioworker::config::{SizeWeight, StopCondition, WorkloadSpec};
use ioworker::generator::Generator;
use proptest::prelude::*;

fn size_list() -> impl Strategy<Value = Vec<SizeWeight>> {
    prop::collection::vec((1u32..=32, 1u32..=30, 0u32..=3), 1..4).prop_map(|mut entries| {
        // Ratios always add up to 100
        let others: u32 = entries.iter().skip(1).map(|e| e.1).sum();
        entries[0].1 = 100 - others;
        entries
            .into_iter()
            .map(|(blocks, ratio, align_pow)| SizeWeight {
                blocks,
                ratio,
                align: 1 << align_pow,
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn random_commands_stay_aligned_in_region(
        start in 0u64..1000,
        len in 64u64..100_000,
        sizes in size_list(),
        seed in any::<u64>(),
    ) {
        let spec = WorkloadSpec {
            size_distribution: sizes.clone(),
            seed: Some(seed),
            ..WorkloadSpec::new(start..start + len, StopCondition::io_count(1))
        };
        let aligns: Vec<u64> = sizes.iter().map(|s| s.align as u64).collect();

        for cmd in Generator::new(&spec).unwrap().take(200) {
            prop_assert!(cmd.blocks >= 1);
            prop_assert!(cmd.lba >= start);
            prop_assert!(cmd.lba + cmd.blocks as u64 <= start + len);
            prop_assert!(aligns.iter().any(|a| cmd.lba % a == 0));
        }
    }

    #[test]
    fn sequential_commands_stay_in_region(
        start in 0u64..1000,
        len in 64u64..10_000,
        step in prop::option::of(-64i16..64),
        seed in any::<u64>(),
    ) {
        let spec = WorkloadSpec {
            random: false,
            lba_start: start,
            lba_step: step,
            seed: Some(seed),
            ..WorkloadSpec::new(start..start + len, StopCondition::io_count(1))
        };

        for cmd in Generator::new(&spec).unwrap().take(500) {
            prop_assert!(cmd.lba >= start);
            prop_assert!(cmd.lba + cmd.blocks as u64 <= start + len);
        }
    }
}
