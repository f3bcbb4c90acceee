// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]

#[path = "common.rs"]
mod common;

use libfuzzer_sys::fuzz_target;
use rrd_core::{
    BudgetMode, Constraints, DecodeConfig, ExecutionContext, ParameterSet, Report, ReproMode,
};
use rrd_decoder::decode;

fn build_probability(cursor: &mut common::ByteCursor<'_>) -> f64 {
    match cursor.next_u8() % 8 {
        0 => 0.0,
        1 => 1.0,
        2 => cursor.next_f64(),
        _ => f64::from(cursor.next_u8()) / 255.0,
    }
}

fn build_bits(cursor: &mut common::ByteCursor<'_>, bit_size: usize) -> String {
    let mode = cursor.next_u8();
    let len = match mode % 16 {
        0 => bit_size.saturating_sub(1),
        1 => bit_size + 1,
        _ => bit_size,
    };
    (0..len)
        .map(|_| match cursor.next_u8() {
            0 => 'x',
            byte if byte & 1 == 0 => '0',
            _ => '1',
        })
        .collect()
}

fn build_lambdas(cursor: &mut common::ByteCursor<'_>) -> Vec<f64> {
    let count = common::bounded(cursor.next_u8(), 0, 6);
    (0..count)
        .map(|_| match cursor.next_u8() % 10 {
            0 => -0.1,
            1 => f64::NAN,
            2 => 0.0,
            _ => f64::from(cursor.next_u8()) / 200.0,
        })
        .collect()
}

fuzz_target!(|data: &[u8]| {
    let mut cursor = common::ByteCursor::new(data);

    let params = ParameterSet {
        bit_size: common::bounded(cursor.next_u8(), 0, 48),
        hash_count: common::bounded(cursor.next_u8(), 0, 4),
        permanent_probability: build_probability(&mut cursor),
        instantaneous_probability_for_zero: build_probability(&mut cursor),
        instantaneous_probability_for_one: build_probability(&mut cursor),
    };

    let mut config = DecodeConfig {
        bin_width: common::bounded(cursor.next_u8(), 0, 400) as u64,
        bin_start: u64::from(cursor.next_u16() % 512),
        bin_upper_bound: match cursor.next_u8() % 3 {
            0 => None,
            _ => Some(u64::from(cursor.next_u16()) % 4_096),
        },
        ..DecodeConfig::default()
    };
    if cursor.next_u8() & 1 == 1 {
        config.lambdas = build_lambdas(&mut cursor);
    }
    config.lasso.max_iterations = common::bounded(cursor.next_u8(), 0, 200);

    let report_count = common::bounded(cursor.next_u8(), 0, 64);
    let reports = (0..report_count)
        .map(|_| {
            let bits = build_bits(&mut cursor, params.bit_size);
            Report::new(bits, u64::from(cursor.next_u16()))
        })
        .collect::<Vec<_>>();

    let constraints = Constraints {
        time_budget_ms: (cursor.next_u8() % 4 == 0).then_some(1),
        max_design_cells: match cursor.next_u8() % 4 {
            0 => Some(common::bounded(cursor.next_u8(), 0, 512)),
            _ => None,
        },
    };
    let budget_mode = if cursor.next_u8() & 1 == 0 {
        BudgetMode::HardFail
    } else {
        BudgetMode::SoftDegrade
    };
    let repro_mode = match cursor.next_u8() % 3 {
        0 => ReproMode::Strict,
        1 => ReproMode::Balanced,
        _ => ReproMode::Fast,
    };
    let exec = ExecutionContext::new(&constraints)
        .with_budget_mode(budget_mode)
        .with_repro_mode(repro_mode);

    if let Ok(outcome) = decode(&reports, params, &config, &exec) {
        for entry in outcome.table.iter() {
            assert!(entry.probability >= 0.0 || entry.probability.is_nan());
        }
    }
});
