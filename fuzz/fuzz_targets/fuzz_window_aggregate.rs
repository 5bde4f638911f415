#![no_main]

use cytoframe::{AggMethod, Table, WindowSpec, window_aggregate};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let [size, overlap, batch, method, rest @ ..] = data else {
        return;
    };
    let Ok(spec) = WindowSpec::new(usize::from(*size % 16), usize::from(*overlap % 16)) else {
        return;
    };
    let method = if method % 2 == 0 {
        AggMethod::Median
    } else {
        AggMethod::Average
    };
    let values = rest
        .chunks_exact(2)
        .map(|pair| f64::from(i16::from_le_bytes([pair[0], pair[1]])))
        .collect::<Vec<_>>();
    let usable = values.len() - values.len() % 2;
    let table = Table::new(values[..usable].to_vec(), ["t", "v"]).expect("whole rows");

    let small = window_aggregate(&table, "t", spec, method, usize::from(*batch).max(1))
        .expect("valid window");
    let large = window_aggregate(&table, "t", spec, method, usize::MAX).expect("valid window");
    assert_eq!(small.rows(), spec.window_count(table.rows()));
    assert_eq!(small, large);
});
