#![no_main]

use cytoframe::{DimRange, Table, gate, gate_out};
use libfuzzer_sys::fuzz_target;

const DIMS: [&str; 2] = ["x", "y"];

fuzz_target!(|data: &[u8]| {
    let values = data
        .chunks_exact(8)
        .map(|chunk| f64::from_le_bytes(chunk.try_into().expect("8 bytes")))
        .collect::<Vec<_>>();
    if values.len() < 4 {
        return;
    }
    let (bounds, cells) = values.split_at(4);
    let cells = &cells[..cells.len() - cells.len() % DIMS.len()];
    let table = Table::new(cells.to_vec(), DIMS).expect("whole rows");

    let ranges = [
        DimRange::new("x", bounds[0].min(bounds[1]), bounds[0].max(bounds[1])),
        DimRange::new("y", bounds[2].min(bounds[3]), bounds[2].max(bounds[3])),
    ];
    let kept = gate(&table, &ranges).expect("known dims");
    assert_eq!(gate(&kept, &ranges).expect("known dims"), kept);

    let dropped = gate_out(&table, &ranges).expect("known dims");
    assert!(kept.rows() + dropped.rows() <= table.rows());
});
