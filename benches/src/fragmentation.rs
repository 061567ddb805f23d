//! Replays allocation traces through each policy and writes the summaries to
//! `results/fragmentation.csv`.
//!
//! Run with a trace file to replay it, or without arguments to replay
//! randomly generated traces.

use std::{fmt::Write, path::PathBuf};

use tagheap::{
    sim::{parse_trace, Action, Simulator, Summary},
    BestFit, FirstFit, Heap, Policy,
};

const HEAP_SIZE: usize = 1 << 20;
const RANDOM_TRACES: usize = 50;
const TRACE_LENGTH: usize = 20000;
const MAX_ALLOC_SIZE: usize = 4000;

struct NamedPolicy {
    name: &'static str,
    replay: fn(&[Action]) -> Summary,
}

const POLICIES: &[NamedPolicy] = &[
    NamedPolicy { name: "First Fit", replay: replay::<FirstFit> },
    NamedPolicy { name: "Best Fit", replay: replay::<BestFit> },
];

fn main() {
    let cargo_manifest_dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap());
    let results_dir = cargo_manifest_dir.join("results");
    std::fs::create_dir_all(&results_dir).unwrap();

    let traces = match std::env::args().nth(1) {
        Some(path) => {
            let src = std::fs::read_to_string(&path).unwrap();
            vec![parse_trace(&src).unwrap_or_else(|err| panic!("{}: {}", path, err))]
        }
        None => (0..RANDOM_TRACES).map(|_| random_trace(TRACE_LENGTH)).collect(),
    };

    let mut csv = String::from(
        "policy,failed,mean_fragmentation,max_fragmentation,mean_metadata,alloc_ns,free_ns\n",
    );

    for policy in POLICIES {
        eprintln!("Replaying {} trace(s) with {}...", traces.len(), policy.name);

        let summaries = traces.iter().map(|trace| (policy.replay)(trace)).collect::<Vec<_>>();
        let n = summaries.len() as f64;

        let failed = summaries.iter().map(|s| s.failed_allocations).sum::<usize>();
        let mean_frag = summaries.iter().map(|s| s.mean_fragmentation).sum::<f64>() / n;
        let max_frag = summaries.iter().map(|s| s.max_fragmentation).fold(0.0, f64::max);
        let mean_meta = summaries.iter().map(|s| s.mean_metadata).sum::<f64>() / n;
        let alloc_ns = summaries.iter().map(|s| s.mean_alloc_time.as_nanos()).sum::<u128>()
            / summaries.len() as u128;
        let free_ns = summaries.iter().map(|s| s.mean_free_time.as_nanos()).sum::<u128>()
            / summaries.len() as u128;

        if let [summary] = summaries.as_slice() {
            eprintln!("{}", summary);
        }

        writeln!(
            csv,
            "{},{},{},{},{},{},{}",
            policy.name, failed, mean_frag, max_frag, mean_meta, alloc_ns, free_ns
        )
        .unwrap();
    }

    let csv_file_path = results_dir.join("fragmentation.csv");
    std::fs::write(csv_file_path, csv).unwrap();
}

fn replay<P: Policy + Default>(trace: &[Action]) -> Summary {
    let mut mem = vec![0u8; HEAP_SIZE];
    let mut heap = Heap::<0, 0>::init(&mut mem);

    let report = Simulator::new(&mut heap, P::default()).run(trace).unwrap();
    report.summary
}

/// Allocate more often than free, tending towards small sizes.
fn random_trace(len: usize) -> Vec<Action> {
    let mut live = Vec::new();
    let mut next_id = 0;

    (0..len)
        .map(|_| {
            if live.is_empty() || fastrand::usize(0..=9) < 6 {
                let id = next_id;
                next_id += 1;
                live.push(id);

                let size = fastrand::usize(1..=MAX_ALLOC_SIZE) >> fastrand::u32(0..8);
                Action::Alloc { id, size }
            } else {
                Action::Free { id: live.swap_remove(fastrand::usize(0..live.len())) }
            }
        })
        .collect()
}
