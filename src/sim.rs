//! Replay allocation traces against a [`Heap`] and a [`Policy`], recording
//! fragmentation and metadata overhead after every event.
//!
//! # Trace format
//!
//! One action per line. Blank lines and anything after `#` are ignored.
//!
//! ```text
//! # id size
//! alloc 0 128
//! alloc 1 64
//! free 0
//! ```
//!
//! With the `std` feature, the time each policy call takes is recorded too.

use alloc::{collections::BTreeMap, string::ToString, vec::Vec};

use log::debug;

#[cfg(feature = "std")]
use std::time::{Duration, Instant};

use crate::{
    error::TraceError,
    heap::{Chunk, Heap},
    policy::Policy,
};

/// A single step of an allocation trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Allocate `size` bytes and remember the chunk as `id`.
    Alloc { id: usize, size: usize },
    /// Release the chunk remembered as `id`.
    Free { id: usize },
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Action::Alloc { id, size } => write!(f, "alloc {} {}", id, size),
            Action::Free { id } => write!(f, "free {}", id),
        }
    }
}

/// Parse a trace in the format described in the [module docs](self).
pub fn parse_trace(src: &str) -> Result<Vec<Action>, TraceError> {
    let mut actions = Vec::new();

    for (index, line) in src.lines().enumerate() {
        let line_no = index + 1;
        let line = line.split('#').next().unwrap_or_default();

        let mut words = line.split_whitespace();
        let Some(word) = words.next() else { continue };

        let mut number = |what: &'static str| -> Result<usize, TraceError> {
            let text = words.next().ok_or(TraceError::Missing { line: line_no, what })?;
            text.parse()
                .map_err(|_| TraceError::InvalidNumber { line: line_no, text: text.to_string() })
        };

        let action = match word {
            "alloc" => {
                let id = number("id")?;
                let size = number("size")?;
                Action::Alloc { id, size }
            }
            "free" => Action::Free { id: number("id")? },
            _ => {
                return Err(TraceError::UnknownAction { line: line_no, word: word.to_string() })
            }
        };

        if let Some(extra) = words.next() {
            return Err(TraceError::Unexpected { line: line_no, text: extra.to_string() });
        }

        actions.push(action);
    }

    Ok(actions)
}

/// The heap's state after one replayed [`Action`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventRecord {
    /// 0-based position in the replay.
    pub number: usize,
    pub action: Action,
    /// The allocated or released chunk. `None` if an allocation failed.
    pub chunk: Option<Chunk>,
    /// [`Stats::external_fragmentation`](crate::Stats::external_fragmentation) after the event.
    pub fragmentation: f64,
    /// [`Stats::metadata_ratio`](crate::Stats::metadata_ratio) after the event.
    pub metadata: f64,
    /// Time spent in the policy's `allocate` or `release`.
    #[cfg(feature = "std")]
    pub execution: Duration,
}

/// Aggregate figures over a replay.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Summary {
    pub heap_size: usize,
    pub num_events: usize,
    /// Allocations the policy couldn't satisfy.
    pub failed_allocations: usize,
    pub mean_fragmentation: f64,
    pub max_fragmentation: f64,
    pub mean_metadata: f64,
    /// Mean [`EventRecord::execution`] over allocations, failed ones included.
    #[cfg(feature = "std")]
    pub mean_alloc_time: Duration,
    /// Mean [`EventRecord::execution`] over frees.
    #[cfg(feature = "std")]
    pub mean_free_time: Duration,
}

impl Summary {
    /// Summarize `events`. Means are `0.0` if there are none.
    pub fn from_events(heap_size: usize, events: &[EventRecord]) -> Self {
        let mut summary = Summary { heap_size, num_events: events.len(), ..Summary::default() };

        if events.is_empty() {
            return summary;
        }

        let mut fragmentation = 0.0;
        let mut metadata = 0.0;

        #[cfg(feature = "std")]
        let (mut alloc_time, mut allocs, mut free_time, mut frees) =
            (Duration::ZERO, 0usize, Duration::ZERO, 0usize);

        for event in events {
            let is_alloc = matches!(event.action, Action::Alloc { .. });

            if is_alloc && event.chunk.is_none() {
                summary.failed_allocations += 1;
            }

            fragmentation += event.fragmentation;
            metadata += event.metadata;
            summary.max_fragmentation = summary.max_fragmentation.max(event.fragmentation);

            #[cfg(feature = "std")]
            {
                if is_alloc {
                    alloc_time += event.execution;
                    allocs += 1;
                } else {
                    free_time += event.execution;
                    frees += 1;
                }
            }
        }

        summary.mean_fragmentation = fragmentation / events.len() as f64;
        summary.mean_metadata = metadata / events.len() as f64;

        #[cfg(feature = "std")]
        {
            if allocs != 0 {
                summary.mean_alloc_time = alloc_time.div_f64(allocs as f64);
            }
            if frees != 0 {
                summary.mean_free_time = free_time.div_f64(frees as f64);
            }
        }

        summary
    }
}

impl core::fmt::Display for Summary {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            r#"Heap Size            | {:>19}
Events               | {:>19}
Failed Allocations   | {:>19}
Mean Fragmentation   | {:>19.4}
Max Fragmentation    | {:>19.4}
Mean Metadata        | {:>19.4}"#,
            self.heap_size,
            self.num_events,
            self.failed_allocations,
            self.mean_fragmentation,
            self.max_fragmentation,
            self.mean_metadata,
        )?;

        #[cfg(feature = "std")]
        write!(
            f,
            r#"
Mean Alloc Time (ns) | {:>19}
Mean Free Time (ns)  | {:>19}"#,
            self.mean_alloc_time.as_nanos(),
            self.mean_free_time.as_nanos(),
        )?;

        Ok(())
    }
}

/// The outcome of [`Simulator::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub events: Vec<EventRecord>,
    pub summary: Summary,
}

/// Replays [`Action`]s against a heap using policy `P`.
///
/// # Example
/// ```
/// # use tagheap::{Heap, FirstFit, sim::{Simulator, parse_trace}};
/// let mut mem = [0u8; 4096];
/// let mut heap = Heap::<0, 0>::init(&mut mem);
///
/// let trace = parse_trace("alloc 0 100\nalloc 1 100\nfree 0\n").unwrap();
/// let report = Simulator::new(&mut heap, FirstFit).run(&trace).unwrap();
///
/// assert_eq!(report.summary.num_events, 3);
/// assert!(report.summary.max_fragmentation > 0.0);
/// ```
#[derive(Debug)]
pub struct Simulator<'h, 'a, P: Policy, const X: usize = 0, const M: usize = 0> {
    heap: &'h mut Heap<'a, X, M>,
    policy: P,
    /// Ids not yet freed, `None` for failed allocations.
    live: BTreeMap<usize, Option<Chunk>>,
    events: usize,
}

impl<'h, 'a, P: Policy, const X: usize, const M: usize> Simulator<'h, 'a, P, X, M> {
    pub fn new(heap: &'h mut Heap<'a, X, M>, policy: P) -> Self {
        Self { heap, policy, live: BTreeMap::new(), events: 0 }
    }

    /// The heap being driven.
    pub fn heap(&self) -> &Heap<'a, X, M> {
        &*self.heap
    }

    /// The chunk currently remembered as `id`, if any.
    pub fn live(&self, id: usize) -> Option<Chunk> {
        self.live.get(&id).copied().flatten()
    }

    /// Apply a single action.
    ///
    /// A failed allocation is recorded, not an error, and freeing its id later
    /// releases nothing. Reusing an id that hasn't been freed or freeing an id
    /// that was never allocated is an error and leaves the heap untouched.
    pub fn step(&mut self, action: Action) -> Result<EventRecord, TraceError> {
        let released = match action {
            Action::Alloc { id, .. } => {
                if self.live.contains_key(&id) {
                    return Err(TraceError::DuplicateId(id));
                }
                None
            }
            Action::Free { id } => self.live.remove(&id).ok_or(TraceError::UnknownId(id))?,
        };

        #[cfg(feature = "std")]
        let started = Instant::now();

        let chunk = match action {
            Action::Alloc { size, .. } => self.policy.allocate(self.heap, size),
            Action::Free { .. } => {
                if let Some(chunk) = released {
                    self.policy.release(self.heap, chunk);
                }
                released
            }
        };

        #[cfg(feature = "std")]
        let execution = started.elapsed();

        if let Action::Alloc { id, size } = action {
            if chunk.is_none() {
                debug!("event {}: allocation of {} bytes failed", self.events, size);
            }
            self.live.insert(id, chunk);
        }

        let stats = self.heap.stats();
        let record = EventRecord {
            number: self.events,
            action,
            chunk,
            fragmentation: stats.external_fragmentation(),
            metadata: stats.metadata_ratio(),
            #[cfg(feature = "std")]
            execution,
        };

        self.events += 1;

        Ok(record)
    }

    /// Apply every action in order, stopping at the first error.
    pub fn run(&mut self, actions: &[Action]) -> Result<Report, TraceError> {
        let events =
            actions.iter().map(|&action| self.step(action)).collect::<Result<Vec<_>, _>>()?;
        let summary = Summary::from_events(self.heap.heap_size(), &events);

        Ok(Report { events, summary })
    }

    /// Release every live chunk and forget all ids, returning how many chunks were released.
    pub fn release_all(&mut self) -> usize {
        let live = core::mem::take(&mut self.live);
        let mut count = 0;

        for chunk in live.into_values().flatten() {
            self.policy.release(self.heap, chunk);
            count += 1;
        }

        count
    }
}
