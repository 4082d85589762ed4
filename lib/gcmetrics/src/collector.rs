//! Collector classification.
//!
//! Each collector is sorted into a [`GcPhase`] from the kind tag the runtime
//! declares for it, falling back to its name. Nothing here looks past the
//! portable descriptor fields.

use crate::generation::{Generation, PoolNaming};
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;
use tracing::trace;

/// Cause reported by background phases that did not stop the application.
pub const CONCURRENT_CAUSE: &str = "No GC";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("Collector descriptor name must not be empty")]
    EmptyName,
}

/// Whether a collector phase halts the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GcPhase {
    /// Stop-the-world.
    Pause,
    /// Background cycle running alongside the application.
    Concurrent,
}

impl fmt::Display for GcPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcPhase::Pause => write!(f, "pause"),
            GcPhase::Concurrent => write!(f, "concurrent"),
        }
    }
}

/// Which generation a collector works on, judged by its well-known name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GenerationAge {
    Young,
    Old,
    Unknown,
}

impl GenerationAge {
    pub fn from_collector_name(name: &str) -> Self {
        match name {
            "Copy" | "PS Scavenge" | "ParNew" | "G1 Young Generation" | "scavenge"
            | "partial gc" => GenerationAge::Young,
            "MarkSweepCompact" | "PS MarkSweep" | "ConcurrentMarkSweep" | "G1 Old Generation"
            | "global" => GenerationAge::Old,
            _ => GenerationAge::Unknown,
        }
    }
}

/// Static description of one collector, captured once at bind time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct CollectorDescriptor {
    name: String,
    /// Kind tag declared by the runtime: `Some(true)` for a concurrent-cycle
    /// collector, `Some(false)` for a pause collector, `None` if undeclared.
    concurrent_phase: Option<bool>,
    /// Names of the pools this collector manages.
    memory_pool_names: Vec<String>,
}

impl CollectorDescriptor {
    pub fn new<I, S>(
        name: impl Into<String>,
        concurrent_phase: Option<bool>,
        memory_pool_names: I,
    ) -> Result<Self, DescriptorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DescriptorError::EmptyName);
        }

        Ok(Self {
            name,
            concurrent_phase,
            memory_pool_names: memory_pool_names.into_iter().map(Into::into).collect(),
        })
    }

    /// Distinct generations among the pools this collector manages.
    pub fn generations(&self, naming: &PoolNaming) -> BTreeSet<Generation> {
        self.memory_pool_names
            .iter()
            .map(|pool| naming.generation_of(pool))
            .collect()
    }
}

/// Maps collector names to phases. Built once per binding and never mutated.
#[derive(Debug, Clone, Default)]
pub struct CollectorClassifier {
    phases: HashMap<String, GcPhase>,
}

impl CollectorClassifier {
    pub fn new(descriptors: &[CollectorDescriptor]) -> Self {
        let phases = descriptors
            .iter()
            .map(|descriptor| (descriptor.name.clone(), Self::classify(descriptor)))
            .collect();

        Self { phases }
    }

    /// Phase of a collector from its declared kind tag, then its name.
    pub fn classify(descriptor: &CollectorDescriptor) -> GcPhase {
        match descriptor.concurrent_phase {
            Some(true) => GcPhase::Concurrent,
            Some(false) => GcPhase::Pause,
            None => Self::phase_from_name(&descriptor.name),
        }
    }

    /// Concurrent-cycle collectors name themselves `... Cycles` (Shenandoah,
    /// ZGC and generational ZGC); everything else is treated as a pause.
    pub fn phase_from_name(name: &str) -> GcPhase {
        if name.trim_end().ends_with("Cycles") {
            GcPhase::Concurrent
        } else {
            GcPhase::Pause
        }
    }

    /// Phase of a single notification. A `No GC` cause always marks a
    /// concurrent phase; collectors missing from the bind-time snapshot are
    /// classified by name.
    pub fn phase_of(&self, collector_name: &str, cause: &str) -> GcPhase {
        if cause == CONCURRENT_CAUSE {
            return GcPhase::Concurrent;
        }

        match self.phases.get(collector_name) {
            Some(phase) => *phase,
            None => {
                trace!(collector = collector_name, "Collector not seen at bind time");
                Self::phase_from_name(collector_name)
            }
        }
    }

    /// Whether the heap is generational. An explicit runtime flag wins;
    /// otherwise any collector spanning both young and old pools proves it.
    /// Returns `None` when no collector declares its pools.
    pub fn is_generational(
        descriptors: &[CollectorDescriptor],
        runtime_flag: Option<bool>,
        naming: &PoolNaming,
    ) -> Option<bool> {
        if runtime_flag.is_some() {
            return runtime_flag;
        }

        let declared: Vec<_> = descriptors
            .iter()
            .filter(|descriptor| !descriptor.memory_pool_names.is_empty())
            .collect();

        if declared.is_empty() {
            return None;
        }

        Some(declared.iter().any(|descriptor| {
            let generations = descriptor.generations(naming);
            generations.contains(&Generation::Young) && generations.contains(&Generation::Old)
        }))
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, concurrent: Option<bool>, pools: &[&str]) -> CollectorDescriptor {
        CollectorDescriptor::new(name, concurrent, pools.iter().copied()).unwrap()
    }

    #[test]
    fn empty_name_is_rejected() {
        let result = CollectorDescriptor::new("  ", None, Vec::<String>::new());

        assert_eq!(result, Err(DescriptorError::EmptyName));
    }

    #[test]
    fn declared_kind_tag_wins_over_name() {
        let classifier = CollectorClassifier::new(&[
            descriptor("Shenandoah Pauses", Some(false), &[]),
            descriptor("Background Marker", Some(true), &[]),
            descriptor("ZGC Cycles", Some(false), &[]),
        ]);

        assert_eq!(classifier.phase_of("Shenandoah Pauses", ""), GcPhase::Pause);
        assert_eq!(classifier.phase_of("Background Marker", ""), GcPhase::Concurrent);
        assert_eq!(classifier.phase_of("ZGC Cycles", ""), GcPhase::Pause);
    }

    #[test]
    fn undeclared_kind_falls_back_to_name() {
        let classifier = CollectorClassifier::new(&[
            descriptor("ZGC Cycles", None, &["ZHeap"]),
            descriptor("ZGC Pauses", None, &["ZHeap"]),
            descriptor("G1 Young Generation", None, &[]),
        ]);

        assert_eq!(classifier.len(), 3);
        assert_eq!(classifier.phase_of("ZGC Cycles", "Timer"), GcPhase::Concurrent);
        assert_eq!(classifier.phase_of("ZGC Pauses", "Timer"), GcPhase::Pause);
        assert_eq!(
            classifier.phase_of("G1 Young Generation", "G1 Evacuation Pause"),
            GcPhase::Pause
        );
    }

    #[test]
    fn unknown_collectors_fail_closed_to_pause() {
        let classifier = CollectorClassifier::default();

        assert!(classifier.is_empty());
        assert_eq!(classifier.phase_of("Mystery Collector", "whatever"), GcPhase::Pause);
        assert_eq!(classifier.phase_of("", ""), GcPhase::Pause);
        assert_eq!(classifier.phase_of("GenZGC Major Cycles", ""), GcPhase::Concurrent);
    }

    #[test]
    fn no_gc_cause_is_concurrent() {
        let classifier =
            CollectorClassifier::new(&[descriptor("ConcurrentMarkSweep", Some(false), &[])]);

        assert_eq!(
            classifier.phase_of("ConcurrentMarkSweep", CONCURRENT_CAUSE),
            GcPhase::Concurrent
        );
        assert_eq!(
            classifier.phase_of("ConcurrentMarkSweep", "CMS Final Remark"),
            GcPhase::Pause
        );
    }

    #[test]
    fn generational_from_pool_associations() {
        let naming = PoolNaming::default();
        let g1 = [
            descriptor(
                "G1 Young Generation",
                None,
                &["G1 Eden Space", "G1 Survivor Space", "G1 Old Gen"],
            ),
            descriptor("G1 Old Generation", None, &["G1 Old Gen"]),
        ];
        let zgc = [
            descriptor("ZGC Cycles", None, &["ZHeap"]),
            descriptor("ZGC Pauses", None, &["ZHeap"]),
        ];
        let undeclared = [descriptor("Copy", None, &[])];

        assert_eq!(CollectorClassifier::is_generational(&g1, None, &naming), Some(true));
        assert_eq!(CollectorClassifier::is_generational(&zgc, None, &naming), Some(false));
        assert_eq!(CollectorClassifier::is_generational(&undeclared, None, &naming), None);
        assert_eq!(
            CollectorClassifier::is_generational(&zgc, Some(true), &naming),
            Some(true)
        );
    }

    #[test]
    fn generation_age_by_name() {
        assert_eq!(GenerationAge::from_collector_name("PS Scavenge"), GenerationAge::Young);
        assert_eq!(GenerationAge::from_collector_name("G1 Old Generation"), GenerationAge::Old);
        assert_eq!(GenerationAge::from_collector_name("ZGC Pauses"), GenerationAge::Unknown);
        assert_eq!(GenerationAge::from_collector_name("partial gc"), GenerationAge::Young);
        assert_eq!(GenerationAge::from_collector_name("scavenge"), GenerationAge::Young);
    }
}
