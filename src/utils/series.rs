//! series.rs
//! Time-ordered sample series produced by a measurement run.
//!
//! Keyed by the logical timestamp of the pairing (remote stream time, or probe time in
//! local mode). Inserting an existing key overwrites the previous record.

use std::{collections::BTreeMap, time::Duration};

use crate::error::LatencyError;
use crate::signal::color::Color;

/// One measured pairing (or one failure) of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    pub timestamp: Duration,
    pub latency: Option<Duration>,
    /// Color of the pairing, when the record comes from color events.
    pub color: Option<Color>,
    pub error: Option<LatencyError>,
}

impl MeasurementRecord {
    pub fn measured(
        timestamp: Duration,
        latency: Duration,
        color: Option<Color>,
        error: Option<LatencyError>,
    ) -> Self {
        Self {
            timestamp,
            latency: Some(latency),
            color,
            error,
        }
    }

    pub fn failed(timestamp: Duration, error: LatencyError) -> Self {
        Self {
            timestamp,
            latency: None,
            color: None,
            error: Some(error),
        }
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SampleSeries {
    records: BTreeMap<Duration, MeasurementRecord>,
    threshold: Duration,
}

impl SampleSeries {
    pub fn new(threshold: Duration) -> Self {
        Self {
            records: BTreeMap::new(),
            threshold,
        }
    }

    /// Appends or overwrites; returns the replaced record if the key existed.
    pub fn insert(&mut self, record: MeasurementRecord) -> Option<MeasurementRecord> {
        self.records.insert(record.timestamp, record)
    }

    /// Records in timestamp order.
    pub fn iter(&self) -> impl Iterator<Item = &MeasurementRecord> {
        self.records.values()
    }

    pub fn failures(&self) -> impl Iterator<Item = &MeasurementRecord> {
        self.records.values().filter(|r| r.is_failure())
    }

    /// Latencies of every record that carries one, in timestamp order.
    pub fn latencies(&self) -> impl Iterator<Item = (Duration, Duration)> + '_ {
        self.records
            .values()
            .filter_map(|r| r.latency.map(|l| (r.timestamp, l)))
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Record with the greatest timestamp.
    pub fn latest(&self) -> Option<&MeasurementRecord> {
        self.records.values().next_back()
    }

    pub fn get(&self, timestamp: Duration) -> Option<&MeasurementRecord> {
        self.records.get(&timestamp)
    }

    pub fn configured_threshold(&self) -> Duration {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<'a> IntoIterator for &'a SampleSeries {
    type Item = &'a MeasurementRecord;
    type IntoIter = std::collections::btree_map::Values<'a, Duration, MeasurementRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.values()
    }
}
