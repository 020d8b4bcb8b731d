//! Marker Ledger: append-only, time-ordered BUY/SELL overlay.

use crate::types::{Marker, MarkerKind, UnixTime};

#[derive(Debug, Clone, Default)]
pub struct MarkerLedger {
    markers: Vec<Marker>,
}

impl MarkerLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `marker` at its sorted position.
    ///
    /// Returns `false` (and leaves the ledger unchanged) when a marker with the
    /// same time and kind already exists.
    pub fn append(&mut self, marker: Marker) -> bool {
        if self.contains(marker.time, marker.kind) {
            return false;
        }
        // Insert after any existing entries at the same time to keep arrival order
        let index = self.markers.partition_point(|m| m.time <= marker.time);
        self.markers.insert(index, marker);
        true
    }

    /// Append every marker, returning how many were retained.
    pub fn extend<I>(&mut self, markers: I) -> usize
    where
        I: IntoIterator<Item = Marker>,
    {
        markers.into_iter().filter(|m| self.append(*m)).count()
    }

    pub fn contains(&self, time: UnixTime, kind: MarkerKind) -> bool {
        let start = self.markers.partition_point(|m| m.time < time);
        self.markers[start..]
            .iter()
            .take_while(|m| m.time == time)
            .any(|m| m.kind == kind)
    }

    /// Full ordered sequence for redraw
    pub fn snapshot(&self) -> &[Marker] {
        &self.markers
    }

    pub fn last(&self) -> Option<&Marker> {
        self.markers.last()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}
