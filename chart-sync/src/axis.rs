//! Time-Axis Coordinator: keeps N view surfaces on one visible logical range.
//!
//! A surface reports a user-driven range change through the [`RangeNotifier`]
//! it was handed at registration (or the owner calls
//! [`TimeAxisCoordinator::on_range_changed`] directly). The coordinator then
//! sets that range on every peer whose last known range differs.
//!
//! Notifications raised while propagating (a surface echoing a programmatic
//! set back through its notifier) land on a queue that is drained
//! iteratively inside the same call, so propagation never recurses. Within a
//! drain, a surface that was set programmatically only has what it reports
//! recorded; its echo is never fanned out, even when it clamped the range.

use crate::types::UnixTime;
use derive_more::{Constructor, Display};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};
use tracing::debug;

/// Inclusive visible window on the shared time axis
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Constructor, Deserialize, Serialize,
)]
#[display("[{from}, {to}]")]
pub struct LogicalRange {
    pub from: UnixTime,
    pub to: UnixTime,
}

impl LogicalRange {
    /// Range covering `span` seconds that ends at `to`.
    pub fn ending_at(to: UnixTime, span: UnixTime) -> Self {
        Self {
            from: to - span.max(0),
            to,
        }
    }

    pub fn span(&self) -> UnixTime {
        self.to - self.from
    }

    pub fn contains(&self, time: UnixTime) -> bool {
        self.from <= time && time <= self.to
    }

    pub fn shift(&self, delta: UnixTime) -> Self {
        Self {
            from: self.from + delta,
            to: self.to + delta,
        }
    }

    /// Scale the span around the right edge, keeping at least `min_span`.
    pub fn zoom(&self, factor: f64, min_span: UnixTime) -> Self {
        let span = ((self.span() as f64) * factor).round() as UnixTime;
        Self::ending_at(self.to, span.max(min_span))
    }
}

/// Handle assigned to a registered surface
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Deserialize, Serialize,
)]
#[display("surface-{_0}")]
pub struct SurfaceId(pub usize);

type RangeQueue = Arc<Mutex<VecDeque<(SurfaceId, LogicalRange)>>>;

/// Subscription handed to a surface: its `onVisibleRangeChanged` channel.
#[derive(Debug, Clone)]
pub struct RangeNotifier {
    id: SurfaceId,
    queue: RangeQueue,
}

impl RangeNotifier {
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    /// Report that this surface's visible range changed.
    pub fn notify(&self, range: LogicalRange) {
        self.queue.lock().push_back((self.id, range));
    }
}

/// A surface that shows a window of the shared time axis.
pub trait ViewSurface {
    fn visible_range(&self) -> Option<LogicalRange>;

    fn set_visible_range(&mut self, range: LogicalRange);

    /// Called once on registration with the surface's change notifier.
    fn on_visible_range_changed(&mut self, notifier: RangeNotifier) {
        let _ = notifier;
    }
}

#[derive(Debug)]
struct Registered<S> {
    surface: S,
    range: Option<LogicalRange>,
}

#[derive(Debug)]
pub struct TimeAxisCoordinator<S> {
    surfaces: Vec<Registered<S>>,
    queue: RangeQueue,
}

impl<S> Default for TimeAxisCoordinator<S> {
    fn default() -> Self {
        Self {
            surfaces: Vec::new(),
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }
}

impl<S: ViewSurface> TimeAxisCoordinator<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, mut surface: S) -> SurfaceId {
        let id = SurfaceId(self.surfaces.len());
        surface.on_visible_range_changed(RangeNotifier {
            id,
            queue: Arc::clone(&self.queue),
        });
        let range = surface.visible_range();
        self.surfaces.push(Registered { surface, range });
        id
    }

    /// Propagate `range` from `source` to every peer. Returns the number of
    /// `set_visible_range` calls made, including those caused by echoes.
    pub fn on_range_changed(&mut self, source: SurfaceId, range: LogicalRange) -> usize {
        self.queue.lock().push_back((source, range));
        self.pump()
    }

    /// Drain pending notifications. Returns the number of peers updated.
    ///
    /// A notification is skipped when the same surface has a later one queued
    /// (it is stale), or when it equals the range recorded for that surface.
    pub fn pump(&mut self) -> usize {
        self.drain(HashSet::new())
    }

    /// Apply a programmatic range to every surface (initial seed, follow mode).
    pub fn set_all(&mut self, range: LogicalRange) -> usize {
        let mut programmatic = HashSet::new();
        for (index, entry) in self.surfaces.iter_mut().enumerate() {
            if entry.range == Some(range) {
                continue;
            }
            entry.range = Some(range);
            entry.surface.set_visible_range(range);
            programmatic.insert(SurfaceId(index));
        }
        programmatic.len() + self.drain(programmatic)
    }

    /// `programmatic` holds the surfaces already set during this drain.
    fn drain(&mut self, mut programmatic: HashSet<SurfaceId>) -> usize {
        let mut applied = 0;

        loop {
            let Some((source, range)) = self.queue.lock().pop_front() else {
                break;
            };
            if self.queue.lock().iter().any(|(id, _)| *id == source) {
                continue;
            }
            let Some(entry) = self.surfaces.get_mut(source.0) else {
                continue;
            };

            if programmatic.contains(&source) {
                if entry.range != Some(range) {
                    debug!(%source, %range, "Surface adjusted a propagated range");
                }
                entry.range = Some(range);
                continue;
            }
            if entry.range == Some(range) {
                continue;
            }
            entry.range = Some(range);

            for (index, peer) in self.surfaces.iter_mut().enumerate() {
                if index == source.0 || peer.range == Some(range) {
                    continue;
                }
                peer.range = Some(range);
                peer.surface.set_visible_range(range);
                programmatic.insert(SurfaceId(index));
                applied += 1;
            }
        }

        applied
    }

    /// Last range known for the surface
    pub fn range_of(&self, id: SurfaceId) -> Option<LogicalRange> {
        self.surfaces.get(id.0).and_then(|entry| entry.range)
    }

    /// The range shared by all surfaces, if they agree.
    pub fn shared_range(&self) -> Option<LogicalRange> {
        let first = self.surfaces.first()?.range?;
        self.surfaces
            .iter()
            .all(|entry| entry.range == Some(first))
            .then_some(first)
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&S> {
        self.surfaces.get(id.0).map(|entry| &entry.surface)
    }

    /// Mutable access for content updates. Range changes made through this
    /// reference must be reported through the surface's notifier.
    pub fn surface_mut(&mut self, id: SurfaceId) -> Option<&mut S> {
        self.surfaces.get_mut(id.0).map(|entry| &mut entry.surface)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SurfaceId, &S)> {
        self.surfaces
            .iter()
            .enumerate()
            .map(|(index, entry)| (SurfaceId(index), &entry.surface))
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Surface that echoes every programmatic set back through its notifier,
    /// the way charting widgets fire range-change callbacks on any change.
    #[derive(Debug, Default)]
    struct EchoSurface {
        range: Option<LogicalRange>,
        sets: usize,
        notifier: Option<RangeNotifier>,
        /// Minimum `from` this surface can display
        floor: Option<UnixTime>,
    }

    impl ViewSurface for EchoSurface {
        fn visible_range(&self) -> Option<LogicalRange> {
            self.range
        }

        fn set_visible_range(&mut self, range: LogicalRange) {
            self.sets += 1;
            let shown = match self.floor {
                Some(floor) if range.from < floor => LogicalRange::new(floor, range.to),
                _ => range,
            };
            self.range = Some(shown);
            if let Some(notifier) = &self.notifier {
                notifier.notify(shown);
            }
        }

        fn on_visible_range_changed(&mut self, notifier: RangeNotifier) {
            self.notifier = Some(notifier);
        }
    }

    fn coordinator(n: usize) -> (TimeAxisCoordinator<EchoSurface>, Vec<SurfaceId>) {
        let mut coordinator = TimeAxisCoordinator::new();
        let ids = (0..n)
            .map(|_| coordinator.register(EchoSurface::default()))
            .collect();
        (coordinator, ids)
    }

    #[test]
    fn test_three_surface_echo_cycle_notifies_each_peer_once() {
        let (mut coordinator, ids) = coordinator(3);
        let range = LogicalRange::new(100, 200);

        // User scrolls surface 0
        let applied = coordinator.on_range_changed(ids[0], range);

        assert_eq!(applied, 2);
        assert_eq!(coordinator.surface(ids[0]).unwrap().sets, 0);
        assert_eq!(coordinator.surface(ids[1]).unwrap().sets, 1);
        assert_eq!(coordinator.surface(ids[2]).unwrap().sets, 1);
        assert_eq!(coordinator.shared_range(), Some(range));
    }

    #[test]
    fn test_gesture_through_notifier_is_pumped() {
        let (mut coordinator, ids) = coordinator(3);
        coordinator.set_all(LogicalRange::new(0, 100));

        // Surface 2 scrolls itself and reports through its own notifier
        let notifier = coordinator
            .surface(ids[2])
            .and_then(|s| s.notifier.clone())
            .unwrap();
        notifier.notify(LogicalRange::new(50, 150));

        assert_eq!(coordinator.pump(), 2);
        assert_eq!(coordinator.shared_range(), Some(LogicalRange::new(50, 150)));
        assert_eq!(coordinator.surface(ids[0]).unwrap().sets, 2);
    }

    #[test]
    fn test_unchanged_range_is_inert() {
        let (mut coordinator, ids) = coordinator(3);
        let range = LogicalRange::new(10, 20);
        coordinator.on_range_changed(ids[1], range);

        assert_eq!(coordinator.on_range_changed(ids[1], range), 0);
        assert_eq!(coordinator.set_all(range), 0);
        assert_eq!(coordinator.surface(ids[0]).unwrap().sets, 1);
    }

    #[test]
    fn test_adjusted_echo_is_not_propagated() {
        struct TestCase {
            floors: [Option<UnixTime>; 3],
            expected: [Option<LogicalRange>; 3],
        }

        let gesture = LogicalRange::new(-50, 50);
        let clamped = LogicalRange::new(0, 50);
        let tests = vec![
            TestCase {
                // TC0: middle surface clamps, its echo stays local
                floors: [None, Some(0), None],
                expected: [Some(gesture), Some(clamped), Some(gesture)],
            },
            TestCase {
                // TC1: every peer clamps, the gesture source keeps its range
                floors: [None, Some(0), Some(0)],
                expected: [Some(gesture), Some(clamped), Some(clamped)],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut coordinator = TimeAxisCoordinator::new();
            let ids: Vec<_> = test
                .floors
                .iter()
                .map(|floor| {
                    coordinator.register(EchoSurface {
                        floor: *floor,
                        ..Default::default()
                    })
                })
                .collect();

            let applied = coordinator.on_range_changed(ids[0], gesture);

            assert_eq!(applied, 2, "TC{} failed", index);
            let sets: Vec<_> = ids
                .iter()
                .map(|id| coordinator.surface(*id).unwrap().sets)
                .collect();
            assert_eq!(sets, vec![0, 1, 1], "TC{} failed", index);
            let ranges: Vec<_> = ids.iter().map(|id| coordinator.range_of(*id)).collect();
            assert_eq!(ranges, test.expected.to_vec(), "TC{} failed", index);
            assert_eq!(coordinator.pump(), 0, "TC{} failed", index);
        }
    }

    #[test]
    fn test_seed_echoes_are_recorded_only() {
        let mut coordinator = TimeAxisCoordinator::new();
        let a = coordinator.register(EchoSurface::default());
        let b = coordinator.register(EchoSurface {
            floor: Some(0),
            ..Default::default()
        });

        assert_eq!(coordinator.set_all(LogicalRange::new(-10, 90)), 2);
        assert_eq!(coordinator.surface(a).unwrap().sets, 1);
        assert_eq!(coordinator.surface(b).unwrap().sets, 1);
        assert_eq!(coordinator.range_of(a), Some(LogicalRange::new(-10, 90)));
        assert_eq!(coordinator.range_of(b), Some(LogicalRange::new(0, 90)));
    }

    #[test]
    fn test_drifting_surfaces_are_set_once() {
        // Surfaces that always shift what they are given never agree
        #[derive(Debug, Default)]
        struct Drifting {
            range: Option<LogicalRange>,
            sets: usize,
            notifier: Option<RangeNotifier>,
        }

        impl ViewSurface for Drifting {
            fn visible_range(&self) -> Option<LogicalRange> {
                self.range
            }

            fn set_visible_range(&mut self, range: LogicalRange) {
                self.sets += 1;
                let shown = range.shift(1);
                self.range = Some(shown);
                if let Some(notifier) = &self.notifier {
                    notifier.notify(shown);
                }
            }

            fn on_visible_range_changed(&mut self, notifier: RangeNotifier) {
                self.notifier = Some(notifier);
            }
        }

        let mut coordinator = TimeAxisCoordinator::new();
        let a = coordinator.register(Drifting::default());
        let b = coordinator.register(Drifting::default());

        assert_eq!(coordinator.on_range_changed(a, LogicalRange::new(0, 10)), 1);
        assert_eq!(coordinator.surface(a).unwrap().sets, 0);
        assert_eq!(coordinator.surface(b).unwrap().sets, 1);
        assert_eq!(coordinator.range_of(b), Some(LogicalRange::new(1, 11)));
        assert_eq!(coordinator.pump(), 0);
    }

    #[test]
    fn test_logical_range_helpers() {
        let range = LogicalRange::ending_at(1_000, 300);
        assert_eq!(range, LogicalRange::new(700, 1_000));
        assert_eq!(range.span(), 300);
        assert!(range.contains(700) && range.contains(1_000));
        assert!(!range.contains(1_001));
        assert_eq!(range.shift(-100), LogicalRange::new(600, 900));
        assert_eq!(range.zoom(0.5, 60), LogicalRange::new(850, 1_000));
        assert_eq!(range.zoom(0.01, 60), LogicalRange::new(940, 1_000));
        assert_eq!(range.to_string(), "[700, 1000]");
    }
}
