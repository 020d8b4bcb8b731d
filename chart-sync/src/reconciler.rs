//! Stream Reconciler: folds the one-time snapshot and the live update stream
//! into the Bar Store, Indicator Pipeline and Marker Ledger.
//!
//! ```text
//! Uninitialized --apply_snapshot--> Streaming --teardown--> Closed
//!       \______________________teardown_____________________/
//! ```
//!
//! Updates received while Uninitialized are buffered in a bounded FIFO and
//! replayed in receipt order right after the snapshot is applied.

use crate::{
    bar::{BarStore, UpsertOutcome},
    error::ChartError,
    indicator::{IndicatorConfig, IndicatorKind, IndicatorPipeline, IndicatorUpdate},
    marker::MarkerLedger,
    signal::SmaBandDetector,
    snapshot::Snapshot,
    surface::{BarPhase, RenderDelta, RenderSink, SnapshotFrame},
    types::{Bar, LiveUpdate, Marker},
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};

/// Relative tolerance when comparing backend indicator values to local ones
const CROSS_CHECK_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReconcilerConfig {
    /// Updates buffered before the snapshot arrives
    pub pending_capacity: usize,
    /// Run the SMA band detector on committed bars
    pub derive_signals: bool,
    /// Only accept feed signals carried by final updates
    pub markers_on_final_only: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            pending_capacity: 1024,
            derive_signals: false,
            markers_on_final_only: false,
        }
    }
}

impl ReconcilerConfig {
    pub fn with_pending_capacity(mut self, capacity: usize) -> Self {
        self.pending_capacity = capacity;
        self
    }

    pub fn with_derive_signals(mut self, derive: bool) -> Self {
        self.derive_signals = derive;
        self
    }

    pub fn with_markers_on_final_only(mut self, final_only: bool) -> Self {
        self.markers_on_final_only = final_only;
        self
    }
}

/// Counters describing what the reconciler did with its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct ReconcilerStats {
    /// Updates folded into the store
    pub applied: u64,
    pub provisional: u64,
    pub committed: u64,
    /// Provisional bars committed because a later bar started
    pub implicit_commits: u64,
    pub rejected: u64,
    /// Updates queued before the snapshot
    pub buffered: u64,
    /// Pending updates dropped on overflow
    pub dropped: u64,
    pub markers_added: u64,
    pub gaps: u64,
}

/// What happened to one live update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Queued until the snapshot is applied
    Buffered,
    /// Forming bar shown without committing
    Provisional(UpsertOutcome),
    /// Bar committed to the indicator pipeline
    Committed(UpsertOutcome),
}

#[derive(Debug)]
enum State {
    Uninitialized { pending: VecDeque<LiveUpdate> },
    Streaming,
    Closed,
}

#[derive(Debug)]
pub struct StreamReconciler {
    config: ReconcilerConfig,
    indicator_config: IndicatorConfig,
    state: State,
    bars: BarStore,
    pipeline: IndicatorPipeline,
    markers: MarkerLedger,
    detector: Option<SmaBandDetector>,
    stats: ReconcilerStats,
}

impl StreamReconciler {
    pub fn new(config: ReconcilerConfig, indicator_config: IndicatorConfig) -> Self {
        Self {
            config,
            indicator_config,
            state: State::Uninitialized {
                pending: VecDeque::new(),
            },
            bars: BarStore::new(),
            pipeline: IndicatorPipeline::new(indicator_config.sma_fallback, &indicator_config),
            markers: MarkerLedger::new(),
            detector: config.derive_signals.then(SmaBandDetector::new),
            stats: ReconcilerStats::default(),
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.state, State::Streaming)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    pub fn pending_len(&self) -> usize {
        match &self.state {
            State::Uninitialized { pending } => pending.len(),
            _ => 0,
        }
    }

    pub fn bars(&self) -> &BarStore {
        &self.bars
    }

    pub fn pipeline(&self) -> &IndicatorPipeline {
        &self.pipeline
    }

    pub fn markers(&self) -> &MarkerLedger {
        &self.markers
    }

    pub fn stats(&self) -> ReconcilerStats {
        self.stats
    }

    /// Load the snapshot, rebuild every accumulator from it, render the
    /// initial frame and replay buffered updates.
    ///
    /// On error the reconciler stays Uninitialized with its buffer intact,
    /// so the caller may retry with a fresh snapshot.
    pub fn apply_snapshot<K>(&mut self, snapshot: Snapshot, sink: &mut K) -> Result<(), ChartError>
    where
        K: RenderSink + ?Sized,
    {
        match self.state {
            State::Uninitialized { .. } => {}
            State::Streaming => return Err(ChartError::AlreadyStreaming),
            State::Closed => return Err(ChartError::Closed),
        }

        let Snapshot {
            bars,
            columns,
            signals,
            sma_param,
        } = snapshot;
        let sma_period = sma_param.unwrap_or(self.indicator_config.sma_fallback);

        let mut store = BarStore::new();
        store.load(bars)?;

        let mut pipeline = IndicatorPipeline::new(sma_period, &self.indicator_config);
        let replayed = pipeline.replay(store.as_slice())?;

        if let Some(detector) = self.detector.as_mut() {
            detector.reset();
            let sma = replayed.iter().find(|(kind, _)| *kind == IndicatorKind::Sma);
            for (index, bar) in store.iter().enumerate() {
                let value = sma.and_then(|(_, series)| series.points.get(index)).and_then(|p| p.value);
                // History signals come from the backend; this only warms the lookback
                detector.observe(bar, value);
            }
        }

        let mut markers = MarkerLedger::new();
        markers.extend(signals);

        // Materialized columns pre-seed the display; accumulators stay local
        let indicators = replayed
            .into_iter()
            .map(|(kind, series)| match columns.get(&kind) {
                Some(column) => {
                    if !approx_eq(column.last_value(), series.last_value()) {
                        warn!(
                            %kind,
                            backend = ?column.last_value(),
                            local = ?series.last_value(),
                            "Snapshot indicator column disagrees with replayed value"
                        );
                    }
                    (kind, column.clone())
                }
                None => (kind, series),
            })
            .collect();

        let pending = match std::mem::replace(&mut self.state, State::Streaming) {
            State::Uninitialized { pending } => pending,
            _ => VecDeque::new(),
        };

        self.bars = store;
        self.pipeline = pipeline;
        self.markers = markers;

        info!(
            bars = self.bars.len(),
            sma_period,
            markers = self.markers.len(),
            pending = pending.len(),
            "StreamReconciler applied snapshot"
        );

        sink.render(RenderDelta::Reset(Box::new(SnapshotFrame {
            bars: self.bars.as_slice().to_vec(),
            indicators,
            markers: self.markers.snapshot().to_vec(),
            sma_period,
        })));

        for update in pending {
            // Rejections were already reported to the sink
            let _ = self.on_live_update(update, sink);
        }
        Ok(())
    }

    /// Fold one live update. Rejected updates are reported to the sink as a
    /// [`RenderDelta::Diagnostic`] and returned as the error; the store keeps
    /// its previous state.
    pub fn on_live_update<K>(&mut self, update: LiveUpdate, sink: &mut K) -> Result<UpdateOutcome, ChartError>
    where
        K: RenderSink + ?Sized,
    {
        if let State::Uninitialized { pending } = &mut self.state {
            pending.push_back(update);
            self.stats.buffered += 1;
            if pending.len() > self.config.pending_capacity.max(1) {
                if let Some(dropped) = pending.pop_front() {
                    self.stats.dropped += 1;
                    let error = ChartError::BufferOverflow { dropped: dropped.time };
                    warn!(%error, "StreamReconciler pending buffer overflow");
                    sink.render(RenderDelta::Diagnostic(error));
                }
            }
            return Ok(UpdateOutcome::Buffered);
        }
        if self.is_closed() {
            return Err(ChartError::Closed);
        }

        match self.reconcile(update, sink) {
            Ok(outcome) => {
                self.stats.applied += 1;
                Ok(outcome)
            }
            Err(error) => {
                self.stats.rejected += 1;
                match &error {
                    ChartError::DuplicateCommit { .. } => {
                        error!(%error, "StreamReconciler received a second final for a committed bar")
                    }
                    _ => warn!(%error, "StreamReconciler dropped live update"),
                }
                sink.render(RenderDelta::Diagnostic(error.clone()));
                Err(error)
            }
        }
    }

    fn reconcile<K>(&mut self, update: LiveUpdate, sink: &mut K) -> Result<UpdateOutcome, ChartError>
    where
        K: RenderSink + ?Sized,
    {
        let bar = update.bar();
        bar.check()?;

        if let Some(last) = self.bars.last().copied() {
            if bar.time < last.time {
                return Err(ChartError::OutOfOrderUpdate {
                    last: last.time,
                    received: bar.time,
                });
            }
            if bar.time == last.time && self.pipeline.is_committed(bar.time) {
                if update.is_final {
                    return Err(ChartError::DuplicateCommit { time: bar.time });
                }
                return self.revise_committed(update, sink);
            }
            if bar.time > last.time {
                if let Some(interval) = self.bars.interval().filter(|i| *i > 0) {
                    if bar.time - last.time > interval {
                        self.stats.gaps += 1;
                        warn!(
                            last = last.time,
                            next = bar.time,
                            missing = (bar.time - last.time) / interval - 1,
                            "Gap in live bars"
                        );
                    }
                }
                if !self.pipeline.is_committed(last.time) {
                    // Feed moved on without finalizing the previous bar
                    self.commit(&last, sink)?;
                    self.stats.implicit_commits += 1;
                    debug!(time = last.time, "Implicitly committed previous bar");
                }
            }
        }

        let outcome = self.bars.upsert(bar)?;
        let phase = if update.is_final {
            BarPhase::Final
        } else {
            BarPhase::Provisional
        };
        sink.render(RenderDelta::Bar { bar, outcome, phase });

        if update.is_final {
            let updates = self.commit(&bar, sink)?;
            cross_check(&update, &updates);
            self.stats.committed += 1;
        } else {
            for IndicatorUpdate { kind, point } in self.pipeline.peek_provisional(&bar) {
                sink.render(RenderDelta::Indicator {
                    kind,
                    point,
                    phase: BarPhase::Provisional,
                });
            }
            self.stats.provisional += 1;
        }

        if let Some(kind) = update.signal {
            if update.is_final || !self.config.markers_on_final_only {
                self.add_marker(Marker::new(bar.time, kind, bar.close), sink);
            }
        }

        Ok(match phase {
            BarPhase::Final => UpdateOutcome::Committed(outcome),
            BarPhase::Provisional => UpdateOutcome::Provisional(outcome),
        })
    }

    /// Provisional revision of a bar the pipeline already consumed, such as the
    /// forming bar at the end of the snapshot. The store and display follow the
    /// revision; accumulators keep the committed values.
    fn revise_committed<K>(
        &mut self,
        update: LiveUpdate,
        sink: &mut K,
    ) -> Result<UpdateOutcome, ChartError>
    where
        K: RenderSink + ?Sized,
    {
        let bar = update.bar();
        let outcome = self.bars.upsert(bar)?;
        sink.render(RenderDelta::Bar {
            bar,
            outcome,
            phase: BarPhase::Provisional,
        });
        self.stats.provisional += 1;

        if let Some(kind) = update.signal.filter(|_| !self.config.markers_on_final_only) {
            self.add_marker(Marker::new(bar.time, kind, bar.close), sink);
        }
        Ok(UpdateOutcome::Provisional(outcome))
    }

    /// Commit `bar` to the pipeline and render its final indicator points.
    fn commit<K>(&mut self, bar: &Bar, sink: &mut K) -> Result<Vec<IndicatorUpdate>, ChartError>
    where
        K: RenderSink + ?Sized,
    {
        let updates = self.pipeline.consume_final(bar)?;
        for update in &updates {
            sink.render(RenderDelta::Indicator {
                kind: update.kind,
                point: update.point,
                phase: BarPhase::Final,
            });
        }

        let sma = updates
            .iter()
            .find(|u| u.kind == IndicatorKind::Sma)
            .and_then(|u| u.point.value);
        if let Some(kind) = self.detector.as_mut().and_then(|d| d.observe(bar, sma)) {
            debug!(time = bar.time, %kind, "SMA band detector fired");
            self.add_marker(Marker::new(bar.time, kind, bar.close), sink);
        }
        Ok(updates)
    }

    fn add_marker<K>(&mut self, marker: Marker, sink: &mut K)
    where
        K: RenderSink + ?Sized,
    {
        if self.markers.append(marker) {
            self.stats.markers_added += 1;
            sink.render(RenderDelta::Markers(self.markers.snapshot().to_vec()));
        }
    }

    /// Stop accepting input and discard the pending queue. Later calls are
    /// no-ops that render nothing.
    pub fn teardown(&mut self) -> ReconcilerStats {
        if let State::Uninitialized { pending } = &self.state {
            if !pending.is_empty() {
                debug!(discarded = pending.len(), "Discarding pending updates");
            }
        }
        self.state = State::Closed;
        self.stats
    }
}

fn approx_eq(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => (a - b).abs() <= CROSS_CHECK_TOLERANCE * a.abs().max(b.abs()).max(1.0),
        (None, None) => true,
        _ => false,
    }
}

/// Compare backend-provided indicator values with the committed local ones.
fn cross_check(update: &LiveUpdate, local: &[IndicatorUpdate]) {
    for IndicatorUpdate { kind, point } in local {
        let remote = match kind {
            IndicatorKind::Sma => update.indicators.sma,
            IndicatorKind::MacdHistogram => update.indicators.macd_hist,
            IndicatorKind::Rsi => update.indicators.rsi,
        };
        if remote.is_some() && !approx_eq(remote, point.value) {
            debug!(
                time = point.time,
                %kind,
                backend = ?remote,
                local = ?point.value,
                "Live indicator value differs from local accumulator"
            );
        }
    }
}
