/// Chart Sync - Incremental Market-Series Library
///
/// Keeps a charting client consistent with a backend that serves one
/// historical snapshot followed by a stream of live bar updates:
/// - Bar store with merge-by-time upserts
/// - Indicator pipeline (SMA, MACD histogram, RSI) with provisional and final values
/// - Marker ledger of BUY/SELL signals
/// - Time-axis coordinator that keeps several chart surfaces on one visible range
/// - Stream reconciler that merges the snapshot with updates that arrive before it
///
/// The library also includes the transports (HTTP snapshot client and
/// WebSocket feed), the engine that drives them, the SMA band signal
/// detector and a marker backtest.
pub mod axis;
pub mod backtest;
pub mod bar;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod indicator;
pub mod marker;
pub mod reconciler;
pub mod signal;
pub mod snapshot;
pub mod surface;
pub mod types;

// Re-export commonly used types for convenience
pub use types::{Bar, IndicatorPoint, IndicatorSnapshot, LiveUpdate, Marker, MarkerKind, UnixTime};

pub use error::ChartError;

pub use bar::{BarStore, UpsertOutcome};
pub use indicator::{IndicatorConfig, IndicatorKind, IndicatorPipeline, IndicatorSeries};
pub use marker::MarkerLedger;

pub use axis::{LogicalRange, RangeNotifier, SurfaceId, TimeAxisCoordinator, ViewSurface};
pub use surface::{ChartSurface, RenderDelta, RenderSink, SeriesKey, SeriesPoint, SurfaceRouter};

pub use reconciler::{ReconcilerConfig, ReconcilerStats, StreamReconciler, UpdateOutcome};

// Transports and runtime
pub use config::ChartConfig;
pub use engine::{ChartEngine, EngineHandle};
pub use feed::{ConnectionStatus, FeedClient, FeedConfig, FeedHandle};
pub use snapshot::{Snapshot, SnapshotClient, SnapshotConfig};
