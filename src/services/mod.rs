pub mod export;
pub mod metrics;
pub mod observer;

pub use export::{EventCategory, ExportConfig, ExportFormat, LoggedEvent, MetricsExporter};
pub use metrics::{MetricsAggregator, SIGNIFICANT_COHERENCE_DELTA};
pub use observer::{BroadcastObserver, FanoutObserver, Observer, ObserverEvent, TracingObserver};
