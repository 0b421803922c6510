pub mod aggregation;
pub mod caches;
pub mod controller;
pub mod correlation;
pub mod dashboard;
pub mod dispatch;
pub mod error;
pub mod indexes;
pub mod instrumentation;
pub mod mirror;
pub mod mock;
pub mod pipeline;
pub mod quantity;
pub mod records;
pub mod traits;

// Re-export the types the application wires together
pub use aggregation::engine::MetricsEngine;
pub use controller::PodController;
pub use dashboard::DashboardTrigger;
pub use dispatch::batcher::Batcher;
pub use dispatch::DispatchQueue;
pub use instrumentation::InstrumentationTracker;
pub use mirror::PodEvent;
pub use mirror::PodMirror;
pub use pipeline::PodPipeline;
