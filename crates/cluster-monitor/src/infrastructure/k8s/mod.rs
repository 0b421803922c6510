//! Kubernetes integration module.
//!
//! The main components are:
//! - [`PodWatcher`]: feeds pod watch results into the pod mirror and emits
//!   typed pod events for the controller
//! - [`ResourceWatcher`]: keeps one correlation cache in sync with the cluster
//! - [`MetricsApiSource`], [`PodLogSource`] and [`KubeEventPublisher`]: the
//!   cluster-side data sources and sinks the engine consumes through traits

pub mod events;
pub mod metrics_api;
pub mod pod_logs;
pub mod pod_watcher;
pub mod resource_watcher;
pub mod types;

pub use events::KubeEventPublisher;
pub use metrics_api::MetricsApiSource;
pub use pod_logs::PodLogSource;
pub use pod_watcher::PodWatcher;
pub use resource_watcher::CacheWatchers;
pub use resource_watcher::ResourceWatcher;
pub use types::KubernetesError;
