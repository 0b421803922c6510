pub mod app;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export main modules
pub use domain::aggregation;
pub use domain::controller;
pub use domain::dispatch;
pub use domain::pipeline;
pub use infrastructure::backend;
pub use infrastructure::k8s;
pub use infrastructure::kube_client;
pub use infrastructure::logging;
