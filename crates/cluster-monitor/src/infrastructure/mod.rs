pub mod backend;
pub mod dashboards;
pub mod instrumenter;
pub mod k8s;
pub mod kube_client;
pub mod logging;
