pub mod app;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export main modules
pub use infrastructure::k8s;
pub use infrastructure::kube_client;
