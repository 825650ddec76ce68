pub mod bpf_config;
pub mod clock;
pub mod collector;
pub mod config;
pub mod event_id;
pub mod metrics;
pub mod pid_filter;
pub mod runtime;

pub use collector::Collector;
pub use config::Config;
pub use metrics::Metrics;
