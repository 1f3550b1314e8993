pub mod config;
pub mod context;
pub mod daemon;
pub mod error;
pub mod health;
pub mod probe;
pub mod run_state;
pub mod signals;
pub mod status;

pub use config::Config;
pub use daemon::{DaemonState, SentinelDaemon};
pub use health::{HealthSnapshot, MonitorTarget, ServiceHealthReporter, ServiceStatus};
pub use run_state::RunState;
