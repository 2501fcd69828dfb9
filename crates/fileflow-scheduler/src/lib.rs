pub mod claim;
pub mod config;
pub mod error;
pub mod liveness;
pub mod nodes;
pub mod registration;

pub use claim::{ClaimScheduler, LocalWorkSource};
pub use config::SchedulerConfig;
pub use error::RegistrationError;
pub use liveness::LivenessMonitor;
pub use nodes::NodeRegistry;
pub use registration::{
    candidate_urls, register, HttpRegistrationTransport, RegistrationResult,
    RegistrationTransport, FALLBACK_PORTS,
};
