//! Sentinel orchestration: message path, tick cycle and connection supervision

pub mod orchestrator;
pub mod report;
pub mod supervisor;

pub use orchestrator::{Sentinel, SentinelCore, SUBSCRIBE_ALL};
pub use report::{StatsReport, TopicEntry, TopicReport};
pub use supervisor::{ConnectionState, ConnectionSupervisor, SupervisorAction};
