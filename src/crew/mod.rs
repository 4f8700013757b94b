//! Crew health records
//!
//! Holds the crew store and everything computed from it:
//! - Risk predictions and anomaly flags (fixture data)
//! - Tasks assigned by the medical team
//! - Crew queries with automated answers
//! - Synthetic vital trends and chat transcripts

pub mod handlers;
pub mod models;
pub mod responder;
pub mod store;
pub mod trend;

pub use models::{
    ChatMessage, ChatSender, CrewMember, CrewProfile, Query, QueryResponse, RiskLevel, Task,
    TrendPoint,
};
pub use store::CrewStore;
pub use trend::Vital;
