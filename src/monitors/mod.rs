//! Status tracking and the records derived from transitions

pub mod downtime;
pub mod latency;
pub mod tracker;

pub use downtime::{DowntimeChange, DowntimeRecorder};
pub use latency::LatencyRecorder;
pub use tracker::{ProbeParams, StatusTracker, TransitionOutcome};
