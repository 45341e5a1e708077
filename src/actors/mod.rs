//! Actor-based check scheduling and live fan-out
//!
//! Each check target runs as an independent async task communicating via Tokio channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!              ┌───────────────────┐
//!              │     Scheduler     │ owns one handle per target
//!              └─────────┬─────────┘
//!                        │ spawns
//!          ┌─────────────┼─────────────┐
//!          │             │             │
//!   ┌──────▼──────┐ ┌────▼──────┐ ┌────▼──────┐
//!   │ Timer       │ │ Timer     │ │ Timer     │
//!   │ #1/icmp     │ │ #1/svc 4  │ │ #2/icmp   │
//!   └──────┬──────┘ └────┬──────┘ └────┬──────┘
//!          └─────────────┼─────────────┘
//!                        │ Check::run
//!              ┌─────────▼─────────┐
//!              │  check pipeline   │ probe, tracker, recorders, alerts
//!              └─────────┬─────────┘
//!                        │
//!              ┌─────────▼─────────┐
//!              │   LivePublisher   │ broadcast (MPMC)
//!              └───────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each timer has an mpsc command channel for control messages
//! 2. **Events**: Live updates go out on a broadcast channel for fan-out
//! 3. **Request/Response**: oneshot channels for synchronous triggers

pub mod messages;
pub mod publisher;
pub mod scheduler;

pub use messages::{LiveEvent, TimerCommand};
pub use publisher::{LivePublisher, LiveSubscription};
pub use scheduler::{Check, Scheduler};
