//! Persistence layer: the transactional relational store behind every
//! domain entity, and the Event Log / Approval Store / Audit Sink
//! components built directly on top of it.

pub mod approvals;
pub mod audit;
pub mod database;
pub mod domain_grants;
pub mod events;
pub mod idempotency;
pub mod messages;
pub mod threads;

pub use approvals::{ApprovalStore, ApproveOutcome};
pub use audit::AuditStore;
pub use database::{Database, SharedDatabase};
pub use domain_grants::DomainGrantStore;
pub use events::{EventLog, Subscription};
pub use idempotency::IdempotencyStore;
pub use messages::MessageStore;
pub use threads::ThreadStore;
