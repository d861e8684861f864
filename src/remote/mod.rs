//! Mirrors log entries to a goal-tracking service as numeric data points.
//! [client::RemoteClient] speaks the service's REST API and collapses every
//! failure into [client::RemoteError], [sync::SyncEngine] decides which
//! points to create, update or delete, and [projection] turns raw log
//! entries into the per-day hour values the service expects.

pub mod client;
pub mod projection;
pub mod sync;
