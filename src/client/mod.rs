//! Client side of trade tracking: pending submissions, the poll loop that drives
//! them to a terminal state, and the merged activity feed.

pub mod activity;
pub mod api;
pub mod pending;
pub mod poller;

pub use activity::{unify, ActivityItem};
pub use api::{ApiClient, StatusSource};
pub use pending::{PendingStatus, PendingStore, PendingTradeRecord};
pub use poller::{PendingPoller, PollSummary, RefreshTarget};
