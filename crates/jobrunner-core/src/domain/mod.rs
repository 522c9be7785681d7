//! Domain model (ids, requests, records, status machine, queries).

pub mod ids;
pub mod query;
pub mod record;
pub mod request;
pub mod state;

pub use ids::JobId;
pub use query::{JobFilter, JobPage, Page};
pub use record::{JobRecord, PendingCursor, TransitionFields};
pub use request::JobRequest;
pub use state::JobStatus;
