pub mod events;
pub mod ids;
pub mod job;
pub mod priority;

pub use events::{BoxStream, QueueEvent};
pub use ids::JobId;
pub use job::{Job, JobOptions, JobStatus};
pub use priority::JobPriority;
