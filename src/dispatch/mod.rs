//! Outreach dispatch: data model, rate limiting, execution log, and the
//! batch loop that ties them together.

pub mod engine;
pub mod log;
pub mod model;
pub mod rate_limit;

pub use engine::Dispatcher;
pub use log::ExecutionLog;
pub use model::{
    Channel, DispatchOutcome, DispatchRequest, ExecutionLogEntry, ExecutionSummary, OutreachTask,
    Recipient, SendStatus, SkipReason, TaskDetail,
};
pub use rate_limit::{ChannelUsage, Clock, CountPolicy, FixedClock, RateLimiter, SystemClock};
