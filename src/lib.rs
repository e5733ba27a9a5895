//! Outreach dispatch: sends approved recruiting outreach over LinkedIn,
//! email and SMS under per-user daily quotas, with an audit log.

pub mod api;
pub mod channels;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod scheduler;
pub mod store;
