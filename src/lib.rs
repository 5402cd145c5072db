//! Outreach delivery engine — background delivery of scheduled follow-ups.
//!
//! The worker polls for due follow-up tasks, asks the content service for
//! copy, checks the bounce ledger for suppression, and hands the message to
//! an ordered multi-provider failover sender. Bounces feed back into the
//! ledger so bad recipients stop receiving outreach.

pub mod bounce;
pub mod config;
pub mod content;
pub mod error;
pub mod model;
pub mod sender;
pub mod store;
pub mod worker;
