//! Stages of the canary hit pipeline.

pub mod classify;
pub mod rate_limit;
pub mod recorder;
pub mod reverse_dns;
