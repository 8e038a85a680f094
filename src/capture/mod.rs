//! The canary hit path: `ANY /c/:token`.

pub mod handler;
pub mod request;
