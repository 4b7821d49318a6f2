//! HTTP boundary of the gateway: interception, denial rendering, forwarding.

pub mod app;
pub mod config;
pub mod context;
pub mod forward;
pub mod middleware;
