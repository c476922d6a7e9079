#![forbid(unsafe_code)]

// mcswarm library - fake-player stress-test session controller

pub mod api;
pub mod config;
pub mod metrics;
pub mod session;
pub mod swarm;
