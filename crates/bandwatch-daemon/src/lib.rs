//! # bandwatch-daemon
//!
//! Process bootstrap for bandwatch: logging, collaborator wiring, the
//! read-only status API and the daily report job.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod daily;
pub mod logging;
pub mod state;
pub mod wiring;
