//! In-process abuse guard for the vacant room lookup service.
//!
//! Tracks request rates and failed admin logins per client IP, bans abusive
//! clients for a while, locks the admin surface under a distributed brute
//! force attack and raises throttled security alerts.

pub mod api;
pub mod config;
pub mod core;
pub mod models;
pub mod utils;
