//! examlock - exam lockdown agent library
//!
//! This library exposes the enforcement pipeline: process inventory, policy
//! synchronization and evaluation, violation throttling, enforcement actions
//! and the scheduler that ties them together.

pub mod constants;
pub mod context;
pub mod daemon;
pub mod enforce;
pub mod models;
pub mod monitor;
pub mod output;
pub mod remote;
pub mod sync;
