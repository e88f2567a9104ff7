//! Privileged system orchestration.
//!
//! Each submodule owns one subsystem and drives it exclusively through
//! the [`exec::CommandRunner`] seam.

pub mod backup;
pub mod cron;
pub mod database;
pub mod exec;
pub mod firewall;
pub mod php;
pub mod pkg;
pub mod service;
pub mod ssl;
pub mod webserver;

#[cfg(test)]
pub(crate) mod testing;
