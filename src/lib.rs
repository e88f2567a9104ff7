//! ironpanel: single-host Linux server administration.
//!
//! One orchestration layer drives every subsystem through external
//! commands; the CLI and the web panel are thin surfaces over it.

pub mod auth;
pub mod cli;
pub mod config;
pub mod sys;
pub mod web;

pub use sys::exec::{ActionData, ActionResult, CommandRunner, SystemRunner};
