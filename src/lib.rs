//! fleetwake - remote power/reset controller
//!
//! This crate provides the control core for fleetwake, a daemon that
//! drives the reset lines of a small fleet of compute boards over GPIO
//! and accepts triggers from Wake-on-LAN style magic packets and a web
//! control panel.

pub mod action;
pub mod config;
pub mod error;
pub mod gpio;
pub mod net;
pub mod pinger;
pub mod privs;
pub mod security;
pub mod state;
pub mod supervisor;
pub mod targets;
pub mod web;
pub mod wol;

pub use error::{AppError, Result};
