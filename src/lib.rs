#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod api;
pub mod config;
pub mod devices;
pub mod discover;
pub mod error;
pub mod gate;
pub mod ident;
pub mod impact;
pub mod lifecycle;
pub mod logging;
pub mod session;
pub mod settings;
pub mod util;
