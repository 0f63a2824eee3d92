#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod app;
pub mod cli;
pub mod collection;
pub mod config;
pub mod create;
pub mod domains;
pub mod error;
pub mod filter;
pub mod logging;
pub mod paths;
pub mod property;
pub mod protocol;
pub mod run;
pub mod storage;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;
pub mod util;
pub mod vm;
