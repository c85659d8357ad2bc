//! Usenet posting pipeline.
//!
//! Tasks are archived with rar, protected with PAR2 recovery data and posted
//! with nyuu. A [`pipeline::TaskManager`] owns the compression and upload
//! queues plus an approval list, and runs each stage as an external process.

pub mod config;
pub mod error;
pub mod history;
pub mod logging;
pub mod pipeline;
pub mod task;
pub mod utils;

pub use error::{Error, Result};
