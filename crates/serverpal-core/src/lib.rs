pub mod archiver;
pub mod config;
pub mod error;
pub mod io;
pub mod launcher;
pub mod observer;
pub mod orchestrator;
pub mod paths;
pub mod supervisor;
pub mod updater;

pub use error::{Result, ServerPalError};
