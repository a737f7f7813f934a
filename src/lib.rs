//! Fetches environment variables from a not-env backend at startup and
//! installs a hermetic, read-only override in place of the process
//! environment. Call [`initialize`] (or [`try_initialize`]) at the very
//! beginning of the program; everything after it reads variables through
//! [`env::var`] or the installed [`EnvOverride`].

pub mod env;
pub mod error;
pub mod fetch;
pub mod sdk;

pub use env::EnvOverride;
pub use error::{Error, Result};
pub use sdk::{initialize, try_initialize, Bootstrap};
