//! Browser automation module
//!
//! Owns the Chrome instance driven over the DevTools protocol. One session
//! per claim attempt: launched at the start, torn down on every exit path.

mod driver;
mod errors;
mod session;

pub use driver::PageDriver;
pub use errors::BrowserError;
pub use session::{BrowserSession, BrowserSessionConfig};
