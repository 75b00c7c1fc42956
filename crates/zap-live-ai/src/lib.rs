mod client;
mod flows;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod prompt;
mod types;

pub use client::*;
pub use flows::*;
#[cfg(any(test, feature = "mock"))]
pub use mock::*;
pub use prompt::*;
