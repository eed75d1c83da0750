pub mod config;
pub mod error;
pub mod export;
pub mod fetch;
pub mod pipeline;
pub mod reference;
pub mod report;
pub mod store;
pub mod transform;
pub mod week;

pub use config::Config;
pub use error::{RegStatError, Result};
