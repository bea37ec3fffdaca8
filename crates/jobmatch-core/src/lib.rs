pub mod cancel;
pub mod config;
pub mod error;
pub mod types;

pub use cancel::CancelToken;
pub use config::JobMatchConfig;
pub use error::{JobMatchError, Result};
pub use types::*;
