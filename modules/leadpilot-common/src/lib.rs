pub mod config;
pub mod error;
pub mod keywords;
pub mod retry;
pub mod types;

pub use config::Config;
pub use error::LeadPilotError;
pub use keywords::{merge_keywords, normalize_keyword};
pub use types::*;
