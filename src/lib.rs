pub mod accounts;
pub mod clock;
pub mod config;
pub mod debug;
pub mod downstream;
pub mod duration;
pub mod eligibility;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod pdf;
pub mod poll;
pub mod portal;
pub mod prompt;
pub mod storage;

pub use error::{Error, Result};
