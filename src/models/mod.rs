mod account;
mod state;
mod uc;

pub use account::{Account, Target, DEFAULT_TOLERANCE_DAYS};
pub use state::ProcessingState;
pub use uc::{digits_only, sanitize_segment, UcCode, UcCodeError};
