pub mod error;
pub mod guard;
pub mod kill;
pub mod pid;

pub use error::*;
pub use kill::*;
pub use pid::*;

const POLITE_WAIT: std::time::Duration = std::time::Duration::from_secs(2);
const POLL_INTERVAL_MS: u64 = 100;
const FORCE_KILL_TIMEOUT_SECS: u64 = 1;
