mod inspect;
mod lifecycle;
mod run;

pub use inspect::*;
pub use lifecycle::*;
pub use run::*;

use std::time::Duration;

pub(crate) fn seconds(timeout: u64) -> Duration {
    Duration::from_secs(timeout)
}
