//! Service declarations.
//!
//! Organized into focused submodules:
//!
//! - `types` - typed [`ServiceConfig`] and the ordered [`ServiceConfigs`]
//! - `merge` - layered files and `extends` resolution
//! - `interpolate` - `${VAR}` substitution
//! - `env_file` - `env_file` parsing
//! - `lookup` - environment and file lookups supplied by the caller
//! - `validation` - raw shape and structural checks
//! - `hash` - config content hash used for drift detection

pub mod env_file;
pub mod interpolate;
pub mod merge;

mod hash;
mod lookup;
mod types;
mod validation;

pub use hash::*;
pub use lookup::*;
pub use merge::{merge_config, merge_services, NON_EXTENDABLE};
pub use types::*;
pub use validation::*;
