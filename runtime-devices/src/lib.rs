#[allow(unused_imports)]
pub(crate) use anyhow::{anyhow, bail, Result};

#[allow(unused_imports)]
pub(crate) use tracing::{debug, error, info, span, trace, warn, Level};

pub use logging::{i_ln, i_lns, i_nln, i_nlns};
pub mod devices;
pub mod logging;
pub mod native_loader;
pub mod target_dir;

pub use target_dir::get_target_directory;
