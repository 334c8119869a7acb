pub mod builder;
pub mod cli;
mod cmake;
pub mod download;
mod recipe;
pub mod resolver;
mod state;
pub mod update;
pub mod version_state;
mod zip;

pub use builder::*;
pub use cli::*;
pub use download::{DownloadError, Progress, ProgressPhase};
pub use resolver::{Artifact, AssetResolver};
pub use update::*;
pub use version_state::{PreviousVersionEntry, StateFile, StateKey, VersionState, VersionStateStore};
