pub mod builder;
pub mod handle;
pub mod ipc;
pub mod pool;
pub mod process;
pub mod toolchain;
pub mod types;

pub use builder::*;
pub use handle::*;
pub use pool::*;
pub use process::*;
pub use toolchain::*;
pub use types::*;
