//! Adapters for the three external tools.

pub mod compress;
pub mod par2;
pub mod protect;
pub mod traits;
pub mod upload;

pub use compress::CompressAdapter;
pub use protect::ProtectAdapter;
pub use traits::{CommandInvocation, StageAdapter};
pub use upload::UploadAdapter;
