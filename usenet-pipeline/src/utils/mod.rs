pub mod filename;
pub mod fs;
