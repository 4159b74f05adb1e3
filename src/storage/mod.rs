pub mod temp;

pub use temp::{TempFileConfig, TempFileManager};
