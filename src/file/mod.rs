mod disk_file;
mod error;

pub use disk_file::{DiskFile, FileId, PageId};
pub use error::{FileError, FileResult};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page number within a single file
pub type PageNo = usize;
