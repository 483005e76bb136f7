mod buffer_manager;
mod config;
mod disk_manager;
mod error;

pub use buffer_manager::{BufferDescriptor, BufferManager, BufferStats, PageHandle};
pub use config::BufferConfig;
pub use disk_manager::DiskManager;
pub use error::{FileError, FileResult};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = usize;

/// Position of a slot in the buffer pool
pub type BufferId = usize;

/// Raw contents of one page
pub type PageData = [u8; PAGE_SIZE];
