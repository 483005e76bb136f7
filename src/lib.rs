pub mod file;

pub use file::{
    BufferConfig, BufferDescriptor, BufferId, BufferManager, BufferStats, DiskManager, FileError,
    FileResult, PAGE_SIZE, PageData, PageHandle, PageId,
};
