use std::io;
use thiserror::Error;

use super::{BufferId, PageId};

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No free buffer available")]
    NoFreeBuffer,

    #[error("Invalid pool size: {0}")]
    InvalidPoolSize(usize),

    #[error("Invalid page handle: buffer_id={buffer_id}, page_id={page_id}")]
    InvalidHandle { buffer_id: BufferId, page_id: PageId },

    #[error("Page not resident: page_id={0}")]
    PageNotResident(PageId),
}

impl FileError {
    /// Whether this error is a short read or a write past the end of the file
    pub fn is_eof(&self) -> bool {
        matches!(self, FileError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

pub type FileResult<T> = Result<T, FileError>;
