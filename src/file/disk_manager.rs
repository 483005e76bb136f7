use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use super::error::FileResult;
use super::{PAGE_SIZE, PageData, PageId};

/// Fixed-size block storage over a single backing file.
///
/// Page `i` lives at byte offset `i * PAGE_SIZE`. There is no header and no
/// free list: once allocated, a page id owns its slot in the file forever.
pub struct DiskManager {
    file: File,
    /// Next id handed out by `allocate_page`
    next_page_id: PageId,
}

impl DiskManager {
    /// Wrap an already-open file. The file must be readable and writable.
    ///
    /// Allocation resumes after the last whole page already in the file.
    pub fn new(file: File) -> FileResult<Self> {
        let file_size = file.metadata()?.len();
        let next_page_id = (file_size / PAGE_SIZE as u64) as PageId;
        debug!(
            "opened page file: {} bytes, next_page_id={}",
            file_size, next_page_id
        );
        Ok(Self { file, next_page_id })
    }

    /// Open a page file, creating it (and its parent directories) if missing
    pub fn open<P: AsRef<Path>>(path: P) -> FileResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::new(file)
    }

    /// Hand out a fresh page id. Ids are never reused.
    pub fn allocate_page(&mut self) -> PageId {
        let page_id = self.next_page_id;
        self.next_page_id += 1;
        page_id
    }

    /// The id the next call to `allocate_page` will return
    pub fn next_page_id(&self) -> PageId {
        self.next_page_id
    }

    /// Write a full page at its offset, growing the file if needed.
    ///
    /// Only allocated ids may be written; anything else is an end-of-file error.
    pub fn write_page(&mut self, page_id: PageId, data: &PageData) -> FileResult<usize> {
        if page_id >= self.next_page_id {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "page {} was never allocated (next_page_id={})",
                    page_id, self.next_page_id
                ),
            )
            .into());
        }

        let offset = offset_of(page_id)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        // Not synced here; see `sync`
        Ok(PAGE_SIZE)
    }

    /// Read a full page from its offset.
    ///
    /// A page that lies (even partly) past the end of the file fails with
    /// `UnexpectedEof`. That is how callers find out a page was never written.
    pub fn read_page(&mut self, page_id: PageId, data: &mut PageData) -> FileResult<usize> {
        let offset = offset_of(page_id)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(data)?;
        Ok(PAGE_SIZE)
    }

    /// Number of whole pages currently stored in the file
    pub fn page_count(&self) -> FileResult<usize> {
        let file_size = self.file.metadata()?.len();
        Ok((file_size / PAGE_SIZE as u64) as usize)
    }

    /// Flush OS buffers for the backing file
    pub fn sync(&mut self) -> FileResult<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

fn offset_of(page_id: PageId) -> io::Result<u64> {
    (page_id as u64)
        .checked_mul(PAGE_SIZE as u64)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("page {} is beyond any addressable offset", page_id),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileError;
    use tempfile::TempDir;

    fn setup_test_env() -> (TempDir, DiskManager) {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::open(temp_dir.path().join("test.db")).unwrap();
        (temp_dir, dm)
    }

    fn patterned(seed: u8) -> Box<PageData> {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        for (i, b) in data.iter_mut().enumerate() {
            *b = seed.wrapping_add(i as u8);
        }
        data
    }

    #[test]
    fn test_allocate_sequential() {
        let (_temp_dir, mut dm) = setup_test_env();

        for expected in 0..10 {
            assert_eq!(dm.allocate_page(), expected);
        }
        assert_eq!(dm.next_page_id(), 10);
    }

    #[test]
    fn test_allocate_interleaved_with_io() {
        let (_temp_dir, mut dm) = setup_test_env();
        let mut ids = Vec::new();

        for i in 0..5u8 {
            let page_id = dm.allocate_page();
            dm.write_page(page_id, &patterned(i)).unwrap();
            let mut buf = Box::new([0u8; PAGE_SIZE]);
            dm.read_page(page_id, &mut buf).unwrap();
            ids.push(page_id);
        }

        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_write_read_page() {
        let (_temp_dir, mut dm) = setup_test_env();

        let page_id = dm.allocate_page();
        assert_eq!(page_id, 0);

        let written = patterned(7);
        assert_eq!(dm.write_page(page_id, &written).unwrap(), PAGE_SIZE);

        let mut read = Box::new([0u8; PAGE_SIZE]);
        assert_eq!(dm.read_page(page_id, &mut read).unwrap(), PAGE_SIZE);
        assert_eq!(read, written);
    }

    #[test]
    fn test_write_extends_file() {
        let (_temp_dir, mut dm) = setup_test_env();

        for _ in 0..4 {
            dm.allocate_page();
        }
        assert_eq!(dm.page_count().unwrap(), 0);

        // Page 3 has never been written, but is allocated
        dm.write_page(3, &patterned(1)).unwrap();
        assert_eq!(dm.page_count().unwrap(), 4);

        // The gap reads back as zeros
        let mut buf = Box::new([0xffu8; PAGE_SIZE]);
        dm.read_page(1, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_read_past_eof() {
        let (_temp_dir, mut dm) = setup_test_env();

        assert_eq!(dm.allocate_page(), 0);

        let mut buf = Box::new([0u8; PAGE_SIZE]);
        let err = dm.read_page(0, &mut buf).unwrap_err();
        assert!(err.is_eof());

        let err = dm.read_page(1, &mut buf).unwrap_err();
        assert!(err.is_eof());
    }

    #[test]
    fn test_write_unallocated_page() {
        let (_temp_dir, mut dm) = setup_test_env();

        assert_eq!(dm.allocate_page(), 0);

        let err = dm.write_page(1, &patterned(1)).unwrap_err();
        assert!(matches!(err, FileError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
        assert_eq!(dm.page_count().unwrap(), 0);
    }

    #[test]
    fn test_read_short_page() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("short.db");
        std::fs::write(&path, vec![1u8; PAGE_SIZE + 100]).unwrap();

        let mut dm = DiskManager::open(&path).unwrap();
        assert_eq!(dm.next_page_id(), 1);

        let mut buf = Box::new([0u8; PAGE_SIZE]);
        dm.read_page(0, &mut buf).unwrap();
        assert!(dm.read_page(1, &mut buf).unwrap_err().is_eof());
    }

    #[test]
    fn test_reopen_continues_sequence() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("test.db");

        {
            let mut dm = DiskManager::open(&path).unwrap();
            for i in 0..3u8 {
                let page_id = dm.allocate_page();
                dm.write_page(page_id, &patterned(i)).unwrap();
            }
            dm.sync().unwrap();
        }

        let mut dm = DiskManager::open(&path).unwrap();
        assert_eq!(dm.page_count().unwrap(), 3);
        assert_eq!(dm.allocate_page(), 3);

        let mut buf = Box::new([0u8; PAGE_SIZE]);
        dm.read_page(2, &mut buf).unwrap();
        assert_eq!(buf, patterned(2));
    }

    #[test]
    fn test_new_from_open_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("test.db");
        std::fs::write(&path, vec![0u8; PAGE_SIZE * 2]).unwrap();

        let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let mut dm = DiskManager::new(file).unwrap();
        assert_eq!(dm.allocate_page(), 2);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("dir").join("test.db");

        let dm = DiskManager::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(dm.next_page_id(), 0);
    }
}
