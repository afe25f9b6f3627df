use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::error::{FileError, FileResult};
use super::{PAGE_SIZE, PageNo};

/// Stable identifier of a paged file, derived from its canonical path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(u64);

impl FileId {
    /// Fixed seeds so the same canonical path always hashes to the same id
    const SEEDS: [u64; 4] = [
        0x6670_6462_0000_0001,
        0x9e37_79b9_7f4a_7c15,
        0xc2b2_ae3d_27d4_eb4f,
        0x1656_67b1_9e37_79f9,
    ];

    pub fn from_path(canonical: &Path) -> Self {
        let state =
            ahash::RandomState::with_seeds(Self::SEEDS[0], Self::SEEDS[1], Self::SEEDS[2], Self::SEEDS[3]);
        Self(state.hash_one(canonical))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identifies one page: the owning file plus the page number inside it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub file: FileId,
    pub page_no: PageNo,
}

impl PageId {
    pub fn new(file: FileId, page_no: PageNo) -> Self {
        Self { file, page_no }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.page_no)
    }
}

/// One OS file addressed in `PAGE_SIZE` blocks.
///
/// Positioned reads and writes are serialised through an internal mutex so a
/// `DiskFile` can be shared between the page cache and the storage file that
/// owns it.
pub struct DiskFile {
    id: FileId,
    path: PathBuf,
    file: Mutex<File>,
}

impl DiskFile {
    /// Open a file, creating it (and its parent directories) if it does not exist
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> FileResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Self::from_file(file, path)
    }

    /// Open an existing file
    pub fn open<P: AsRef<Path>>(path: P) -> FileResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FileError::FileNotFound(path.display().to_string()));
        }

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(file, path)
    }

    fn from_file(file: File, path: &Path) -> FileResult<Self> {
        let canonical = path
            .canonicalize()
            .map_err(|_| FileError::FileNotFound(path.display().to_string()))?;

        Ok(Self {
            id: FileId::from_path(&canonical),
            path: canonical,
            file: Mutex::new(file),
        })
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    /// Canonical path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a page into `buffer`. Bytes past the end of the file read as zeros.
    pub fn read_page(&self, page_no: PageNo, buffer: &mut [u8]) -> FileResult<()> {
        check_page_buffer(buffer.len())?;
        let offset = page_offset(page_no)?;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = file.read(&mut buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        // If we read less than PAGE_SIZE, fill the rest with zeros
        if filled < PAGE_SIZE {
            buffer[filled..].fill(0);
        }

        Ok(())
    }

    /// Read a page into a freshly allocated buffer
    pub fn read_page_vec(&self, page_no: PageNo) -> FileResult<Vec<u8>> {
        let mut buffer = vec![0u8; PAGE_SIZE];
        self.read_page(page_no, &mut buffer)?;
        Ok(buffer)
    }

    /// Write a page, extending the file if necessary
    pub fn write_page(&self, page_no: PageNo, buffer: &[u8]) -> FileResult<()> {
        check_page_buffer(buffer.len())?;
        let offset = page_offset(page_no)?;

        let mut file = self.file.lock();
        let required_size = offset + PAGE_SIZE as u64;
        let current_size = file.metadata()?.len();
        if current_size < required_size {
            file.set_len(required_size)?;
        }

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buffer)?;
        // No sync here; commit syncs the files it wrote

        Ok(())
    }

    /// Append a zero-filled page and return its page number.
    ///
    /// Allocation and the write happen under the file mutex, so concurrent
    /// callers always receive distinct page numbers.
    pub fn append_page(&self) -> FileResult<PageNo> {
        let mut file = self.file.lock();
        let len = file.metadata()?.len();
        let page_no = len.div_ceil(PAGE_SIZE as u64) as PageNo;
        let offset = page_offset(page_no)?;

        file.set_len(offset + PAGE_SIZE as u64)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&[0u8; PAGE_SIZE])?;

        Ok(page_no)
    }

    /// Number of pages in the file
    pub fn num_pages(&self) -> FileResult<usize> {
        let file = self.file.lock();
        let file_size = file.metadata()?.len();
        Ok(file_size.div_ceil(PAGE_SIZE as u64) as usize)
    }

    /// Sync file contents to disk (flush OS buffers)
    pub fn sync(&self) -> FileResult<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }
}

impl fmt::Debug for DiskFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskFile")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}

fn check_page_buffer(len: usize) -> FileResult<()> {
    if len != PAGE_SIZE {
        return Err(FileError::InvalidPageSize {
            expected: PAGE_SIZE,
            actual: len,
        });
    }
    Ok(())
}

fn page_offset(page_no: PageNo) -> FileResult<u64> {
    (page_no as u64)
        .checked_mul(PAGE_SIZE as u64)
        .ok_or(FileError::PageOutOfRange(page_no))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_dir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_open_or_create() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("nested").join("test.db");

        let file = DiskFile::open_or_create(&test_file).unwrap();
        assert!(test_file.exists());
        assert_eq!(file.num_pages().unwrap(), 0);
    }

    #[test]
    fn test_open_nonexistent_file() {
        let temp_dir = setup_test_dir();
        let result = DiskFile::open(temp_dir.path().join("missing.db"));
        assert!(matches!(result, Err(FileError::FileNotFound(_))));
    }

    #[test]
    fn test_file_id_is_stable_for_same_path() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");

        let first = DiskFile::open_or_create(&test_file).unwrap();
        // Non-canonical spelling of the same path
        let second = DiskFile::open(temp_dir.path().join(".").join("test.db")).unwrap();
        assert_eq!(first.id(), second.id());

        let other = DiskFile::open_or_create(temp_dir.path().join("other.db")).unwrap();
        assert_ne!(first.id(), other.id());
    }

    #[test]
    fn test_read_write_page() {
        let temp_dir = setup_test_dir();
        let file = DiskFile::open_or_create(temp_dir.path().join("test.db")).unwrap();

        let mut write_buffer = vec![0u8; PAGE_SIZE];
        write_buffer[0] = 42;
        write_buffer[100] = 99;
        write_buffer[PAGE_SIZE - 1] = 255;
        file.write_page(2, &write_buffer).unwrap();

        let mut read_buffer = vec![0u8; PAGE_SIZE];
        file.read_page(2, &mut read_buffer).unwrap();
        assert_eq!(read_buffer, write_buffer);
        assert_eq!(file.num_pages().unwrap(), 3);
    }

    #[test]
    fn test_read_past_end_returns_zeros() {
        let temp_dir = setup_test_dir();
        let file = DiskFile::open_or_create(temp_dir.path().join("test.db")).unwrap();

        let mut buffer = vec![7u8; PAGE_SIZE];
        file.read_page(100, &mut buffer).unwrap();
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_append_page() {
        let temp_dir = setup_test_dir();
        let file = DiskFile::open_or_create(temp_dir.path().join("test.db")).unwrap();

        assert_eq!(file.append_page().unwrap(), 0);
        assert_eq!(file.append_page().unwrap(), 1);
        assert_eq!(file.num_pages().unwrap(), 2);
        assert!(file.read_page_vec(1).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_invalid_buffer_size() {
        let temp_dir = setup_test_dir();
        let file = DiskFile::open_or_create(temp_dir.path().join("test.db")).unwrap();

        let mut small_buffer = vec![0u8; PAGE_SIZE - 1];
        let result = file.read_page(0, &mut small_buffer);
        assert!(matches!(result, Err(FileError::InvalidPageSize { .. })));

        let large_buffer = vec![0u8; PAGE_SIZE + 1];
        let result = file.write_page(0, &large_buffer);
        assert!(matches!(result, Err(FileError::InvalidPageSize { .. })));
    }
}
