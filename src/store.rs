//! Page stores.
//!
//! The tree engine consumes the [`PageStore`] trait and never touches files
//! itself. Two implementations are provided: [`FileStore`], a single-file
//! store where page `N` lives at byte offset `N * PAGE_SIZE` and page 0 is a
//! meta page carrying the root pointer, and [`MemStore`], a vector-backed
//! store for tests. A successful read always reflects the most recent
//! successful write for that page id.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::Path;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, TreeError};
use crate::page::{PageBuf, PageId, PAGE_SIZE};

/// Page-id to raw-bytes storage consumed by the tree engine.
///
/// The store also persists the root page pointer, so a tree can be reopened
/// without rescanning the file. Retry and backoff policy for failed I/O
/// belongs here, not in the tree.
pub trait PageStore: Send + Sync {
    /// Reads the page with the given id.
    fn read_page(&self, id: PageId) -> Result<PageBuf>;
    /// Writes a whole page.
    fn write_page(&self, id: PageId, buf: &PageBuf) -> Result<()>;
    /// Allocates a fresh page id. Ids are never reused.
    fn allocate_page(&self) -> Result<PageId>;
    /// The persisted root page pointer, if a tree has been created.
    fn root_page(&self) -> Result<Option<PageId>>;
    /// Persists the root page pointer.
    fn set_root_page(&self, id: PageId) -> Result<()>;
}

// Meta page layout (page 0 of a FileStore). Data pages start at 1, so a root
// pointer of 0 means "no tree yet".
const META_MAGIC: Range<usize> = 0..4;
const META_FORMAT_VERSION: Range<usize> = 4..6;
const META_ROOT_PAGE: Range<usize> = 8..12;
const META_NEXT_PAGE: Range<usize> = 12..16;

const MAGIC: &[u8; 4] = b"HTRE";
const FORMAT_VERSION: u16 = 1;

#[derive(Clone, Copy, Debug)]
struct Meta {
    root_page: u32,
    next_page: u32,
}

impl Meta {
    fn fresh() -> Self {
        Self {
            root_page: 0,
            next_page: 1,
        }
    }

    fn decode(buf: &PageBuf) -> Result<Self> {
        if &buf[META_MAGIC] != MAGIC {
            return Err(TreeError::CorruptPage("bad meta page magic"));
        }
        let version = u16::from_le_bytes(buf[META_FORMAT_VERSION].try_into().expect("2 bytes"));
        if version != FORMAT_VERSION {
            return Err(TreeError::CorruptPage("unsupported format version"));
        }
        let root_page = u32::from_le_bytes(buf[META_ROOT_PAGE].try_into().expect("4 bytes"));
        let next_page = u32::from_le_bytes(buf[META_NEXT_PAGE].try_into().expect("4 bytes"));
        if next_page == 0 || root_page >= next_page {
            return Err(TreeError::CorruptPage("meta page pointers out of range"));
        }
        Ok(Self {
            root_page,
            next_page,
        })
    }

    fn encode(&self) -> PageBuf {
        let mut buf = [0u8; PAGE_SIZE];
        buf[META_MAGIC].copy_from_slice(MAGIC);
        buf[META_FORMAT_VERSION].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf[META_ROOT_PAGE].copy_from_slice(&self.root_page.to_le_bytes());
        buf[META_NEXT_PAGE].copy_from_slice(&self.next_page.to_le_bytes());
        buf
    }
}

#[derive(Debug)]
struct FileInner {
    file: File,
    meta: Meta,
}

/// Single-file page store with positioned whole-page I/O.
#[derive(Debug)]
pub struct FileStore {
    inner: Mutex<FileInner>,
}

impl FileStore {
    /// Opens (or creates) a store file, validating the meta page.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        let len = file.metadata()?.len();
        let meta = if len == 0 {
            let meta = Meta::fresh();
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&meta.encode())?;
            debug!(
                target: "hilbert_tree::store",
                path = %path.as_ref().display(),
                "initialized fresh store file"
            );
            meta
        } else {
            let mut buf = [0u8; PAGE_SIZE];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf)?;
            Meta::decode(&buf)?
        };
        Ok(Self {
            inner: Mutex::new(FileInner { file, meta }),
        })
    }

    /// Flushes file contents and metadata to disk.
    pub fn sync(&self) -> Result<()> {
        let inner = self.inner.lock();
        inner.file.sync_all()?;
        Ok(())
    }

    fn write_meta(inner: &mut FileInner) -> Result<()> {
        let buf = inner.meta.encode();
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&buf)?;
        Ok(())
    }
}

impl PageStore for FileStore {
    fn read_page(&self, id: PageId) -> Result<PageBuf> {
        if id.0 == 0 {
            return Err(TreeError::InvalidArgument("page 0 is the meta page"));
        }
        let mut inner = self.inner.lock();
        if id.0 >= inner.meta.next_page {
            return Err(TreeError::PageStore(io::Error::new(
                io::ErrorKind::NotFound,
                format!("page {} was never allocated", id.0),
            )));
        }
        let mut buf = [0u8; PAGE_SIZE];
        inner
            .file
            .seek(SeekFrom::Start(u64::from(id.0) * PAGE_SIZE as u64))?;
        inner.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_page(&self, id: PageId, buf: &PageBuf) -> Result<()> {
        if id.0 == 0 {
            return Err(TreeError::InvalidArgument("page 0 is the meta page"));
        }
        let mut inner = self.inner.lock();
        if id.0 >= inner.meta.next_page {
            return Err(TreeError::PageStore(io::Error::new(
                io::ErrorKind::NotFound,
                format!("page {} was never allocated", id.0),
            )));
        }
        inner
            .file
            .seek(SeekFrom::Start(u64::from(id.0) * PAGE_SIZE as u64))?;
        inner.file.write_all(buf)?;
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();
        let id = inner.meta.next_page;
        inner.meta.next_page = id
            .checked_add(1)
            .ok_or(TreeError::InvalidArgument("page id space exhausted"))?;
        // Extend the file so the new page is readable before its first
        // logical write.
        inner
            .file
            .seek(SeekFrom::Start(u64::from(id) * PAGE_SIZE as u64))?;
        inner.file.write_all(&[0u8; PAGE_SIZE])?;
        Self::write_meta(&mut inner)?;
        Ok(PageId(id))
    }

    fn root_page(&self) -> Result<Option<PageId>> {
        let inner = self.inner.lock();
        if inner.meta.root_page == 0 {
            Ok(None)
        } else {
            Ok(Some(PageId(inner.meta.root_page)))
        }
    }

    fn set_root_page(&self, id: PageId) -> Result<()> {
        if id.0 == 0 {
            return Err(TreeError::InvalidArgument("page 0 cannot be the root"));
        }
        let mut inner = self.inner.lock();
        inner.meta.root_page = id.0;
        Self::write_meta(&mut inner)
    }
}

struct MemInner {
    pages: Vec<PageBuf>,
    root: Option<PageId>,
}

/// In-memory page store used by tests.
///
/// Page ids match [`FileStore`] numbering: slot 0 stands in for the meta page
/// and is never handed out.
pub struct MemStore {
    inner: Mutex<MemInner>,
}

impl MemStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemInner {
                pages: vec![[0u8; PAGE_SIZE]],
                root: None,
            }),
        }
    }

    /// Number of allocated data pages.
    pub fn page_count(&self) -> usize {
        self.inner.lock().pages.len() - 1
    }

    /// Overwrites a page with raw bytes, bypassing the codec. Lets tests
    /// plant corrupt pages.
    pub fn poke(&self, id: PageId, buf: PageBuf) {
        self.inner.lock().pages[id.0 as usize] = buf;
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PageStore for MemStore {
    fn read_page(&self, id: PageId) -> Result<PageBuf> {
        let inner = self.inner.lock();
        if id.0 == 0 || id.0 as usize >= inner.pages.len() {
            return Err(TreeError::PageStore(io::Error::new(
                io::ErrorKind::NotFound,
                format!("page {} was never allocated", id.0),
            )));
        }
        Ok(inner.pages[id.0 as usize])
    }

    fn write_page(&self, id: PageId, buf: &PageBuf) -> Result<()> {
        let mut inner = self.inner.lock();
        if id.0 == 0 || id.0 as usize >= inner.pages.len() {
            return Err(TreeError::PageStore(io::Error::new(
                io::ErrorKind::NotFound,
                format!("page {} was never allocated", id.0),
            )));
        }
        inner.pages[id.0 as usize] = *buf;
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();
        let id = inner.pages.len() as u32;
        inner.pages.push([0u8; PAGE_SIZE]);
        Ok(PageId(id))
    }

    fn root_page(&self) -> Result<Option<PageId>> {
        Ok(self.inner.lock().root)
    }

    fn set_root_page(&self, id: PageId) -> Result<()> {
        self.inner.lock().root = Some(id);
        Ok(())
    }
}
