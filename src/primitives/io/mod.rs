#![forbid(unsafe_code)]

use std::{
    collections::{HashMap, HashSet},
    fs::{File, OpenOptions},
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};

use crate::types::{Result, SombraError};

/// Trait for performing positioned file I/O operations.
pub trait FileIo: Send + Sync + 'static {
    /// Reads bytes from the file at the specified offset into the buffer.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes bytes to the file at the specified offset from the buffer.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Synchronizes all file data and metadata to disk.
    fn sync_all(&self) -> Result<()>;
    /// Returns the current length of the file in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Truncates or extends the file to the specified length.
    fn truncate(&self, len: u64) -> Result<()>;
    /// Reads the whole file into memory.
    fn read_all(&self) -> Result<Vec<u8>> {
        let len = usize::try_from(self.len()?)
            .map_err(|_| SombraError::Invalid("file too large to read into memory"))?;
        let mut buf = vec![0u8; len];
        if len > 0 {
            self.read_at(0, &mut buf)?;
        }
        Ok(buf)
    }
}

/// Filesystem operations the id allocator and record stores need.
pub trait FileSystem: Send + Sync + 'static {
    /// Creates a new file, failing if one already exists at `path`.
    fn create_new(&self, path: &Path) -> Result<Arc<dyn FileIo>>;
    /// Opens an existing file for reading and writing.
    fn open_rw(&self, path: &Path) -> Result<Arc<dyn FileIo>>;
    /// Opens an existing file for reading only. Writes through the handle fail.
    fn open_read(&self, path: &Path) -> Result<Arc<dyn FileIo>>;
    /// Returns true if a file exists at `path`.
    fn exists(&self, path: &Path) -> bool;
    /// Removes the file at `path`.
    fn delete(&self, path: &Path) -> Result<()>;
    /// Creates `path` and any missing parents.
    fn create_dir_all(&self, path: &Path) -> Result<()>;
}

/// [`FileIo`] over an operating system file handle.
#[derive(Clone, Debug)]
pub struct StdFileIo {
    file: Arc<File>,
}

impl StdFileIo {
    /// Wraps an open file.
    pub fn new(file: File) -> Self {
        Self {
            file: Arc::new(file),
        }
    }

    #[cfg(unix)]
    fn pread(&self, off: u64, dst: &mut [u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(dst, off)
    }

    #[cfg(unix)]
    fn pwrite(&self, off: u64, src: &[u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.write_all_at(src, off)
    }

    #[cfg(windows)]
    fn pread(&self, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !dst.is_empty() {
            let read = self.file.seek_read(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(ErrorKind::UnexpectedEof, "file ended mid-read"));
            }
            dst = &mut dst[read..];
            off += read as u64;
        }
        Ok(())
    }

    #[cfg(windows)]
    fn pwrite(&self, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !src.is_empty() {
            let written = self.file.seek_write(src, off)?;
            if written == 0 {
                return Err(io::Error::new(ErrorKind::WriteZero, "file accepted no bytes"));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        Ok(self.pread(off, dst)?)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        Ok(self.pwrite(off, src)?)
    }

    fn sync_all(&self) -> Result<()> {
        Ok(self.file.sync_all()?)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        Ok(self.file.set_len(len)?)
    }
}

/// [`FileSystem`] backed by the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn create_new(&self, path: &Path) -> Result<Arc<dyn FileIo>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Arc::new(StdFileIo::new(file)))
    }

    fn open_rw(&self, path: &Path) -> Result<Arc<dyn FileIo>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)?;
        Ok(Arc::new(StdFileIo::new(file)))
    }

    fn open_read(&self, path: &Path) -> Result<Arc<dyn FileIo>> {
        let file = OpenOptions::new().read(true).open(path)?;
        Ok(Arc::new(StdFileIo::new(file)))
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn delete(&self, path: &Path) -> Result<()> {
        Ok(std::fs::remove_file(path)?)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        Ok(std::fs::create_dir_all(path)?)
    }
}

/// In-memory file used by [`MemFileSystem`].
#[derive(Clone, Default)]
pub struct MemFileIo {
    data: Arc<RwLock<Vec<u8>>>,
    read_only: bool,
}

impl MemFileIo {
    fn read_only_handle(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            read_only: true,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(SombraError::Io(io::Error::new(
                ErrorKind::PermissionDenied,
                "in-memory file opened read-only",
            )));
        }
        Ok(())
    }
}

impl FileIo for MemFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        let data = self.data.read();
        let start = usize::try_from(off).map_err(|_| SombraError::Invalid("offset overflow"))?;
        let end = start
            .checked_add(dst.len())
            .ok_or(SombraError::Invalid("offset overflow"))?;
        if end > data.len() {
            return Err(SombraError::Io(io::Error::new(
                ErrorKind::UnexpectedEof,
                "read past end of in-memory file",
            )));
        }
        dst.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        self.check_writable()?;
        let mut data = self.data.write();
        let start = usize::try_from(off).map_err(|_| SombraError::Invalid("offset overflow"))?;
        let end = start
            .checked_add(src.len())
            .ok_or(SombraError::Invalid("offset overflow"))?;
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(src);
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.check_writable()?;
        let len = usize::try_from(len).map_err(|_| SombraError::Invalid("length overflow"))?;
        self.data.write().resize(len, 0);
        Ok(())
    }
}

/// Ephemeral [`FileSystem`] keeping every file in memory.
///
/// Handles stay valid after [`FileSystem::delete`], mirroring unlink semantics;
/// the path is simply forgotten. Cloning shares the same namespace.
#[derive(Clone, Default)]
pub struct MemFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, MemFileIo>>>,
    /// Paths that refuse read-write opens, like files without write permission.
    protected: Arc<Mutex<HashSet<PathBuf>>>,
}

impl MemFileSystem {
    /// Creates an empty in-memory filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the bytes currently stored at `path`.
    pub fn snapshot(&self, path: &Path) -> Option<Vec<u8>> {
        let files = self.files.lock();
        files.get(path).map(|file| file.data.read().clone())
    }

    /// Makes later [`FileSystem::open_rw`] calls on `path` fail with permission denied.
    pub fn protect(&self, path: &Path) {
        self.protected.lock().insert(path.to_path_buf());
    }

    fn lookup(&self, path: &Path) -> Result<MemFileIo> {
        match self.files.lock().get(path) {
            Some(file) => Ok(file.clone()),
            None => Err(SombraError::Io(io::Error::new(
                ErrorKind::NotFound,
                format!("{} not found", path.display()),
            ))),
        }
    }
}

impl FileSystem for MemFileSystem {
    fn create_new(&self, path: &Path) -> Result<Arc<dyn FileIo>> {
        let mut files = self.files.lock();
        if files.contains_key(path) {
            return Err(SombraError::Io(io::Error::new(
                ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )));
        }
        let file = MemFileIo::default();
        files.insert(path.to_path_buf(), file.clone());
        Ok(Arc::new(file))
    }

    fn open_rw(&self, path: &Path) -> Result<Arc<dyn FileIo>> {
        let file = self.lookup(path)?;
        if self.protected.lock().contains(path) {
            return Err(SombraError::Io(io::Error::new(
                ErrorKind::PermissionDenied,
                format!("{} is not writable", path.display()),
            )));
        }
        Ok(Arc::new(file))
    }

    fn open_read(&self, path: &Path) -> Result<Arc<dyn FileIo>> {
        Ok(Arc::new(self.lookup(path)?.read_only_handle()))
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }

    fn delete(&self, path: &Path) -> Result<()> {
        match self.files.lock().remove(path) {
            Some(_) => Ok(()),
            None => Err(SombraError::Io(io::Error::new(
                ErrorKind::NotFound,
                format!("{} not found", path.display()),
            ))),
        }
    }

    fn create_dir_all(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}
