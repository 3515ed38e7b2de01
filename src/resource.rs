use crate::config::REAL_PATH_CAPACITY;
use crate::error::ResolveError;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use tracing::trace;

const S_IROTH: u32 = 0o004;

/// Read-only private mapping of a whole file. Unmapped exactly once, on drop.
pub struct FileMap {
    ptr: NonNull<u8>,
    len: usize,
}

// The mapping is PROT_READ and never aliased mutably.
unsafe impl Send for FileMap {}
unsafe impl Sync for FileMap {}

impl FileMap {
    pub fn map(file: &File, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Ok(Self { ptr: NonNull::dangling(), len: 0 });
        }
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
        Ok(Self { ptr, len })
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for FileMap {
    fn drop(&mut self) {
        if self.len > 0 {
            unsafe {
                libc::munmap(self.ptr.as_ptr().cast(), self.len);
            }
        }
    }
}

impl std::fmt::Debug for FileMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMap").field("len", &self.len).finish()
    }
}

/// A file that passed every check and is mapped for sending.
#[derive(Debug)]
pub struct Resource {
    pub path: PathBuf,
    pub mode: u32,
    pub map: FileMap,
}

impl Resource {
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        self.map.as_slice()
    }
}

/// `root` followed by `target`, cut to `REAL_PATH_CAPACITY - 1` bytes.
pub fn real_path(root: &Path, target: &[u8]) -> PathBuf {
    let mut bytes = Vec::with_capacity(REAL_PATH_CAPACITY);
    bytes.extend_from_slice(root.as_os_str().as_bytes());
    bytes.extend_from_slice(target);
    bytes.truncate(REAL_PATH_CAPACITY - 1);
    PathBuf::from(OsString::from_vec(bytes))
}

/// Maps a validated request target (starting with `/`) to a file under `root`.
pub fn resolve(root: &Path, target: &[u8]) -> Result<Resource, ResolveError> {
    let target = match target.iter().position(|&b| b == b'?' || b == b'#') {
        Some(end) => &target[..end],
        None => target,
    };
    if target.split(|&b| b == b'/').any(|seg| seg == b"..") {
        return Err(ResolveError::Traversal);
    }

    let path = real_path(root, target);
    trace!(path = %path.display(), "resolving");

    let meta = fs::metadata(&path).map_err(|_| ResolveError::NotFound)?;
    let mode = meta.permissions().mode();
    if mode & S_IROTH == 0 {
        return Err(ResolveError::Forbidden);
    }
    if meta.is_dir() {
        return Err(ResolveError::IsDirectory);
    }
    if !meta.is_file() {
        return Err(ResolveError::Forbidden);
    }

    let file = File::open(&path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ResolveError::NotFound,
        io::ErrorKind::PermissionDenied => ResolveError::Forbidden,
        _ => ResolveError::Io(e),
    })?;
    let len = usize::try_from(meta.len())
        .map_err(|_| ResolveError::Io(io::Error::new(io::ErrorKind::Other, "file too large to map")))?;
    let map = FileMap::map(&file, len).map_err(ResolveError::Io)?;

    Ok(Resource { path, mode, map })
}
