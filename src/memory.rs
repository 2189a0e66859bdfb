//! Protected storage for secret material.
//!
//! Every buffer that holds a secret is a [`SecretBytes`]: it is allocated at
//! its final size, locked through a [`MemoryProtector`] before any secret byte
//! is written, and zeroized then unlocked when dropped. A `SecretBytes` can
//! never grow, so its locked region is always the region holding the data.
//!
//! # Platform Support
//!
//! - Unix: `mlock(2)` / `munlock(2)` via libc, core dumps disabled via `setrlimit`
//! - Other: locking reports `Unsupported`

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// Shared handle to the protector injected into every derivation.
pub type Protector = Arc<dyn MemoryProtector>;

/// Keeps secret regions out of swap for as long as they are live.
///
/// Implementations must be safe to call concurrently for independent regions.
pub trait MemoryProtector: Send + Sync + fmt::Debug {
    /// Pin `region` in physical memory.
    fn lock(&self, region: &[u8]) -> Result<()>;

    /// Release a region previously passed to [`MemoryProtector::lock`].
    /// Called after the region has been zeroized.
    fn unlock(&self, region: &[u8]);
}

/// What to do when the OS refuses to lock a region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockPolicy {
    /// Fail the operation with a resource error.
    #[default]
    Required,
    /// Log a warning and keep going with swappable memory.
    BestEffort,
}

/// [`MemoryProtector`] backed by `mlock(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MlockProtector {
    policy: LockPolicy,
}

impl MlockProtector {
    pub fn new(policy: LockPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> LockPolicy {
        self.policy
    }

    /// Convenience for building the shared handle.
    pub fn shared(policy: LockPolicy) -> Protector {
        Arc::new(Self::new(policy))
    }
}

/// Lock count per page, shared by every `MlockProtector` in the process.
///
/// `mlock` works on whole pages and does not nest, so a page is only
/// unlocked once the last buffer touching it is released.
static LOCKED_PAGES: LazyLock<Mutex<HashMap<usize, usize>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn locked_pages() -> MutexGuard<'static, HashMap<usize, usize>> {
    LOCKED_PAGES.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Start addresses of every page `region` overlaps.
fn pages_of(region: &[u8], page_size: usize) -> impl Iterator<Item = usize> {
    let addr = region.as_ptr() as usize;
    let first = addr & !(page_size - 1);
    let end = if region.is_empty() { first } else { addr + region.len() };
    (first..end).step_by(page_size)
}

impl MemoryProtector for MlockProtector {
    fn lock(&self, region: &[u8]) -> Result<()> {
        let page_size = sys::page_size();
        let mut pages = locked_pages();

        let mut fresh = Vec::new();
        for page in pages_of(region, page_size).filter(|p| !pages.contains_key(p)) {
            match sys::mlock(page, page_size) {
                Ok(()) => fresh.push(page),
                Err(e) => match self.policy {
                    LockPolicy::Required => {
                        for &page in &fresh {
                            let _ = sys::munlock(page, page_size);
                        }
                        return Err(Error::resource("lock secret memory", e));
                    }
                    LockPolicy::BestEffort => {
                        warn!(len = region.len(), error = %e, "mlock failed, secret memory may be swapped");
                    }
                },
            }
        }

        for page in pages_of(region, page_size) {
            *pages.entry(page).or_insert(0) += 1;
        }
        Ok(())
    }

    fn unlock(&self, region: &[u8]) {
        let page_size = sys::page_size();
        let mut pages = locked_pages();

        for page in pages_of(region, page_size) {
            let Some(count) = pages.get_mut(&page) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                pages.remove(&page);
                if let Err(e) = sys::munlock(page, page_size) {
                    debug!(page, error = %e, "munlock failed");
                }
            }
        }
    }
}

/// A fixed-size, locked, self-zeroizing byte buffer.
pub struct SecretBytes {
    bytes: Box<[u8]>,
    protector: Protector,
}

impl SecretBytes {
    /// Allocate `len` zero bytes and lock them before returning.
    pub fn zeroed(len: usize, protector: &Protector) -> Result<Self> {
        let bytes = vec![0u8; len].into_boxed_slice();
        if !bytes.is_empty() {
            protector.lock(&bytes)?;
        }
        Ok(Self {
            bytes,
            protector: Arc::clone(protector),
        })
    }

    /// Allocate a locked buffer of `src.len()` bytes, then copy `src` into it.
    pub fn copy_from(src: &[u8], protector: &Protector) -> Result<Self> {
        let mut secret = Self::zeroed(src.len(), protector)?;
        secret.as_mut_slice().copy_from_slice(src);
        Ok(secret)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        // zeroize before the pages can be swapped again
        let bytes: &mut [u8] = &mut self.bytes;
        bytes.zeroize();
        if !self.bytes.is_empty() {
            self.protector.unlock(&self.bytes);
        }
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes([REDACTED; {}])", self.bytes.len())
    }
}

static CORE_DUMPS_DISABLED: AtomicBool = AtomicBool::new(false);

/// Disable core dumps for the current process so a crash never writes
/// secret memory to disk. Returns `true` once core dumps are off.
pub fn disable_core_dumps() -> bool {
    if CORE_DUMPS_DISABLED.swap(true, Ordering::SeqCst) {
        return true;
    }

    match sys::disable_core_dumps() {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "failed to disable core dumps");
            CORE_DUMPS_DISABLED.store(false, Ordering::SeqCst);
            false
        }
    }
}

#[cfg(unix)]
mod sys {
    use std::io;

    pub fn page_size() -> usize {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        usize::try_from(size)
            .ok()
            .filter(|s| s.is_power_of_two())
            .unwrap_or(4096)
    }

    // mlock/munlock only change page attributes; the address is never dereferenced.
    pub fn mlock(page: usize, len: usize) -> io::Result<()> {
        // SAFETY: the page belongs to a live allocation held by the caller.
        let rc = unsafe { libc::mlock(page as *const libc::c_void, len) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    pub fn munlock(page: usize, len: usize) -> io::Result<()> {
        // SAFETY: as above; munlock on pages that were never locked is harmless.
        let rc = unsafe { libc::munlock(page as *const libc::c_void, len) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    pub fn disable_core_dumps() -> io::Result<()> {
        let rlim = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: setrlimit only reads the struct we pass.
        let rc = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &rlim) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(not(unix))]
mod sys {
    use std::io;

    fn unsupported() -> io::Error {
        io::Error::new(
            io::ErrorKind::Unsupported,
            "memory locking is not supported on this platform",
        )
    }

    pub fn page_size() -> usize {
        4096
    }

    pub fn mlock(_page: usize, _len: usize) -> io::Result<()> {
        Err(unsupported())
    }

    pub fn munlock(_page: usize, _len: usize) -> io::Result<()> {
        Ok(())
    }

    pub fn disable_core_dumps() -> io::Result<()> {
        Err(unsupported())
    }
}
