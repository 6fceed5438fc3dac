//! Anonymous shared-memory regions for the zero-copy frame path.
//!
//! Linux uses `memfd_create`; other unix platforms fall back to a POSIX shm
//! object that is unlinked immediately after creation. The file descriptor
//! is the only name a region has; it is passed out-of-band to consumers.

#![cfg(unix)]

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use memmap2::MmapMut;

/// A mapped shared-memory region plus the descriptor that names it.
pub struct ShmRegion {
    map: MmapMut,
    fd: OwnedFd,
}

impl ShmRegion {
    /// Create a fresh region of `len` bytes, mapped read-write.
    pub fn create(len: usize) -> io::Result<Self> {
        let fd = create_fd()?;
        let rc = unsafe { libc::ftruncate(fd.as_raw_fd(), len as libc::off_t) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        let map = unsafe { MmapMut::map_mut(fd.as_raw_fd())? };
        Ok(Self { map, fd })
    }

    /// Map an existing region received as a descriptor. `len` must match the
    /// creator's region length; the pool header is validated separately.
    pub fn open(fd: OwnedFd, len: usize) -> io::Result<Self> {
        let map = unsafe { MmapMut::map_mut(fd.as_raw_fd())? };
        if map.len() < len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "shared region shorter than expected",
            ));
        }
        Ok(Self { map, fd })
    }

    /// Duplicate the descriptor for handing to another process.
    pub fn dup_fd(&self) -> io::Result<OwnedFd> {
        let raw = unsafe { libc::fcntl(self.fd.as_raw_fd(), libc::F_DUPFD_CLOEXEC, 0) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(unsafe { OwnedFd::from_raw_fd(raw) })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.map.as_ptr() as *mut u8
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.len() == 0
    }
}

#[cfg(target_os = "linux")]
fn create_fd() -> io::Result<OwnedFd> {
    let name = c"termweb-frames";
    let raw = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

#[cfg(all(unix, not(target_os = "linux")))]
fn create_fd() -> io::Result<OwnedFd> {
    use std::ffi::CString;
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let name = CString::new(format!("/termweb-{}-{}", std::process::id(), nanos))
        .expect("no interior nul");
    let raw = unsafe {
        libc::shm_open(
            name.as_ptr(),
            libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
            0o600 as libc::mode_t,
        )
    };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // The descriptor keeps the object alive; drop the name right away.
    unsafe { libc::shm_unlink(name.as_ptr()) };
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

/// Publish one payload under a *named* POSIX shm object for a consumer that
/// resolves names rather than descriptors (the terminal's image protocol
/// reads the object by name and unlinks it after the transfer). Any stale
/// object under the same name is replaced.
pub fn publish_named(name: &str, bytes: &[u8]) -> io::Result<()> {
    use std::ffi::CString;

    let cname = CString::new(name).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "shm name contains nul")
    })?;
    unsafe { libc::shm_unlink(cname.as_ptr()) };
    let raw = unsafe {
        libc::shm_open(
            cname.as_ptr(),
            libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
            0o600 as libc::mode_t,
        )
    };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    let rc = unsafe { libc::ftruncate(fd.as_raw_fd(), bytes.len() as libc::off_t) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::shm_unlink(cname.as_ptr()) };
        return Err(err);
    }
    let mut map = unsafe { MmapMut::map_mut(fd.as_raw_fd())? };
    map[..bytes.len()].copy_from_slice(bytes);
    map.flush()?;
    Ok(())
}

/// Outcome of the shared-memory availability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmProbe {
    Available,
    Forced,
    Disabled(&'static str),
}

impl ShmProbe {
    pub fn usable(&self) -> bool {
        matches!(self, ShmProbe::Available | ShmProbe::Forced)
    }
}

/// Probe whether a shared region can be created on this host. Environment
/// overrides win over the runtime probe; `TERMWEB_DISABLE_SHM` wins over
/// `TERMWEB_FORCE_SHM`. Whether the *terminal* can consume a descriptor is a
/// separate capability question answered at startup.
pub fn probe() -> ShmProbe {
    if env_flag("TERMWEB_DISABLE_SHM") {
        return ShmProbe::Disabled("disabled by TERMWEB_DISABLE_SHM");
    }
    if env_flag("TERMWEB_FORCE_SHM") {
        return ShmProbe::Forced;
    }
    match ShmRegion::create(4096) {
        Ok(_) => ShmProbe::Available,
        Err(e) => {
            tracing::debug!(target: "frame.shm", error = %e, "shm probe failed");
            ShmProbe::Disabled("shared memory creation failed")
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "1").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_write_round_trip() {
        let region = ShmRegion::create(4096).expect("create");
        assert!(region.len() >= 4096);
        unsafe {
            std::ptr::write_bytes(region.as_ptr(), 0xAB, 16);
            assert_eq!(*region.as_ptr().add(15), 0xAB);
        }
    }

    #[test]
    fn open_via_duplicated_fd_sees_writes() {
        let region = ShmRegion::create(4096).expect("create");
        unsafe { std::ptr::write_bytes(region.as_ptr(), 0x5A, 8) };
        let fd = region.dup_fd().expect("dup");
        let other = ShmRegion::open(fd, 4096).expect("open");
        unsafe {
            assert_eq!(*other.as_ptr(), 0x5A);
            assert_eq!(*other.as_ptr().add(7), 0x5A);
        }
    }
}
