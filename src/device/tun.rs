use crate::device::Device;
use crate::{Error, Result};
use nix::errno::Errno;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::{fmt, mem};
use tracing::{debug, info, warn};

/// Kernel control device used to create TUN interfaces.
pub const CONTROL_PATH: &str = "/dev/net/tun";

/// IFF_TUN   - IP tunnel mode, no Ethernet headers
///
/// IFF_NO_PI - no 4-byte packet information prefix
pub const TUN_FLAGS: libc::c_short = (libc::IFF_TUN | libc::IFF_NO_PI) as libc::c_short;

/// Parked on the descriptor number once the interface is released.
const PLACEHOLDER_PATH: &str = "/dev/null";

/// A configured Linux TUN interface.
///
/// Owns the descriptor returned by opening [`CONTROL_PATH`]. The interface
/// exists for as long as that file stays open.
///
/// [`close`](Device::close) releases the TUN file but keeps the descriptor
/// number reserved until the `Tun` is dropped, so a pump thread still
/// holding the number cannot reach a file opened elsewhere afterwards.
pub struct Tun {
    fd: RawFd,
    closed: AtomicBool,
    name: String,
    flags: libc::c_short,
}

impl Tun {
    /// Opens the TUN control device and binds it to `name` in IP tunnel
    /// mode without packet information.
    ///
    /// # Errors
    ///
    /// [`Error::Open`] if the control device cannot be opened (missing
    /// module, missing `CAP_NET_ADMIN`). [`Error::Config`] if the name is
    /// unusable or the kernel rejects the request; the control device is
    /// closed again before returning.
    pub fn open_and_configure(name: &str) -> Result<Self> {
        Self::open_at(CONTROL_PATH, name)
    }

    pub(crate) fn open_at(path: impl AsRef<Path>, name: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(Error::Open)?;

        // `file` is dropped, and the descriptor closed, on every early return.
        let config_err = |source: io::Error| Error::Config {
            name: name.to_string(),
            source,
        };
        let mut ifr = ifreq_for(name).map_err(config_err)?;

        Errno::result(unsafe { libc::ioctl(file.as_raw_fd(), libc::TUNSETIFF, &mut ifr) })
            .map_err(|errno| config_err(errno.into()))?;

        let name = ifreq_name(&ifr);
        info!(iface = %name, "TUN interface configured");

        Ok(Self::from_raw_fd(file.into_raw_fd(), name))
    }

    /// Takes ownership of an open descriptor.
    fn from_raw_fd(fd: RawFd, name: String) -> Self {
        Self {
            fd,
            closed: AtomicBool::new(false),
            name,
            flags: TUN_FLAGS,
        }
    }

    /// Name assigned by the kernel. Usually the requested one.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> libc::c_short {
        self.flags
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::from(Errno::EBADF));
        }
        Ok(())
    }
}

impl Device for Tun {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        let n = Errno::result(unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) })?;
        // A read racing `close` may have landed on the placeholder.
        self.ensure_open()?;
        Ok(n as usize)
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        let n = Errno::result(unsafe { libc::write(self.fd, buf.as_ptr().cast(), buf.len()) })?;
        Ok(n as usize)
    }

    /// Swaps the placeholder onto the descriptor number. `dup3` closes the
    /// TUN file atomically, which removes the interface.
    fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(iface = %self.name, fd = self.fd, "releasing TUN descriptor");
        let placeholder = OpenOptions::new()
            .read(true)
            .write(true)
            .open(PLACEHOLDER_PATH)?;
        Errno::result(unsafe { libc::dup3(placeholder.as_raw_fd(), self.fd, libc::O_CLOEXEC) })?;
        Ok(())
    }
}

impl Drop for Tun {
    fn drop(&mut self) {
        if let Err(err) = Errno::result(unsafe { libc::close(self.fd) }) {
            warn!(iface = %self.name, error = %err, "failed to close TUN descriptor");
        }
    }
}

impl fmt::Debug for Tun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tun")
            .field("fd", &self.fd)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("name", &self.name)
            .field("flags", &format_args!("{:#06x}", self.flags))
            .finish()
    }
}

/// Builds the `TUNSETIFF` request: the name NUL-padded into the 16-byte
/// field and the TUN flags.
fn ifreq_for(name: &str) -> io::Result<libc::ifreq> {
    let bytes = name.as_bytes();
    if bytes.len() >= libc::IFNAMSIZ {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "interface name too long",
        ));
    }
    if bytes.contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "interface name contains a NUL byte",
        ));
    }

    let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
    for (dst, &src) in ifr.ifr_name.iter_mut().zip(bytes) {
        *dst = src as libc::c_char;
    }
    ifr.ifr_ifru.ifru_flags = TUN_FLAGS;
    Ok(ifr)
}

fn ifreq_name(ifr: &libc::ifreq) -> String {
    let bytes: Vec<u8> = ifr
        .ifr_name
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
