use nix::libc;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::mem;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

const TIOCGSERIAL: libc::c_ulong = 0x541E;
const TIOCSSERIAL: libc::c_ulong = 0x541F;
const ASYNC_LOW_LATENCY: libc::c_int = 0x2000;

nix::ioctl_read_bad!(tty_get_config, libc::TCGETS2, libc::termios2);
nix::ioctl_write_ptr_bad!(tty_set_config, libc::TCSETS2, libc::termios2);
nix::ioctl_read_bad!(tty_get_serial, TIOCGSERIAL, SerialInfo);
nix::ioctl_write_ptr_bad!(tty_set_serial, TIOCSSERIAL, SerialInfo);

/// Mirror of the kernel's `struct serial_struct`, used only to request
/// low-latency mode from the UART driver.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SerialInfo {
    pub kind: libc::c_int,
    pub line: libc::c_int,
    pub port: libc::c_uint,
    pub irq: libc::c_int,
    pub flags: libc::c_int,
    pub xmit_fifo_size: libc::c_int,
    pub custom_divisor: libc::c_int,
    pub baud_base: libc::c_int,
    pub close_delay: libc::c_ushort,
    pub io_type: libc::c_char,
    pub reserved_char: [libc::c_char; 1],
    pub hub6: libc::c_int,
    pub closing_wait: libc::c_ushort,
    pub closing_wait2: libc::c_ushort,
    pub iomem_base: *mut libc::c_uchar,
    pub iomem_reg_shift: libc::c_ushort,
    pub port_high: libc::c_uint,
    pub iomap_base: libc::c_ulong,
}

/// The opened serial device in raw mode.
///
/// The terminal settings found at open time are saved and restored exactly
/// once, either by an explicit [`SerialChannel::restore`] during session
/// teardown or by `Drop` as the fallback.
pub struct SerialChannel {
    file: File,
    saved: libc::termios2,
    restored: AtomicBool,
    device: String,
}

impl SerialChannel {
    /// Opens `device` and configures it raw: 8 data bits, no parity, one
    /// stop bit, no echo or line processing, an arbitrary (`BOTHER`) baud
    /// rate, and blocking single-byte reads with no inter-character
    /// timeout.
    pub fn open(device: &str, baud: u32) -> std::io::Result<Self> {
        // Never as controlling tty; stray control bytes from the device
        // must not signal this process.
        let file = File::options()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(device)?;
        let fd = file.as_raw_fd();

        let mut saved: libc::termios2 = unsafe { mem::zeroed() };
        unsafe { tty_get_config(fd, &mut saved) }.map_err(std::io::Error::from)?;

        let mut raw: libc::termios2 = unsafe { mem::zeroed() };
        raw.c_cflag = libc::BOTHER | libc::CS8 | libc::CLOCAL | libc::CREAD;
        raw.c_iflag = libc::IGNPAR;
        raw.c_ispeed = baud;
        raw.c_ospeed = baud;
        raw.c_cc[libc::VMIN] = 1;
        raw.c_cc[libc::VTIME] = 0;
        unsafe { tty_set_config(fd, &raw) }.map_err(std::io::Error::from)?;

        // Best effort: some UART drivers (FTDI notably) batch input unless
        // low-latency mode is requested.
        let mut serial_info: SerialInfo = unsafe { mem::zeroed() };
        match unsafe { tty_get_serial(fd, &mut serial_info) } {
            Ok(_) => {
                serial_info.flags |= ASYNC_LOW_LATENCY;
                if let Err(err) = unsafe { tty_set_serial(fd, &serial_info) } {
                    debug!("low-latency mode not available on {device}: {err}");
                }
            }
            Err(err) => debug!("low-latency mode not available on {device}: {err}"),
        }

        info!("opened {device} at {baud} baud");
        Ok(Self {
            file,
            saved,
            restored: AtomicBool::new(false),
            device: device.to_string(),
        })
    }

    /// One blocking read of a single byte. `Ok(None)` means a zero-length
    /// read; `ErrorKind::Interrupted` is surfaced so a signal can break
    /// the caller's loop.
    pub fn read_byte(&self) -> std::io::Result<Option<u8>> {
        let mut buf = [0_u8; 1];
        match (&self.file).read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(err) => Err(err),
        }
    }

    /// Writes the whole message, retrying interrupted and short writes.
    pub fn write_all(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut written = 0;
        while written < bytes.len() {
            match (&self.file).write(&bytes[written..]) {
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Puts the terminal settings back the way they were at open time.
    pub fn restore(&self) {
        if self.restored.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = unsafe { tty_set_config(self.file.as_raw_fd(), &self.saved) } {
            debug!("failed to restore terminal settings on {}: {err}", self.device);
        } else {
            info!("restored terminal settings on {}", self.device);
        }
    }
}

impl Drop for SerialChannel {
    fn drop(&mut self) {
        self.restore();
    }
}
