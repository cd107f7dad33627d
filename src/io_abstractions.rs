//! The two external collaborators Design Note 9 asks to be abstracted away
//! from a concrete socket/file: a blocking datagram substrate, and a
//! sequential byte source/sink pair for the application payload.

use std::io::{self, Read as _, Write as _};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// A blocking send-to/receive-from datagram substrate. Implemented for
/// `std::net::UdpSocket`; also the seam a test harness can replace with an
/// in-memory channel pair.
pub trait DatagramSocket: Send {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()>;
}

impl DatagramSocket for UdpSocket {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, addr)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf)
    }

    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        UdpSocket::set_read_timeout(self, dur)
    }
}

/// A sequential readable byte stream: the application's byte source. `read`
/// returns the actual number of bytes read, which may be shorter than
/// `buf.len()` and is `0` exactly at end-of-stream.
pub trait ByteSource: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// A sequential writable byte sink: the application's byte sink. `write`
/// must append exactly `buf.len()` bytes.
pub trait ByteSink: Send {
    fn write(&mut self, buf: &[u8]) -> io::Result<()>;
}

impl ByteSource for std::fs::File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(self, buf)
    }
}

impl ByteSink for std::fs::File {
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        io::Write::write_all(self, buf)
    }
}

/// Buffered file source/sink, used by the binaries so large inputs don't
/// issue a syscall per MSS-sized read.
pub struct BufferedFileSource(io::BufReader<std::fs::File>);

impl BufferedFileSource {
    pub fn open(path: impl AsRef<std::path::Path>) -> io::Result<Self> {
        Ok(BufferedFileSource(io::BufReader::new(std::fs::File::open(
            path,
        )?)))
    }
}

impl ByteSource for BufferedFileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

pub struct BufferedFileSink(io::BufWriter<std::fs::File>);

impl BufferedFileSink {
    pub fn create(path: impl AsRef<std::path::Path>) -> io::Result<Self> {
        Ok(BufferedFileSink(io::BufWriter::new(std::fs::File::create(
            path,
        )?)))
    }
}

impl ByteSink for BufferedFileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.write_all(buf)?;
        self.0.flush()
    }
}
