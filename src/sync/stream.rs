use std::io::{BufReader, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

#[cfg(feature = "sync-tls")]
use native_tls::TlsStream;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::gss::{GssContext, GssStream, ReadAvailable};

/// A buffered TCP socket that can also be written to.
#[derive(Debug)]
pub struct Socket(BufReader<TcpStream>);

impl Socket {
    pub fn new(tcp: TcpStream) -> Self {
        Self(BufReader::new(tcp))
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl ReadAvailable for Socket {
    fn available(&self) -> usize {
        self.0.available()
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.get_mut().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.get_mut().flush()
    }
}

/// The connection's transport, plain or encrypted.
pub enum Stream {
    Tcp(Socket),
    #[cfg(feature = "sync-tls")]
    Tls(BufReader<TlsStream<TcpStream>>),
    Gss(Box<GssStream<Socket>>),
}

impl Stream {
    /// Connect with `TCP_NODELAY`, bounded by `timeout` when given.
    pub fn connect(host: &str, port: u16, timeout: Option<Duration>) -> Result<Self> {
        let tcp = match timeout {
            Some(timeout) => {
                let mut last_err = None;
                let mut connected = None;
                for addr in std::net::ToSocketAddrs::to_socket_addrs(&(host, port))? {
                    match TcpStream::connect_timeout(&addr, timeout) {
                        Ok(tcp) => {
                            connected = Some(tcp);
                            break;
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                match (connected, last_err) {
                    (Some(tcp), _) => tcp,
                    (None, Some(e)) => return Err(e.into()),
                    (None, None) => {
                        return Err(Error::Config(format!("{host} did not resolve to any address")));
                    }
                }
            }
            None => TcpStream::connect((host, port))?,
        };
        tcp.set_nodelay(true)?;
        Ok(Self::Tcp(Socket::new(tcp)))
    }

    /// Bytes already buffered ahead of what the protocol consumed.
    pub fn buffered(&self) -> usize {
        match self {
            Stream::Tcp(s) => s.available(),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(r) => r.buffer().len(),
            Stream::Gss(s) => s.available(),
        }
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.read_exact(buf),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(r) => r.read_exact(buf),
            Stream::Gss(r) => r.read_exact(buf),
        }
    }

    pub fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(w) => w.write_all(buf),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(r) => r.get_mut().write_all(buf),
            Stream::Gss(w) => w.write_all(buf),
        }
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(w) => w.flush(),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(r) => r.get_mut().flush(),
            Stream::Gss(w) => w.flush(),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    /// Read one message into `buffer_set`.
    pub fn read_message(&mut self, buffer_set: &mut BufferSet) -> Result<()> {
        let mut header = [0u8; 5];
        self.read_exact(&mut header)?;
        let [type_byte, len @ ..] = header;
        buffer_set.type_byte = type_byte;

        let length = u32::from_be_bytes(len);
        let payload_len = length
            .checked_sub(4)
            .ok_or_else(|| Error::Protocol(format!("Invalid message length: {length}")))?;
        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.resize(payload_len as usize, 0);
        self.read_exact(&mut buffer_set.read_buffer)?;
        Ok(())
    }

    /// Write and flush `buf`.
    pub fn send(&mut self, buf: &[u8]) -> Result<()> {
        self.write_all(buf)?;
        self.flush()?;
        Ok(())
    }

    /// Wrap a plain TCP stream in GSS framing.
    pub fn into_gss(self, ctx: Box<dyn GssContext>) -> Result<Self> {
        match self {
            Stream::Tcp(socket) => Ok(Stream::Gss(Box::new(GssStream::new(socket, ctx)))),
            _ => Err(Error::Protocol("GSS encryption requested on an encrypted stream".into())),
        }
    }

    /// Upgrade a plain TCP stream to TLS.
    #[cfg(feature = "sync-tls")]
    pub fn into_tls(self, host: &str, accept_invalid: bool) -> Result<Self> {
        let Stream::Tcp(socket) = self else {
            return Err(Error::Protocol("TLS requested on an encrypted stream".into()));
        };
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(accept_invalid)
            .danger_accept_invalid_hostnames(accept_invalid)
            .build()?;
        let tcp = socket.0.into_inner();
        let tls = connector
            .connect(host, tcp)
            .map_err(|e| Error::Tls(e.to_string()))?;
        Ok(Stream::Tls(BufReader::new(tls)))
    }
}
