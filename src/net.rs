//! 连接使用的传输层。
//!
//! [`Context`](crate::Context) 只通过 [`Transport`] 这个小接口读写字节，因此既可以跑在真实的套接字上，也可以跑在
//! 测试用的内存脚本上。套接字的建立、超时和 keepalive 等选项由 [`SocketTransport`] 基于 `socket2` 实现。
use crate::context::Options;
use crate::{Error, ErrorKind};

use socket2::{Domain, Protocol, SockAddr, Socket, TcpKeepalive, Type};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// 双向字节流。
///
/// `read` 和 `write` 的语义与 `std::io` 相同：非阻塞模式下没有数据时返回 `WouldBlock`，`read` 返回 0 表示对端关闭。
/// 可选的套接字选项默认返回 `Unsupported`。
pub trait Transport: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// 设置读写超时，`None` 表示不超时
    fn set_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Err(unsupported("timeouts"))
    }

    fn set_keepalive(&mut self, _interval: Duration) -> io::Result<()> {
        Err(unsupported("keepalive"))
    }

    fn set_tcp_user_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Err(unsupported("TCP user timeout"))
    }

    /// 非阻塞连接是否已经完成
    fn connect_done(&mut self) -> io::Result<bool> {
        Ok(true)
    }
}

fn unsupported(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{} not supported by this transport", what),
    )
}

/// 连接的目标地址，重连时会再次使用。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp {
        host: String,
        port: u16,
        /// 连接前绑定的本地地址
        source_addr: Option<String>,
    },
    Unix(PathBuf),
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Endpoint {
        Endpoint::Tcp {
            host: host.into(),
            port,
            source_addr: None,
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Endpoint {
        Endpoint::Unix(path.into())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port, .. } => write!(fmt, "{}:{}", host, port),
            Endpoint::Unix(path) => write!(fmt, "{}", path.display()),
        }
    }
}

/// 基于操作系统套接字的传输。
#[derive(Debug)]
pub struct SocketTransport {
    socket: Socket,
}

impl SocketTransport {
    pub fn new(socket: Socket) -> SocketTransport {
        SocketTransport { socket }
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn into_socket(self) -> Socket {
        self.socket
    }
}

impl Transport for SocketTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.write(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        match self.socket.shutdown(Shutdown::Both) {
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            res => res,
        }
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        // 零时长表示不超时
        let timeout = timeout.filter(|t| !t.is_zero());
        self.socket.set_read_timeout(timeout)?;
        self.socket.set_write_timeout(timeout)
    }

    fn set_keepalive(&mut self, interval: Duration) -> io::Result<()> {
        let keepalive = TcpKeepalive::new().with_time(interval);

        #[cfg(any(target_os = "linux", target_os = "android"))]
        let keepalive = keepalive
            .with_interval((interval / 3).max(Duration::from_secs(1)))
            .with_retries(3);

        self.socket.set_tcp_keepalive(&keepalive)
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn set_tcp_user_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.socket.set_tcp_user_timeout(Some(timeout))
    }

    fn connect_done(&mut self) -> io::Result<bool> {
        if let Some(err) = self.socket.take_error()? {
            return Err(err);
        }

        match self.socket.peer_addr() {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// 按 `options` 建立到 `endpoint` 的连接。
///
/// 返回的布尔值表示连接是否已经完成；非阻塞模式下连接可能仍在进行中。
pub(crate) fn connect(endpoint: &Endpoint, options: &Options) -> Result<(SocketTransport, bool), Error> {
    match endpoint {
        Endpoint::Tcp {
            host,
            port,
            source_addr,
        } => connect_tcp(host, *port, source_addr.as_deref(), options),
        Endpoint::Unix(path) => {
            let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
            let addr = SockAddr::unix(path)?;
            let connected = start_connect(&socket, &addr, options)?;
            Ok((SocketTransport::new(socket), connected))
        }
    }
}

fn connect_tcp(
    host: &str,
    port: u16,
    source_addr: Option<&str>,
    options: &Options,
) -> Result<(SocketTransport, bool), Error> {
    let mut addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|err| Error::new(ErrorKind::Other, format!("Can't resolve {}: {}", host, err)))?
        .collect();

    order_addrs(&mut addrs, options);

    let mut last_err = None;

    for addr in addrs {
        match connect_addr(addr, source_addr, options) {
            Ok(res) => return Ok(res),
            Err(err) => {
                debug!(%addr, cause = %err, "connect attempt failed");
                last_err = Some(err);
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| Error::new(ErrorKind::Other, format!("Can't resolve {}", host))))
}

/// 只设置了一种偏好时，把该地址族排到前面，另一种作为后备；同族地址保持解析顺序
fn order_addrs(addrs: &mut [SocketAddr], options: &Options) {
    if options.prefer_ipv4 && !options.prefer_ipv6 {
        addrs.sort_by_key(|addr| !addr.is_ipv4());
    } else if options.prefer_ipv6 && !options.prefer_ipv4 {
        addrs.sort_by_key(|addr| !addr.is_ipv6());
    }
}

fn connect_addr(
    addr: SocketAddr,
    source_addr: Option<&str>,
    options: &Options,
) -> Result<(SocketTransport, bool), Error> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    if options.reuse_addr {
        socket.set_reuse_address(true)?;
    }

    if let Some(source) = source_addr {
        bind_source(&socket, addr, source)?;
    }

    let connected = start_connect(&socket, &SockAddr::from(addr), options)?;
    socket.set_nodelay(true)?;

    Ok((SocketTransport::new(socket), connected))
}

/// 绑定与目标地址同一地址族的源地址
fn bind_source(socket: &Socket, target: SocketAddr, source: &str) -> Result<(), Error> {
    let candidates = (source, 0)
        .to_socket_addrs()
        .map_err(|err| Error::new(ErrorKind::Other, format!("Can't resolve {}: {}", source, err)))?;

    let mut last_err = None;

    for candidate in candidates.filter(|c| c.is_ipv4() == target.is_ipv4()) {
        match socket.bind(&SockAddr::from(candidate)) {
            Ok(()) => return Ok(()),
            Err(err) => last_err = Some(err),
        }
    }

    let cause = match last_err {
        Some(err) => err.to_string(),
        None => "no address of the right family".to_string(),
    };

    Err(Error::new(ErrorKind::Io, format!("Can't bind socket: {}", cause)))
}

fn start_connect(socket: &Socket, addr: &SockAddr, options: &Options) -> Result<bool, Error> {
    if options.nonblocking {
        socket.set_nonblocking(true)?;

        return match socket.connect(addr) {
            Ok(()) => Ok(true),
            Err(err) if in_progress(&err) => Ok(false),
            Err(err) => Err(err.into()),
        };
    }

    match options.connect_timeout.filter(|t| !t.is_zero()) {
        Some(timeout) => socket.connect_timeout(addr, timeout)?,
        None => socket.connect(addr)?,
    }

    Ok(true)
}

fn in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || matches!(err.raw_os_error(), Some(libc::EINPROGRESS) | Some(libc::EAGAIN))
}
