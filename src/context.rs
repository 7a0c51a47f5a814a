use crate::format::{self, Arg};
use crate::net::{self, Endpoint, Transport};
use crate::reader::{Reader, DEFAULT_MAX_BUF, DEFAULT_MAX_ELEMENTS};
use crate::reply::Reply;
use crate::{Error, ErrorKind, Result};

use bytes::{Buf, BytesMut};
use std::fmt;
use std::io;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

/// 每次从传输层读取的最大字节数
const READ_BUF_SIZE: usize = 16 * 1024;

/// 默认的 keepalive 间隔
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// 推送消息的处理函数。处理函数获得回复的所有权。
pub type PushHandler = Box<dyn FnMut(Reply) + Send>;

/// 建立连接时使用的选项。
///
/// 所有字段都会保存在 [`Context`] 中，[`Context::reconnect`] 按同样的选项重新建立连接。
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// 连接目标
    pub endpoint: Option<Endpoint>,
    /// 以非阻塞模式建立连接
    pub nonblocking: bool,
    /// 连接前设置 `SO_REUSEADDR`
    pub reuse_addr: bool,
    pub prefer_ipv4: bool,
    pub prefer_ipv6: bool,
    pub connect_timeout: Option<Duration>,
    /// 读写超时，只对阻塞模式的连接生效
    pub command_timeout: Option<Duration>,
    /// 单个聚合回复的元素上限，`None` 使用默认值
    pub max_elements: Option<usize>,
    /// 读取器空闲缓冲区的容量上限，`None` 使用默认值
    pub max_buf: Option<usize>,
}

impl Options {
    pub fn tcp(host: impl Into<String>, port: u16) -> Options {
        Options {
            endpoint: Some(Endpoint::tcp(host, port)),
            ..Options::default()
        }
    }

    pub fn unix(path: impl Into<std::path::PathBuf>) -> Options {
        Options {
            endpoint: Some(Endpoint::unix(path)),
            ..Options::default()
        }
    }
}

/// 连接所处的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// 非阻塞连接尚未完成
    Connecting,
    Connected,
    /// 已经锁定了一个错误，只有重连才能恢复
    Error,
}

/// 到服务器的一条连接。
///
/// `Context` 持有待发送命令的输出缓冲区和解析回复的 [`Reader`]。命令先被编码并追加到输出缓冲区，
/// 在阻塞模式下由 [`get_reply`](Context::get_reply) 负责写出并读回回复；在非阻塞模式下，调用方在套接字可写、
/// 可读时自行调用 [`buffer_write`](Context::buffer_write) 和 [`buffer_read`](Context::buffer_read)。
///
/// 回复按命令追加的顺序返回。推送消息在安装了处理函数时交给处理函数，否则与普通回复一样按收到的顺序返回。
///
/// 一旦出错，错误会被锁定在上下文中，之后发出请求的操作都直接返回该错误而不触碰传输层，直到调用
/// [`reconnect`](Context::reconnect)。
pub struct Context {
    // 尚未写出的请求字节
    obuf: BytesMut,

    reader: Reader,

    transport: Option<Box<dyn Transport>>,

    err: Option<Error>,

    state: State,

    blocking: bool,

    // 重连时使用的选项
    options: Options,

    push_handler: Option<PushHandler>,
}

impl Context {
    /// 以阻塞模式连接到 TCP 地址
    pub fn connect(host: &str, port: u16) -> Result<Context> {
        Context::connect_with_options(&Options::tcp(host, port))
    }

    /// 以阻塞模式连接到 unix 域套接字
    pub fn connect_unix(path: impl Into<std::path::PathBuf>) -> Result<Context> {
        Context::connect_with_options(&Options::unix(path))
    }

    /// 按给定的选项建立连接
    #[instrument(skip_all)]
    pub fn connect_with_options(options: &Options) -> Result<Context> {
        if options.endpoint.is_none() {
            return Err(Error::new(ErrorKind::Other, "No endpoint to connect to"));
        }

        let mut context = Context::new(None, !options.nonblocking, options.clone());
        context.open()?;

        Ok(context)
    }

    /// 在已经建立的传输上创建上下文。
    ///
    /// 这样的上下文没有保存连接目标，无法重连。
    pub fn with_transport<T: Transport + 'static>(transport: T, blocking: bool) -> Context {
        let options = Options {
            nonblocking: !blocking,
            ..Options::default()
        };

        Context::new(Some(Box::new(transport)), blocking, options)
    }

    fn new(transport: Option<Box<dyn Transport>>, blocking: bool, options: Options) -> Context {
        let reader = new_reader(&options);

        Context {
            obuf: BytesMut::new(),
            reader,
            transport,
            err: None,
            state: State::Connected,
            blocking,
            options,
            push_handler: None,
        }
    }

    /// 按保存的选项打开传输
    fn open(&mut self) -> Result<()> {
        let endpoint = match &self.options.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => {
                return Err(self.set_error(Error::new(
                    ErrorKind::Other,
                    "Not enough information to reconnect",
                )))
            }
        };

        let (transport, connected) =
            net::connect(&endpoint, &self.options).map_err(|err| self.set_error(err))?;

        self.transport = Some(Box::new(transport));
        self.state = if connected {
            State::Connected
        } else {
            State::Connecting
        };

        debug!(%endpoint, connected, "connection opened");

        if self.blocking {
            if let Some(timeout) = self.options.command_timeout {
                self.set_timeout(timeout)?;
            }
        }

        Ok(())
    }

    /// 追加已经编码好的命令，字节按原样发送
    pub fn append_formatted_command(&mut self, cmd: &[u8]) -> Result<()> {
        self.check_error()?;
        self.obuf.extend_from_slice(cmd);
        Ok(())
    }

    /// 按格式字符串编码命令并追加到输出缓冲区，不进行任何 I/O
    pub fn append_command(&mut self, fmt: &str, args: &[Arg]) -> Result<()> {
        self.check_error()?;

        let cmd = format::try_format_command(fmt, args).map_err(|err| self.set_error(err.into()))?;
        self.append_formatted_command(&cmd)
    }

    /// 按参数数组编码命令并追加到输出缓冲区
    pub fn append_command_argv<A: AsRef<[u8]>>(
        &mut self,
        argv: &[A],
        argvlen: Option<&[usize]>,
    ) -> Result<()> {
        self.check_error()?;

        let cmd = format::format_command_argv(argv, argvlen)
            .map_err(|err| self.set_error(err.into()))?;
        self.append_formatted_command(&cmd)
    }

    /// 追加一条命令并等待它的回复。
    ///
    /// 非阻塞模式下只追加命令，返回 `Ok(None)`。
    pub fn command(&mut self, fmt: &str, args: &[Arg]) -> Result<Option<Reply>> {
        self.append_command(fmt, args)?;
        self.reply_if_blocking()
    }

    pub fn command_argv<A: AsRef<[u8]>>(
        &mut self,
        argv: &[A],
        argvlen: Option<&[usize]>,
    ) -> Result<Option<Reply>> {
        self.append_command_argv(argv, argvlen)?;
        self.reply_if_blocking()
    }

    fn reply_if_blocking(&mut self) -> Result<Option<Reply>> {
        if !self.blocking {
            return Ok(None);
        }

        self.get_reply()
    }

    /// 把输出缓冲区中尽可能多的字节写给传输层。
    ///
    /// 缓冲区完全写空时返回 `true`。
    pub fn buffer_write(&mut self) -> Result<bool> {
        self.check_error()?;

        if self.state == State::Connecting && !self.check_connect_done()? {
            return Ok(false);
        }

        if !self.obuf.is_empty() {
            let res = match self.transport.as_mut() {
                Some(transport) => transport.write(&self.obuf),
                None => return Err(self.not_connected()),
            };

            match res {
                Ok(n) if n == self.obuf.len() => {
                    // 整体写完后换一个新的空缓冲区
                    self.obuf = BytesMut::new();
                    trace!(written = n, "output buffer drained");
                }
                Ok(n) => {
                    self.obuf.advance(n);
                    trace!(written = n, remaining = self.obuf.len(), "partial write");
                }
                Err(err) if self.is_retryable(&err) => {}
                Err(err) if is_timeout(&err) => {
                    return Err(self.set_error(Error::new(ErrorKind::Timeout, "send timeout")))
                }
                Err(err) => return Err(self.set_error(err.into())),
            }
        }

        Ok(self.obuf.is_empty())
    }

    /// 从传输层读取一次，并把读到的字节交给读取器
    pub fn buffer_read(&mut self) -> Result<()> {
        self.check_error()?;

        let mut buf = [0u8; READ_BUF_SIZE];

        let res = match self.transport.as_mut() {
            Some(transport) => transport.read(&mut buf),
            None => return Err(self.not_connected()),
        };

        let n = match res {
            Ok(0) => {
                return Err(self.set_error(Error::new(
                    ErrorKind::Io,
                    "Server closed the connection",
                )))
            }
            Ok(n) => n,
            Err(err) if self.is_retryable(&err) => return Ok(()),
            Err(err) if is_timeout(&err) => {
                return Err(self.set_error(Error::new(ErrorKind::Timeout, "recv timeout")))
            }
            Err(err) => return Err(self.set_error(err.into())),
        };

        trace!(read = n, "buffer read");
        self.reader.feed(&buf[..n]).map_err(|err| self.set_error(err))
    }

    /// 从读取器中取出一个已经完整的回复，不进行 I/O
    pub fn get_reply_from_reader(&mut self) -> Result<Option<Reply>> {
        self.reader.get_reply().map_err(|err| self.set_error(err))
    }

    /// 取出下一个不是推送消息的回复，推送消息交给处理函数
    fn next_in_band_reply(&mut self) -> Result<Option<Reply>> {
        loop {
            let reply = match self.get_reply_from_reader()? {
                Some(reply) => reply,
                None => return Ok(None),
            };

            match &mut self.push_handler {
                Some(handler) if reply.is_push() => {
                    trace!("dispatching push message");
                    handler(reply);
                }
                _ => return Ok(Some(reply)),
            }
        }
    }

    /// 取出下一个回复。
    ///
    /// 如果已经有解析完成的回复就直接返回。否则在阻塞模式下先写出全部待发送的命令，再不断读取直到得到一个回复；
    /// 在非阻塞模式下不进行任何 I/O，返回 `Ok(None)`。
    pub fn get_reply(&mut self) -> Result<Option<Reply>> {
        if let Some(reply) = self.next_in_band_reply()? {
            return Ok(Some(reply));
        }

        if !self.blocking {
            return Ok(None);
        }

        while !self.buffer_write()? {}

        loop {
            self.buffer_read()?;

            if let Some(reply) = self.next_in_band_reply()? {
                return Ok(Some(reply));
            }
        }
    }

    /// 重新建立连接。
    ///
    /// 清除锁定的错误，关闭旧的传输，重建输出缓冲区和读取器，再按保存的选项连接。
    #[instrument(skip(self))]
    pub fn reconnect(&mut self) -> Result<()> {
        self.err = None;
        self.state = State::Connected;
        self.close_transport();
        self.obuf = BytesMut::new();
        self.reader = new_reader(&self.options);

        self.open()?;
        debug!("reconnected");

        Ok(())
    }

    /// 设置读写超时，只能用于阻塞模式的连接
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if !self.blocking {
            return Err(Error::new(
                ErrorKind::Other,
                "Timeouts can only be set on blocking contexts",
            ));
        }

        self.with_transport_option(|transport| transport.set_timeout(Some(timeout)))?;
        self.options.command_timeout = Some(timeout);

        Ok(())
    }

    pub fn enable_keepalive(&mut self) -> Result<()> {
        self.enable_keepalive_with_interval(DEFAULT_KEEPALIVE_INTERVAL)
    }

    pub fn enable_keepalive_with_interval(&mut self, interval: Duration) -> Result<()> {
        self.with_transport_option(|transport| transport.set_keepalive(interval))
    }

    pub fn set_tcp_user_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.with_transport_option(|transport| transport.set_tcp_user_timeout(timeout))
    }

    fn with_transport_option<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Transport) -> io::Result<()>,
    {
        let res = match self.transport.as_mut() {
            Some(transport) => f(transport.as_mut()),
            None => return Err(self.not_connected()),
        };

        res.map_err(|err| self.set_error(err.into()))
    }

    /// 检查非阻塞连接是否已经完成
    pub fn check_connect_done(&mut self) -> Result<bool> {
        if self.state == State::Connected {
            return Ok(true);
        }

        self.check_error()?;

        let res = match self.transport.as_mut() {
            Some(transport) => transport.connect_done(),
            None => return Err(self.not_connected()),
        };

        match res {
            Ok(true) => {
                self.state = State::Connected;
                debug!("connection established");
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(err) => Err(self.set_error(err.into())),
        }
    }

    /// 安装推送消息的处理函数，返回之前的处理函数
    pub fn set_push_handler<F>(&mut self, handler: F) -> Option<PushHandler>
    where
        F: FnMut(Reply) + Send + 'static,
    {
        self.push_handler.replace(Box::new(handler))
    }

    /// 移除推送消息的处理函数，之后推送消息作为普通回复返回
    pub fn clear_push_handler(&mut self) -> Option<PushHandler> {
        self.push_handler.take()
    }

    /// 锁定的错误
    pub fn error(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// 尚未写出的请求字节
    pub fn pending_output(&self) -> &[u8] {
        &self.obuf[..]
    }

    pub fn reader(&self) -> &Reader {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut Reader {
        &mut self.reader
    }

    /// 释放上下文但保留传输
    pub fn into_transport(mut self) -> Option<Box<dyn Transport>> {
        self.transport.take()
    }

    fn check_error(&self) -> Result<()> {
        match &self.err {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn set_error(&mut self, err: Error) -> Error {
        debug!(kind = %err.kind(), cause = %err, "context error");
        self.err = Some(err.clone());
        self.state = State::Error;
        err
    }

    fn not_connected(&mut self) -> Error {
        self.set_error(Error::new(ErrorKind::Io, "Not connected"))
    }

    /// 非阻塞模式下暂时不可读写，或者被信号打断
    fn is_retryable(&self, err: &io::Error) -> bool {
        (err.kind() == io::ErrorKind::WouldBlock && !self.blocking)
            || err.kind() == io::ErrorKind::Interrupted
    }

    fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(err) = transport.close() {
                warn!(cause = %err, "failed to close transport");
            }
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.close_transport();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Context")
            .field("state", &self.state)
            .field("blocking", &self.blocking)
            .field("err", &self.err)
            .field("pending_output", &self.obuf.len())
            .field("reader", &self.reader)
            .field("options", &self.options)
            .field("push_handler", &self.push_handler.is_some())
            .finish()
    }
}

fn new_reader(options: &Options) -> Reader {
    let mut reader = Reader::new();
    reader.set_max_elements(options.max_elements.unwrap_or(DEFAULT_MAX_ELEMENTS));
    reader.set_max_buf(options.max_buf.unwrap_or(DEFAULT_MAX_BUF));
    reader
}

/// 阻塞套接字上读写超时表现为 `WouldBlock` 或 `TimedOut`
fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
