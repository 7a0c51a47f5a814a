//! 客户端核心使用的错误类型。
//!
//! 所有可失败的操作都返回一个 [`Error`]，它由一个 [`ErrorKind`] 和一段可读的消息组成。消息长度有上限，
//! 与上下文中保存的固定长度错误缓冲区一致。
use std::fmt;
use std::io;

/// 错误消息的最大字节数（不含结尾）。
pub const MAX_ERROR_LEN: usize = 127;

/// 错误的分类。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 传输层失败，包括对端关闭连接。
    Io,
    /// 其他错误，例如没有足够的信息进行重连。
    Other,
    /// 收到的字节不符合协议。
    Protocol,
    /// 内存分配失败。
    OutOfMemory,
    /// 读写超时。
    Timeout,
    /// 命令格式字符串无效。
    Format,
}

/// 带有分类和消息的错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// 创建一个新的错误，超长的消息会在字符边界处截断。
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Error {
        let mut message = message.into();

        if message.len() > MAX_ERROR_LEN {
            let mut end = MAX_ERROR_LEN;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }

        Error { kind, message }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Error {
        Error::new(ErrorKind::Protocol, message)
    }

    pub(crate) fn out_of_memory() -> Error {
        Error::new(ErrorKind::OutOfMemory, "Out of memory")
    }

    /// 返回错误的分类
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 返回错误消息
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for Error {
    fn from(src: io::Error) -> Error {
        let kind = match src.kind() {
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            io::ErrorKind::OutOfMemory => ErrorKind::OutOfMemory,
            _ => ErrorKind::Io,
        };

        Error::new(kind, src.to_string())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ErrorKind::Io => "I/O error",
            ErrorKind::Other => "error",
            ErrorKind::Protocol => "protocol error",
            ErrorKind::OutOfMemory => "out of memory",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Format => "format error",
        };

        name.fmt(fmt)
    }
}
