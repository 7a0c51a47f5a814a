//! 一个 RESP2 / RESP3 客户端核心。
//!
//! 该库负责协议的成帧和解析，以及在一条双向字节流上排列请求和回复，不包含任何具体的命令语义。
//!
//! # 布局
//!
//! 主要组件有：
//!
//! * `bulk`：计算批量字符串编码长度的辅助函数。
//!
//! * `format`：命令编码器。把格式字符串加参数，或者参数数组，编码成 RESP 多批量请求。
//!
//! * `reader`：增量式的回复读取器。接受任意切分的字节，产出完整的回复树；回复的构造可以通过 `ReplyBuilder` 替换。
//!
//! * `reply`：读取器默认产出的 `Reply` 类型。
//!
//! * `net`：传输层接口 `Transport`，以及基于套接字的实现。
//!
//! * `context`：一条连接。管理输出缓冲区、读取器、推送消息处理和重连。
//!
//! * `config`：从 TOML 文件加载连接选项。
//!
//! # 示例
//!
//! ```no_run
//! use mini_resp::Context;
//!
//! # fn main() -> mini_resp::Result<()> {
//! let mut ctx = Context::connect("127.0.0.1", mini_resp::DEFAULT_PORT)?;
//! ctx.append_command("SET %s %s", &["foo".into(), "bar".into()])?;
//! ctx.append_command("GET %s", &["foo".into()])?;
//!
//! let _ok = ctx.get_reply()?;
//! let value = ctx.get_reply()?;
//! println!("{:?}", value);
//! # Ok(())
//! # }
//! ```

pub mod bulk;

pub mod config;

pub mod context;
pub use context::{Context, Options, PushHandler, State};

mod error;
pub use error::{Error, ErrorKind, MAX_ERROR_LEN};

pub mod format;
pub use format::{format_command, format_command_argv, try_format_command, Arg, EncodeError};

pub mod net;
pub use net::{Endpoint, SocketTransport, Transport};

pub mod reader;
pub use reader::{DefaultBuilder, KindBuilder, ReadTask, Reader, ReplyBuilder};

pub mod reply;
pub use reply::{Reply, ReplyKind};

/// Redis 服务器监听的默认端口。
pub const DEFAULT_PORT: u16 = 6379;

/// 专门用于本库操作的 `Result` 类型。
///
/// 这是为了方便而定义的。
pub type Result<T> = std::result::Result<T, Error>;
