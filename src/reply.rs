//! 提供表示 RESP2 / RESP3 回复的类型。
//!
//! 回复是一棵树：聚合类型独占其子节点，不存在共享或反向引用。释放一个回复会释放它的所有后代，
//! 恰好一次。析构是迭代进行的，因此任意深度的嵌套都不会耗尽调用栈。
use bytes::Bytes;
use std::fmt::{self, Display};
use std::mem;
use std::str;

/// 服务器的一个回复。
///
/// `Map` 和 `Attribute` 的子节点按 `键, 值, 键, 值, ...` 的顺序平铺存放，因此其元素个数是键值对数的两倍。
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// `+` 状态回复
    Status(Bytes),
    /// `-` 错误回复
    Error(Bytes),
    /// `$` 批量字符串
    String(Bytes),
    /// `:` 整数
    Integer(i64),
    /// `,` 浮点数，同时保留服务器发送的原始文本
    Double { value: f64, text: Bytes },
    /// `_`，以及 RESP2 中长度为 -1 的批量字符串或数组
    Nil,
    /// `#` 布尔值
    Bool(bool),
    /// `=` 带格式的字符串，`format` 是 3 字节的类型标签（例如 `txt`）
    Verbatim { format: [u8; 3], data: Bytes },
    /// `(` 大数，按原样保存的十进制文本
    BigNumber(Bytes),
    /// `*` 数组
    Array(Vec<Reply>),
    /// `%` 映射
    Map(Vec<Reply>),
    /// `~` 集合
    Set(Vec<Reply>),
    /// `>` 推送消息
    Push(Vec<Reply>),
    /// `|` 属性
    Attribute(Vec<Reply>),
}

/// 回复的种类，不携带数据。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    Status,
    Error,
    String,
    Integer,
    Double,
    Nil,
    Bool,
    Verbatim,
    BigNumber,
    Array,
    Map,
    Set,
    Push,
    Attribute,
}

impl ReplyKind {
    /// 根据类型字节返回对应的种类，未知的字节返回 `None`
    pub fn from_type_byte(byte: u8) -> Option<ReplyKind> {
        let kind = match byte {
            b'+' => ReplyKind::Status,
            b'-' => ReplyKind::Error,
            b'$' => ReplyKind::String,
            b':' => ReplyKind::Integer,
            b',' => ReplyKind::Double,
            b'_' => ReplyKind::Nil,
            b'#' => ReplyKind::Bool,
            b'=' => ReplyKind::Verbatim,
            b'(' => ReplyKind::BigNumber,
            b'*' => ReplyKind::Array,
            b'%' => ReplyKind::Map,
            b'~' => ReplyKind::Set,
            b'>' => ReplyKind::Push,
            b'|' => ReplyKind::Attribute,
            _ => return None,
        };

        Some(kind)
    }

    /// 聚合类型（包含子回复）返回 `true`
    pub fn is_aggregate(self) -> bool {
        matches!(
            self,
            ReplyKind::Array
                | ReplyKind::Map
                | ReplyKind::Set
                | ReplyKind::Push
                | ReplyKind::Attribute
        )
    }
}

impl Reply {
    /// 返回回复的种类
    pub fn kind(&self) -> ReplyKind {
        match self {
            Reply::Status(_) => ReplyKind::Status,
            Reply::Error(_) => ReplyKind::Error,
            Reply::String(_) => ReplyKind::String,
            Reply::Integer(_) => ReplyKind::Integer,
            Reply::Double { .. } => ReplyKind::Double,
            Reply::Nil => ReplyKind::Nil,
            Reply::Bool(_) => ReplyKind::Bool,
            Reply::Verbatim { .. } => ReplyKind::Verbatim,
            Reply::BigNumber(_) => ReplyKind::BigNumber,
            Reply::Array(_) => ReplyKind::Array,
            Reply::Map(_) => ReplyKind::Map,
            Reply::Set(_) => ReplyKind::Set,
            Reply::Push(_) => ReplyKind::Push,
            Reply::Attribute(_) => ReplyKind::Attribute,
        }
    }

    /// 是否为带外的推送消息
    pub fn is_push(&self) -> bool {
        matches!(self, Reply::Push(_))
    }

    /// 是否为错误回复
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// 字符串类回复的字节内容。
    ///
    /// 对 `Double` 返回原始文本，对 `Verbatim` 返回去掉类型标签后的数据。
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::Status(b) | Reply::Error(b) | Reply::String(b) | Reply::BigNumber(b) => Some(b),
            Reply::Verbatim { data, .. } => Some(data),
            Reply::Double { text, .. } => Some(text),
            _ => None,
        }
    }

    /// 以 UTF-8 字符串形式返回字符串类回复
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| str::from_utf8(b).ok())
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Reply::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Reply::Double { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// 聚合回复的子节点；其它回复返回空切片。
    pub fn elements(&self) -> &[Reply] {
        match self {
            Reply::Array(v) | Reply::Map(v) | Reply::Set(v) | Reply::Push(v) | Reply::Attribute(v) => v,
            _ => &[],
        }
    }

    /// 按键值对遍历 `Map` / `Attribute` 的子节点
    pub fn pairs(&self) -> impl Iterator<Item = (&Reply, &Reply)> {
        let elements = match self {
            Reply::Map(v) | Reply::Attribute(v) => &v[..],
            _ => &[],
        };

        elements.chunks_exact(2).map(|pair| (&pair[0], &pair[1]))
    }

    /// 取出聚合回复的子节点；其它回复返回空的 `Vec`。
    pub fn into_elements(mut self) -> Vec<Reply> {
        self.children_mut().map(mem::take).unwrap_or_default()
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<Reply>> {
        match self {
            Reply::Array(v) | Reply::Map(v) | Reply::Set(v) | Reply::Push(v) | Reply::Attribute(v) => Some(v),
            _ => None,
        }
    }

    fn fmt_indented(&self, fmt: &mut fmt::Formatter, indent: usize) -> fmt::Result {
        match self {
            Reply::Status(msg) => write_bytes(fmt, msg),
            Reply::Error(msg) => {
                write!(fmt, "(error) ")?;
                write_bytes(fmt, msg)
            }
            Reply::String(msg) => match str::from_utf8(msg) {
                Ok(string) => write!(fmt, "\"{}\"", string.escape_debug()),
                Err(_) => write!(fmt, "{:?}", msg),
            },
            Reply::Integer(num) => write!(fmt, "(integer) {}", num),
            Reply::Double { text, .. } => {
                write!(fmt, "(double) ")?;
                write_bytes(fmt, text)
            }
            Reply::Nil => "(nil)".fmt(fmt),
            Reply::Bool(true) => "(true)".fmt(fmt),
            Reply::Bool(false) => "(false)".fmt(fmt),
            Reply::Verbatim { data, .. } => write_bytes(fmt, data),
            Reply::BigNumber(num) => {
                write!(fmt, "(big number) ")?;
                write_bytes(fmt, num)
            }
            Reply::Map(parts) | Reply::Attribute(parts) => {
                if parts.is_empty() {
                    return "(empty hash)".fmt(fmt);
                }

                for (i, pair) in parts.chunks(2).enumerate() {
                    let label = format!("{}# ", i + 1);
                    if i > 0 {
                        write!(fmt, "\n{:indent$}", "", indent = indent)?;
                    }
                    fmt.write_str(&label)?;
                    pair[0].fmt_indented(fmt, indent + label.len())?;
                    if let Some(value) = pair.get(1) {
                        write!(fmt, " => ")?;
                        value.fmt_indented(fmt, indent + label.len())?;
                    }
                }

                Ok(())
            }
            Reply::Array(parts) | Reply::Set(parts) | Reply::Push(parts) => {
                if parts.is_empty() {
                    return "(empty array)".fmt(fmt);
                }

                for (i, part) in parts.iter().enumerate() {
                    let label = format!("{}) ", i + 1);
                    if i > 0 {
                        // 使用换行和缩进作为数组元素的显示分隔符
                        write!(fmt, "\n{:indent$}", "", indent = indent)?;
                    }
                    fmt.write_str(&label)?;
                    part.fmt_indented(fmt, indent + label.len())?;
                }

                Ok(())
            }
        }
    }
}

fn write_bytes(fmt: &mut fmt::Formatter, bytes: &[u8]) -> fmt::Result {
    match str::from_utf8(bytes) {
        Ok(string) => string.fmt(fmt),
        Err(_) => write!(fmt, "{:?}", bytes),
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        let mut pending = match self.children_mut() {
            Some(children) if !children.is_empty() => mem::take(children),
            _ => return,
        };

        // 把每个子节点的后代移到待释放列表中，子节点自身随即以空节点的形式被释放
        while let Some(mut child) = pending.pop() {
            if let Some(grandchildren) = child.children_mut() {
                pending.append(grandchildren);
            }
        }
    }
}

impl PartialEq<&str> for Reply {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == Some(other.as_bytes())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_indented(fmt, 0)
    }
}
