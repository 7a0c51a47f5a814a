//! 增量式的回复读取器。
//!
//! 字节可以按任意大小分批喂给 [`Reader`]，每次调用 [`Reader::get_reply`] 最多返回一个完整的顶层回复。
//! 对于未完成的聚合回复，读取器在内部保存一个待填充节点的栈，下一批字节到达后从中断处继续。
//!
//! 一旦出现协议错误，读取器就进入错误状态：缓冲区和未完成的节点全部丢弃，之后每次调用都返回同一个错误。
use crate::reply::{Reply, ReplyKind};
use crate::Error;

use atoi::FromRadix10SignedChecked;
use bytes::{Buf, Bytes, BytesMut};
use std::fmt;
use std::mem;

/// 空闲时输入缓冲区允许保留的最大容量，超过后会被释放
pub const DEFAULT_MAX_BUF: usize = 16 * 1024;

/// 单个聚合回复允许的最大元素个数
pub const DEFAULT_MAX_ELEMENTS: usize = u32::MAX as usize;

// 浮点数文本长度必须小于该值
const MAX_DOUBLE_LEN: usize = 326;

/// 正在构造的一个回复在树中的位置。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadTask {
    /// 线路上的类型
    pub kind: ReplyKind,
    /// 聚合回复的子节点个数（映射为键值对数的两倍），其它回复为 0
    pub elements: usize,
    /// 在父节点中的下标
    pub idx: usize,
    /// 父节点的种类，顶层回复为 `None`
    pub parent: Option<ReplyKind>,
    /// 嵌套深度，顶层为 0
    pub depth: usize,
}

/// 由读取器调用、用于构造回复对象的一组函数。
///
/// 返回 `None` 表示分配失败，读取器会以 "Out of memory" 进入错误状态。未完成的节点在出错时随读取器的栈一起释放。
pub trait ReplyBuilder {
    type Reply;

    /// 状态、错误、批量字符串、带格式字符串和大数。`data` 是线路上的原始内容。
    fn create_string(&mut self, task: &ReadTask, data: &[u8]) -> Option<Self::Reply>;

    /// 创建一个可容纳 `elements` 个子节点的聚合回复
    fn create_array(&mut self, task: &ReadTask, elements: usize) -> Option<Self::Reply>;

    fn create_integer(&mut self, task: &ReadTask, value: i64) -> Option<Self::Reply>;

    fn create_double(&mut self, task: &ReadTask, value: f64, text: &[u8]) -> Option<Self::Reply>;

    fn create_nil(&mut self, task: &ReadTask) -> Option<Self::Reply>;

    fn create_bool(&mut self, task: &ReadTask, value: bool) -> Option<Self::Reply>;

    /// 把已经完成的 `child` 放到 `parent` 的第 `task.idx` 个位置
    fn attach(&mut self, parent: &mut Self::Reply, task: &ReadTask, child: Self::Reply);
}

/// 构造 [`Reply`] 树的默认实现。
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBuilder;

impl ReplyBuilder for DefaultBuilder {
    type Reply = Reply;

    fn create_string(&mut self, task: &ReadTask, data: &[u8]) -> Option<Reply> {
        let reply = match task.kind {
            ReplyKind::Status => Reply::Status(Bytes::copy_from_slice(data)),
            ReplyKind::Error => Reply::Error(Bytes::copy_from_slice(data)),
            ReplyKind::BigNumber => Reply::BigNumber(Bytes::copy_from_slice(data)),
            ReplyKind::Verbatim => {
                // `txt:` 之后才是数据
                let format = data.get(..3)?;
                Reply::Verbatim {
                    format: [format[0], format[1], format[2]],
                    data: Bytes::copy_from_slice(data.get(4..)?),
                }
            }
            _ => Reply::String(Bytes::copy_from_slice(data)),
        };

        Some(reply)
    }

    fn create_array(&mut self, task: &ReadTask, elements: usize) -> Option<Reply> {
        // 元素个数为 0 时不分配
        let mut children = Vec::new();
        children.try_reserve_exact(elements).ok()?;

        let reply = match task.kind {
            ReplyKind::Map => Reply::Map(children),
            ReplyKind::Set => Reply::Set(children),
            ReplyKind::Push => Reply::Push(children),
            ReplyKind::Attribute => Reply::Attribute(children),
            _ => Reply::Array(children),
        };

        Some(reply)
    }

    fn create_integer(&mut self, _task: &ReadTask, value: i64) -> Option<Reply> {
        Some(Reply::Integer(value))
    }

    fn create_double(&mut self, _task: &ReadTask, value: f64, text: &[u8]) -> Option<Reply> {
        Some(Reply::Double {
            value,
            text: Bytes::copy_from_slice(text),
        })
    }

    fn create_nil(&mut self, _task: &ReadTask) -> Option<Reply> {
        Some(Reply::Nil)
    }

    fn create_bool(&mut self, _task: &ReadTask, value: bool) -> Option<Reply> {
        Some(Reply::Bool(value))
    }

    fn attach(&mut self, parent: &mut Reply, _task: &ReadTask, child: Reply) {
        if let Some(children) = parent.children_mut() {
            children.push(child);
        }
    }
}

/// 只记录回复种类的构造器，不保存任何数据。
///
/// 适合只关心回复是否到达、以及到达的是什么类型的场景。
#[derive(Debug, Default, Clone, Copy)]
pub struct KindBuilder;

impl ReplyBuilder for KindBuilder {
    type Reply = ReplyKind;

    fn create_string(&mut self, task: &ReadTask, _data: &[u8]) -> Option<ReplyKind> {
        Some(task.kind)
    }

    fn create_array(&mut self, task: &ReadTask, _elements: usize) -> Option<ReplyKind> {
        Some(task.kind)
    }

    fn create_integer(&mut self, _task: &ReadTask, _value: i64) -> Option<ReplyKind> {
        Some(ReplyKind::Integer)
    }

    fn create_double(&mut self, _task: &ReadTask, _value: f64, _text: &[u8]) -> Option<ReplyKind> {
        Some(ReplyKind::Double)
    }

    fn create_nil(&mut self, _task: &ReadTask) -> Option<ReplyKind> {
        Some(ReplyKind::Nil)
    }

    fn create_bool(&mut self, _task: &ReadTask, _value: bool) -> Option<ReplyKind> {
        Some(ReplyKind::Bool)
    }

    fn attach(&mut self, _parent: &mut ReplyKind, _task: &ReadTask, _child: ReplyKind) {}
}

/// 一个尚未填满的聚合回复
struct Pending<R> {
    task: ReadTask,
    obj: R,
    filled: usize,
}

/// 处理一个条目之后的结果
enum Step<R> {
    /// 缓冲区中的字节不足以组成下一个条目
    Incomplete,
    /// 消费了一个条目，但顶层回复还没有完成
    Progress,
    /// 顶层回复已经完成
    Done(R),
}

/// 增量式的 RESP 回复解析器。
pub struct Reader<B: ReplyBuilder = DefaultBuilder> {
    // 尚未消费的输入
    buf: BytesMut,

    // 从外到内排列的未完成聚合回复
    stack: Vec<Pending<B::Reply>>,

    // 出错后锁定的错误
    err: Option<Error>,

    // 自上次释放以来缓冲区达到的最大长度
    high_water: usize,

    max_buf: usize,

    max_elements: usize,

    builder: B,
}

impl Reader {
    /// 创建一个构造 [`Reply`] 的读取器
    pub fn new() -> Reader {
        Reader::with_builder(DefaultBuilder)
    }
}

impl Default for Reader {
    fn default() -> Reader {
        Reader::new()
    }
}

impl<B: ReplyBuilder> Reader<B> {
    /// 使用自定义的构造器创建读取器
    pub fn with_builder(builder: B) -> Reader<B> {
        Reader {
            buf: BytesMut::new(),
            stack: Vec::new(),
            err: None,
            high_water: 0,
            max_buf: DEFAULT_MAX_BUF,
            max_elements: DEFAULT_MAX_ELEMENTS,
            builder,
        }
    }

    /// 追加收到的字节。
    ///
    /// 读取器处于错误状态时返回该错误，输入被丢弃。
    pub fn feed(&mut self, data: &[u8]) -> Result<(), Error> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }

        if data.is_empty() {
            return Ok(());
        }

        // 缓冲区已经清空且曾经增长得过大时，换一个新的
        if self.buf.is_empty() && self.max_buf != 0 && self.high_water > self.max_buf {
            self.buf = BytesMut::new();
            self.high_water = 0;
        }

        self.buf.extend_from_slice(data);
        self.high_water = self.high_water.max(self.buf.len());
        Ok(())
    }

    /// 尝试取出一个完整的顶层回复。
    ///
    /// 数据不足时返回 `Ok(None)`，已经解析的部分会被保留。
    pub fn get_reply(&mut self) -> Result<Option<B::Reply>, Error> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }

        loop {
            match self.process_item() {
                Ok(Step::Done(reply)) => return Ok(Some(reply)),
                Ok(Step::Progress) => continue,
                Ok(Step::Incomplete) => return Ok(None),
                Err(err) => return Err(self.poison(err)),
            }
        }
    }

    /// 读取器锁定的错误
    pub fn error(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    /// 尚未消费的字节
    pub fn buffered(&self) -> &[u8] {
        &self.buf[..]
    }

    pub fn max_buf(&self) -> usize {
        self.max_buf
    }

    /// 设置空闲缓冲区允许保留的最大容量，0 表示不限制
    pub fn set_max_buf(&mut self, max_buf: usize) {
        self.max_buf = max_buf;
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    /// 设置单个聚合回复的元素上限，0 表示不限制
    pub fn set_max_elements(&mut self, max_elements: usize) {
        self.max_elements = max_elements;
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    pub fn builder_mut(&mut self) -> &mut B {
        &mut self.builder
    }

    #[cfg(test)]
    fn pending_depth(&self) -> usize {
        self.stack.len()
    }

    fn poison(&mut self, err: Error) -> Error {
        self.stack.clear();
        self.buf = BytesMut::new();
        self.high_water = 0;
        self.err = Some(err.clone());
        err
    }

    /// 解析缓冲区开头的一个条目。
    ///
    /// 每个条目要么完整地被消费，要么完全不动。
    fn process_item(&mut self) -> Result<Step<B::Reply>, Error> {
        let byte = match self.buf.first() {
            Some(&byte) => byte,
            None => return Ok(Step::Incomplete),
        };

        let kind = ReplyKind::from_type_byte(byte).ok_or_else(|| {
            Error::protocol(format!(
                "Protocol error, got {} as reply type byte",
                quote_byte(byte)
            ))
        })?;

        let task = self.next_task(kind);

        match kind {
            ReplyKind::String | ReplyKind::Verbatim => self.process_bulk_item(task),
            kind if kind.is_aggregate() => self.process_aggregate_item(task),
            _ => self.process_line_item(task),
        }
    }

    fn next_task(&self, kind: ReplyKind) -> ReadTask {
        match self.stack.last() {
            Some(parent) => ReadTask {
                kind,
                elements: 0,
                idx: parent.filled,
                parent: Some(parent.task.kind),
                depth: self.stack.len(),
            },
            None => ReadTask {
                kind,
                elements: 0,
                idx: 0,
                parent: None,
                depth: 0,
            },
        }
    }

    fn process_line_item(&mut self, task: ReadTask) -> Result<Step<B::Reply>, Error> {
        let end = match seek_newline(&self.buf[1..]) {
            Some(end) => end,
            None => return Ok(Step::Incomplete),
        };

        let obj = {
            let line = &self.buf[1..1 + end];

            match task.kind {
                ReplyKind::Integer => {
                    let value =
                        parse_integer(line).ok_or_else(|| Error::protocol("Bad integer value"))?;
                    self.builder.create_integer(&task, value)
                }
                ReplyKind::Double => {
                    let value = parse_double(line)?;
                    self.builder.create_double(&task, value, line)
                }
                ReplyKind::Nil => {
                    if !line.is_empty() {
                        return Err(Error::protocol("Bad nil value"));
                    }
                    self.builder.create_nil(&task)
                }
                ReplyKind::Bool => {
                    let value = match line {
                        b"t" => true,
                        b"f" => false,
                        _ => return Err(Error::protocol("Bad bool value")),
                    };
                    self.builder.create_bool(&task, value)
                }
                ReplyKind::BigNumber => {
                    if !is_bignum(line) {
                        return Err(Error::protocol("Bad bignum value"));
                    }
                    self.builder.create_string(&task, line)
                }
                _ => {
                    if line.iter().any(|&b| b == b'\r' || b == b'\n') {
                        return Err(Error::protocol("Bad simple string value"));
                    }
                    self.builder.create_string(&task, line)
                }
            }
        };

        let obj = obj.ok_or_else(Error::out_of_memory)?;
        self.buf.advance(1 + end + 2);

        Ok(self.complete(obj, task))
    }

    fn process_bulk_item(&mut self, task: ReadTask) -> Result<Step<B::Reply>, Error> {
        let end = match seek_newline(&self.buf[1..]) {
            Some(end) => end,
            None => return Ok(Step::Incomplete),
        };

        let len = parse_integer(&self.buf[1..1 + end])
            .ok_or_else(|| Error::protocol("Bad bulk string length"))?;
        let header = 1 + end + 2;

        if len < -1 {
            return Err(Error::protocol("Bulk string length out of range"));
        }

        if len == -1 {
            let obj = self
                .builder
                .create_nil(&task)
                .ok_or_else(Error::out_of_memory)?;
            self.buf.advance(header);
            return Ok(self.complete(obj, task));
        }

        let len = usize::try_from(len)
            .map_err(|_| Error::protocol("Bulk string length out of range"))?;
        let total = header
            .checked_add(len)
            .and_then(|n| n.checked_add(2))
            .ok_or_else(|| Error::protocol("Bulk string length out of range"))?;

        if self.buf.len() < total {
            return Ok(Step::Incomplete);
        }

        let obj = {
            let data = &self.buf[header..header + len];

            if task.kind == ReplyKind::Verbatim && (len < 4 || data[3] != b':') {
                return Err(Error::protocol(
                    "Verbatim string 4 bytes of content type are missing or incorrectly encoded.",
                ));
            }

            self.builder.create_string(&task, data)
        };

        let obj = obj.ok_or_else(Error::out_of_memory)?;
        self.buf.advance(total);

        Ok(self.complete(obj, task))
    }

    fn process_aggregate_item(&mut self, task: ReadTask) -> Result<Step<B::Reply>, Error> {
        let end = match seek_newline(&self.buf[1..]) {
            Some(end) => end,
            None => return Ok(Step::Incomplete),
        };

        let len = parse_integer(&self.buf[1..1 + end])
            .ok_or_else(|| Error::protocol("Bad multi-bulk length"))?;
        let header = 1 + end + 2;

        if len < -1 {
            return Err(Error::protocol("Multi-bulk length out of range"));
        }

        if len == -1 {
            let obj = self
                .builder
                .create_nil(&task)
                .ok_or_else(Error::out_of_memory)?;
            self.buf.advance(header);
            return Ok(self.complete(obj, task));
        }

        let count = usize::try_from(len)
            .map_err(|_| Error::protocol("Multi-bulk length out of range"))?;

        if self.max_elements > 0 && count > self.max_elements {
            return Err(Error::protocol("Multi-bulk length out of range"));
        }

        let elements = match task.kind {
            ReplyKind::Map | ReplyKind::Attribute => count
                .checked_mul(2)
                .ok_or_else(|| Error::protocol("Multi-bulk length out of range"))?,
            _ => count,
        };

        // 子节点指针数组的字节数必须能够表示
        if elements.checked_mul(mem::size_of::<usize>()).is_none() {
            return Err(Error::out_of_memory());
        }

        let task = ReadTask { elements, ..task };
        let obj = self
            .builder
            .create_array(&task, elements)
            .ok_or_else(Error::out_of_memory)?;
        self.buf.advance(header);

        if elements == 0 {
            return Ok(self.complete(obj, task));
        }

        self.stack.push(Pending {
            task,
            obj,
            filled: 0,
        });

        Ok(Step::Progress)
    }

    /// 把刚完成的节点挂到父节点上，父节点填满后继续向上传递
    fn complete(&mut self, mut obj: B::Reply, mut task: ReadTask) -> Step<B::Reply> {
        loop {
            let parent = match self.stack.last_mut() {
                Some(parent) => parent,
                None => return Step::Done(obj),
            };

            self.builder.attach(&mut parent.obj, &task, obj);
            parent.filled += 1;

            if parent.filled < parent.task.elements {
                return Step::Progress;
            }

            let done = match self.stack.pop() {
                Some(done) => done,
                None => return Step::Progress,
            };

            task = done.task;
            obj = done.obj;
        }
    }
}

impl<B: ReplyBuilder> fmt::Debug for Reader<B> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Reader")
            .field("buffered", &self.buf.len())
            .field("depth", &self.stack.len())
            .field("err", &self.err)
            .field("max_buf", &self.max_buf)
            .field("max_elements", &self.max_elements)
            .finish()
    }
}

/// 返回第一个 `\r\n` 中 `\r` 的下标
fn seek_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// 严格解析一个有符号十进制整数。
///
/// 只接受 `0`，或者可选的 `-` 后跟不以 `0` 开头的数字串；不允许其它字符，溢出视为无效。
fn parse_integer(line: &[u8]) -> Option<i64> {
    if line == b"0" {
        return Some(0);
    }

    let digits = line.strip_prefix(b"-").unwrap_or(line);
    match digits.first() {
        Some(b'1'..=b'9') => {}
        _ => return None,
    }
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }

    match i64::from_radix_10_signed_checked(line) {
        (Some(value), used) if used == line.len() => Some(value),
        _ => None,
    }
}

fn parse_double(line: &[u8]) -> Result<f64, Error> {
    if line.len() >= MAX_DOUBLE_LEN {
        return Err(Error::protocol("Double value is too large"));
    }

    if line.eq_ignore_ascii_case(b"inf") {
        return Ok(f64::INFINITY);
    }
    if line.eq_ignore_ascii_case(b"-inf") {
        return Ok(f64::NEG_INFINITY);
    }
    if line.eq_ignore_ascii_case(b"nan") || line.eq_ignore_ascii_case(b"-nan") {
        return Ok(f64::NAN);
    }

    std::str::from_utf8(line)
        .ok()
        .and_then(|text| text.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .ok_or_else(|| Error::protocol("Bad double value"))
}

fn is_bignum(line: &[u8]) -> bool {
    let digits = line.strip_prefix(b"-").unwrap_or(line);
    !digits.is_empty() && digits.iter().all(u8::is_ascii_digit)
}

/// 把类型字节转成带引号的可读形式，用于错误消息
fn quote_byte(byte: u8) -> String {
    match byte {
        b'\\' | b'"' => format!("\"\\{}\"", byte as char),
        b'\n' => "\"\\n\"".to_string(),
        b'\r' => "\"\\r\"".to_string(),
        b'\t' => "\"\\t\"".to_string(),
        0x07 => "\"\\a\"".to_string(),
        0x08 => "\"\\b\"".to_string(),
        b' '..=b'~' => format!("\"{}\"", byte as char),
        _ => format!("\"\\x{:02x}\"", byte),
    }
}
