//! 将命令编码为 RESP 多批量请求。
//!
//! 支持两种输入：
//!
//! * 类似 printf 的格式字符串加上类型化的参数（[`Arg`]）。`%s` 插入一个字符串（遇到第一个 NUL 字节截止），
//!   `%b` 插入二进制安全的字节，`%%` 插入字面的 `%`。此外还支持一个封闭的数值转换子集：
//!   `d i o u x X`（可带 `hh h l ll` 长度修饰）和 `e E f F g G a A`，都可以带 `# 0 - + 空格` 标志、
//!   宽度和精度。其它转换（`%p`、`%lf`、`%Lf`、`*` 宽度……）都是格式错误。
//! * 显式的参数数组，可以附带每个参数的长度。
//!
//! 格式字符串中未被引用的空格分隔参数。只有当某个参数至少被追加过一次内容（或者一个 `%s` / `%b`
//! 转换，即使为空）之后它才会成为真正的参数，因此连续的空格不会产生空参数。
use crate::bulk::{bulk_len, multi_bulk_header_len};

use std::io::{Cursor, Write};
use std::slice;

/// 格式字符串的参数。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg<'a> {
    /// 用于 `%s`（以及 `%b`）
    Str(&'a str),
    /// 用于 `%b`（以及 `%s`）
    Bytes(&'a [u8]),
    /// 用于整数转换
    Int(i64),
    /// 用于整数转换
    Uint(u64),
    /// 用于浮点转换
    Double(f64),
}

/// 编码命令时可能出现的错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// 格式字符串中有不支持或不完整的转换，或者参数缺失、类型不匹配。
    #[error("Invalid format string")]
    InvalidFormat,

    /// 无法为命令分配内存。
    #[error("Out of memory")]
    OutOfMemory,

    /// 显式给出的参数长度与参数不一致。
    #[error("Argument lengths do not match the arguments")]
    LengthMismatch,
}

impl From<EncodeError> for crate::Error {
    fn from(src: EncodeError) -> crate::Error {
        use crate::ErrorKind;

        let kind = match src {
            EncodeError::OutOfMemory => ErrorKind::OutOfMemory,
            EncodeError::InvalidFormat | EncodeError::LengthMismatch => ErrorKind::Format,
        };

        crate::Error::new(kind, src.to_string())
    }
}

/// 按格式字符串编码一条命令。任何失败都返回 `None`。
///
/// 需要区分失败原因时使用 [`try_format_command`]。
///
/// ```
/// use mini_resp::format_command;
///
/// let cmd = format_command("SET foo bar", &[]).unwrap();
/// assert_eq!(&cmd[..], b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
/// ```
pub fn format_command(format: &str, args: &[Arg<'_>]) -> Option<Vec<u8>> {
    try_format_command(format, args).ok()
}

/// 按格式字符串编码一条命令，失败时区分格式错误和内存不足。
pub fn try_format_command(format: &str, args: &[Arg<'_>]) -> Result<Vec<u8>, EncodeError> {
    let fmt = format.as_bytes();
    let mut args = args.iter();

    let mut argv: Vec<Vec<u8>> = Vec::new();
    let mut curarg: Vec<u8> = Vec::new();
    let mut touched = false;
    let mut i = 0;

    while i < fmt.len() {
        let c = fmt[i];

        // 位于末尾的 '%' 按普通字符处理
        if c != b'%' || i + 1 == fmt.len() {
            if c == b' ' {
                if touched {
                    argv.try_reserve(1).map_err(|_| EncodeError::OutOfMemory)?;
                    argv.push(std::mem::take(&mut curarg));
                    touched = false;
                }
            } else {
                append(&mut curarg, &[c])?;
                touched = true;
            }

            i += 1;
            continue;
        }

        match fmt[i + 1] {
            b's' => {
                let arg = next_bytes(&mut args)?;
                let len = arg.iter().position(|&b| b == 0).unwrap_or(arg.len());
                append(&mut curarg, &arg[..len])?;
                i += 2;
            }
            b'b' => {
                append(&mut curarg, next_bytes(&mut args)?)?;
                i += 2;
            }
            b'%' => {
                append(&mut curarg, b"%")?;
                i += 2;
            }
            _ => {
                let (conversion, used) = Conversion::parse(&fmt[i + 1..])?;
                let text = conversion.render(args.next())?;
                append(&mut curarg, text.as_bytes())?;
                i += 1 + used;
            }
        }

        touched = true;
    }

    if touched {
        argv.try_reserve(1).map_err(|_| EncodeError::OutOfMemory)?;
        argv.push(curarg);
    }

    encode_multi_bulk(argv.iter().map(|arg| &arg[..]))
}

/// 按参数数组编码一条命令。
///
/// 如果给出了 `argvlen`，第 `j` 个参数取其前 `argvlen[j]` 个字节；否则参数的长度是到第一个 NUL 字节为止的长度。
pub fn format_command_argv<A: AsRef<[u8]>>(
    argv: &[A],
    argvlen: Option<&[usize]>,
) -> Result<Vec<u8>, EncodeError> {
    let mut args: Vec<&[u8]> = Vec::new();
    args.try_reserve_exact(argv.len())
        .map_err(|_| EncodeError::OutOfMemory)?;

    match argvlen {
        Some(lens) => {
            if lens.len() != argv.len() {
                return Err(EncodeError::LengthMismatch);
            }

            for (arg, &len) in argv.iter().zip(lens) {
                let arg = arg.as_ref();
                if len > arg.len() {
                    return Err(EncodeError::LengthMismatch);
                }
                args.push(&arg[..len]);
            }
        }
        None => {
            for arg in argv {
                let arg = arg.as_ref();
                let len = arg.iter().position(|&b| b == 0).unwrap_or(arg.len());
                args.push(&arg[..len]);
            }
        }
    }

    encode_multi_bulk(args.iter().copied())
}

/// 写出 `*<argc>\r\n` 和每个参数的 `$<len>\r\n<bytes>\r\n`。
fn encode_multi_bulk<'a, I>(args: I) -> Result<Vec<u8>, EncodeError>
where
    I: Iterator<Item = &'a [u8]> + Clone,
{
    // 第一遍：每个参数加上批量开销，再加上顶层的头部
    let mut argc = 0;
    let mut totlen = 0usize;
    for arg in args.clone() {
        argc += 1;
        totlen = totlen
            .checked_add(bulk_len(arg.len()))
            .ok_or(EncodeError::OutOfMemory)?;
    }
    totlen = totlen
        .checked_add(multi_bulk_header_len(argc))
        .ok_or(EncodeError::OutOfMemory)?;

    let mut cmd = Vec::new();
    cmd.try_reserve_exact(totlen)
        .map_err(|_| EncodeError::OutOfMemory)?;

    // 第二遍：写出字节
    cmd.push(b'*');
    write_decimal(&mut cmd, argc);
    for arg in args {
        cmd.push(b'$');
        write_decimal(&mut cmd, arg.len());
        cmd.extend_from_slice(arg);
        cmd.extend_from_slice(b"\r\n");
    }

    debug_assert_eq!(cmd.len(), totlen);
    Ok(cmd)
}

/// 写入十进制数和随后的 `\r\n`
fn write_decimal(dst: &mut Vec<u8>, val: usize) {
    let mut buf = [0u8; 20];
    let mut buf = Cursor::new(&mut buf[..]);

    // 20 字节足以容纳任何 u64
    if write!(&mut buf, "{}", val).is_ok() {
        let pos = buf.position() as usize;
        dst.extend_from_slice(&buf.get_ref()[..pos]);
    }
    dst.extend_from_slice(b"\r\n");
}

fn append(dst: &mut Vec<u8>, src: &[u8]) -> Result<(), EncodeError> {
    dst.try_reserve(src.len())
        .map_err(|_| EncodeError::OutOfMemory)?;
    dst.extend_from_slice(src);
    Ok(())
}

fn next_bytes<'a>(args: &mut slice::Iter<'_, Arg<'a>>) -> Result<&'a [u8], EncodeError> {
    match args.next() {
        Some(&Arg::Str(s)) => Ok(s.as_bytes()),
        Some(&Arg::Bytes(b)) => Ok(b),
        _ => Err(EncodeError::InvalidFormat),
    }
}

const INT_CONVERSIONS: &[u8] = b"diouxX";
const FLOAT_CONVERSIONS: &[u8] = b"eEfFgGaA";

/// 整数参数在格式化之前被截断到的宽度。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Size {
    Char,
    Short,
    Int,
    Long,
}

/// 一个解析后的数值转换：`%[flags][width][.precision][size]conversion`。
#[derive(Debug, Clone, PartialEq, Eq)]
struct Conversion {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    alt: bool,
    width: usize,
    precision: Option<usize>,
    size: Size,
    conversion: u8,
}

impl Conversion {
    /// 解析 '%' 之后的转换说明，返回转换和消耗的字节数。
    fn parse(directive: &[u8]) -> Result<(Conversion, usize), EncodeError> {
        let mut conv = Conversion {
            left: false,
            zero: false,
            plus: false,
            space: false,
            alt: false,
            width: 0,
            precision: None,
            size: Size::Int,
            conversion: 0,
        };
        let mut p = 0;

        // 标志
        while let Some(&flag) = directive.get(p) {
            match flag {
                b'-' => conv.left = true,
                b'0' => conv.zero = true,
                b'+' => conv.plus = true,
                b' ' => conv.space = true,
                b'#' => conv.alt = true,
                _ => break,
            }
            p += 1;
        }

        // 宽度
        let (width, used) = parse_number(&directive[p..])?;
        conv.width = width;
        p += used;

        // 精度
        if directive.get(p) == Some(&b'.') {
            p += 1;
            let (precision, used) = parse_number(&directive[p..])?;
            conv.precision = Some(precision);
            p += used;
        }

        let rest = &directive[p..];
        let (size, used) = if rest.starts_with(b"hh") {
            (Size::Char, 2)
        } else if rest.starts_with(b"h") {
            (Size::Short, 1)
        } else if rest.starts_with(b"ll") {
            (Size::Long, 2)
        } else if rest.starts_with(b"l") {
            (Size::Long, 1)
        } else {
            (Size::Int, 0)
        };
        conv.size = size;
        p += used;

        let &c = directive.get(p).ok_or(EncodeError::InvalidFormat)?;
        let valid = INT_CONVERSIONS.contains(&c) || (used == 0 && FLOAT_CONVERSIONS.contains(&c));
        if !valid {
            return Err(EncodeError::InvalidFormat);
        }
        conv.conversion = c;

        Ok((conv, p + 1))
    }

    fn render(&self, arg: Option<&Arg<'_>>) -> Result<String, EncodeError> {
        if FLOAT_CONVERSIONS.contains(&self.conversion) {
            return match arg {
                Some(Arg::Double(v)) => Ok(self.render_float(*v)),
                _ => Err(EncodeError::InvalidFormat),
            };
        }

        let raw = match arg {
            Some(Arg::Int(v)) => *v as u64,
            Some(Arg::Uint(v)) => *v,
            _ => return Err(EncodeError::InvalidFormat),
        };

        Ok(match self.conversion {
            b'd' | b'i' => {
                let value = match self.size {
                    Size::Char => raw as i8 as i64,
                    Size::Short => raw as i16 as i64,
                    Size::Int => raw as i32 as i64,
                    Size::Long => raw as i64,
                };
                self.render_integer(value < 0, value.unsigned_abs())
            }
            _ => {
                let value = match self.size {
                    Size::Char => raw as u8 as u64,
                    Size::Short => raw as u16 as u64,
                    Size::Int => raw as u32 as u64,
                    Size::Long => raw,
                };
                self.render_integer(false, value)
            }
        })
    }

    fn render_integer(&self, negative: bool, magnitude: u64) -> String {
        let signed = matches!(self.conversion, b'd' | b'i');

        let mut digits = match self.conversion {
            b'o' => format!("{:o}", magnitude),
            b'x' => format!("{:x}", magnitude),
            b'X' => format!("{:X}", magnitude),
            _ => magnitude.to_string(),
        };

        if let Some(precision) = self.precision {
            if precision == 0 && magnitude == 0 {
                digits.clear();
            } else if digits.len() < precision {
                digits.insert_str(0, &"0".repeat(precision - digits.len()));
            }
        }

        if self.alt && self.conversion == b'o' && !digits.starts_with('0') {
            digits.insert(0, '0');
        }

        let mut prefix = String::new();
        if negative {
            prefix.push('-');
        } else if signed && self.plus {
            prefix.push('+');
        } else if signed && self.space {
            prefix.push(' ');
        }
        if self.alt && magnitude != 0 {
            match self.conversion {
                b'x' => prefix.push_str("0x"),
                b'X' => prefix.push_str("0X"),
                _ => {}
            }
        }

        // 给出精度时忽略 '0' 标志
        self.pad(&prefix, &digits, self.precision.is_none())
    }

    fn render_float(&self, value: f64) -> String {
        let upper = self.conversion.is_ascii_uppercase();

        let prefix = if value.is_sign_negative() {
            "-"
        } else if self.plus {
            "+"
        } else if self.space {
            " "
        } else {
            ""
        };

        let magnitude = value.abs();
        if !magnitude.is_finite() {
            let body = match (magnitude.is_nan(), upper) {
                (true, false) => "nan",
                (true, true) => "NAN",
                (false, false) => "inf",
                (false, true) => "INF",
            };
            return self.pad(prefix, body, false);
        }

        if self.conversion.eq_ignore_ascii_case(&b'a') {
            let mut prefix = format!("{}0x", prefix);
            let mut body = hex_float(magnitude, self.precision, self.alt);
            if upper {
                prefix.make_ascii_uppercase();
                body.make_ascii_uppercase();
            }
            // 补零放在 `0x` 之后
            return self.pad(&prefix, &body, true);
        }

        let precision = self.precision.unwrap_or(6);
        let mut body = match self.conversion.to_ascii_lowercase() {
            b'f' => fixed(magnitude, precision, self.alt),
            b'e' => exponential(magnitude, precision, self.alt),
            _ => general(magnitude, precision, self.alt),
        };
        if upper {
            body.make_ascii_uppercase();
        }

        self.pad(prefix, &body, true)
    }

    fn pad(&self, prefix: &str, body: &str, zero_allowed: bool) -> String {
        let len = prefix.len() + body.len();
        if len >= self.width {
            return format!("{}{}", prefix, body);
        }

        let fill = self.width - len;
        if self.left {
            format!("{}{}{}", prefix, body, " ".repeat(fill))
        } else if self.zero && zero_allowed {
            format!("{}{}{}", prefix, "0".repeat(fill), body)
        } else {
            format!("{}{}{}", " ".repeat(fill), prefix, body)
        }
    }
}

/// 解析一串十进制数字，没有数字时返回 0。
fn parse_number(src: &[u8]) -> Result<(usize, usize), EncodeError> {
    let used = src.iter().take_while(|b| b.is_ascii_digit()).count();
    if used == 0 {
        return Ok((0, 0));
    }

    let value = atoi::atoi::<usize>(&src[..used]).ok_or(EncodeError::InvalidFormat)?;
    Ok((value, used))
}

fn fixed(value: f64, precision: usize, alt: bool) -> String {
    let mut out = format!("{:.*}", precision, value);
    if alt && precision == 0 {
        out.push('.');
    }
    out
}

/// `d.ddde±XX`，指数至少两位
fn exponential(value: f64, precision: usize, alt: bool) -> String {
    let repr = format!("{:.*e}", precision, value);
    let (mantissa, exponent) = match repr.split_once('e') {
        Some(parts) => parts,
        None => return repr,
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);

    let mut out = mantissa.to_string();
    if alt && precision == 0 {
        out.push('.');
    }

    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{}e{}{:02}", out, sign, exponent.unsigned_abs())
}

/// 十六进制浮点数 `h.hhhp±d`，不含符号和 `0x` 前缀。
///
/// 没有精度时输出精确表示所需的最少位数。给出精度时按就近舍入到偶数，进位不重新规格化，
/// 所以 `%.0a` 对 1.5 得到 `2p+0`。非规格化数以 `0.` 开头，指数固定为 -1022。
fn hex_float(value: f64, precision: Option<usize>, alt: bool) -> String {
    const MANTISSA_DIGITS: usize = 13;

    let bits = value.to_bits();
    let biased = ((bits >> 52) & 0x7ff) as i64;
    let mantissa = bits & ((1u64 << 52) - 1);

    let (mut lead, exponent) = match (biased, mantissa) {
        (0, 0) => (0u64, 0i64),
        (0, _) => (0, -1022),
        _ => (1, biased - 1023),
    };

    let digits = match precision {
        None => {
            let mut digits = format!("{:013x}", mantissa);
            let len = digits.trim_end_matches('0').len();
            digits.truncate(len);
            digits
        }
        Some(p) if p >= MANTISSA_DIGITS => {
            format!("{:013x}{}", mantissa, "0".repeat(p - MANTISSA_DIGITS))
        }
        Some(p) => {
            let shift = 4 * (MANTISSA_DIGITS - p) as u32;
            let mut keep = mantissa >> shift;
            let rest = mantissa & ((1u64 << shift) - 1);
            let half = 1u64 << (shift - 1);

            let odd = if p == 0 { lead & 1 == 1 } else { keep & 1 == 1 };
            if rest > half || (rest == half && odd) {
                keep += 1;
            }
            if keep == 1u64 << (4 * p) {
                lead += 1;
                keep = 0;
            }

            if p == 0 {
                String::new()
            } else {
                format!("{:0width$x}", keep, width = p)
            }
        }
    };

    let mut out = lead.to_string();
    if !digits.is_empty() || alt {
        out.push('.');
    }
    out.push_str(&digits);

    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{}p{}{}", out, sign, exponent.unsigned_abs())
}

fn general(value: f64, precision: usize, alt: bool) -> String {
    let p = precision.max(1);

    let repr = format!("{:.*e}", p - 1, value);
    let x: i64 = repr
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);

    let p = p as i64;
    let mut out = if p > x && x >= -4 {
        fixed(value, (p - 1 - x) as usize, alt)
    } else {
        exponential(value, (p - 1) as usize, alt)
    };

    if !alt {
        let split = out.find('e').unwrap_or(out.len());
        let (mantissa, exponent) = out.split_at(split);
        if mantissa.contains('.') {
            let trimmed = mantissa.trim_end_matches('0').trim_end_matches('.');
            out = format!("{}{}", trimmed, exponent);
        }
    }

    out
}

impl<'a> From<&'a str> for Arg<'a> {
    fn from(src: &'a str) -> Arg<'a> {
        Arg::Str(src)
    }
}

impl<'a> From<&'a String> for Arg<'a> {
    fn from(src: &'a String) -> Arg<'a> {
        Arg::Str(src)
    }
}

impl<'a> From<&'a [u8]> for Arg<'a> {
    fn from(src: &'a [u8]) -> Arg<'a> {
        Arg::Bytes(src)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Arg<'a> {
    fn from(src: &'a [u8; N]) -> Arg<'a> {
        Arg::Bytes(src)
    }
}

impl<'a> From<&'a Vec<u8>> for Arg<'a> {
    fn from(src: &'a Vec<u8>) -> Arg<'a> {
        Arg::Bytes(src)
    }
}

impl<'a> From<&'a bytes::Bytes> for Arg<'a> {
    fn from(src: &'a bytes::Bytes) -> Arg<'a> {
        Arg::Bytes(src)
    }
}

macro_rules! int_arg {
    ($variant:ident, $($ty:ty),*) => {
        $(
            impl From<$ty> for Arg<'_> {
                fn from(src: $ty) -> Self {
                    Arg::$variant(src as _)
                }
            }
        )*
    };
}

int_arg!(Int, i8, i16, i32, i64, isize);
int_arg!(Uint, u8, u16, u32, u64, usize);

impl From<f32> for Arg<'_> {
    fn from(src: f32) -> Self {
        Arg::Double(src as f64)
    }
}

impl From<f64> for Arg<'_> {
    fn from(src: f64) -> Self {
        Arg::Double(src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: &str, args: &[Arg<'_>]) -> Vec<u8> {
        try_format_command(format, args).unwrap()
    }

    fn last_arg(cmd: &[u8]) -> String {
        let text = String::from_utf8(cmd.to_vec()).unwrap();
        text.rsplit("\r\n").nth(1).unwrap().to_string()
    }

    #[test]
    fn without_interpolation() {
        let cmd = fmt("SET foo bar", &[]);
        assert_eq!(&cmd[..], b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
        assert_eq!(cmd.len(), 4 + 4 + (3 + 2) + 4 + (3 + 2) + 4 + (3 + 2));
        assert_eq!(cmd.len(), 31);
    }

    #[test]
    fn string_interpolation() {
        let cmd = fmt("SET %s %s", &["foo".into(), "bar".into()]);
        assert_eq!(&cmd[..], b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
    }

    #[test]
    fn empty_string_arguments_are_kept() {
        let cmd = fmt("SET %s %s", &["foo".into(), "".into()]);
        assert_eq!(&cmd[..], b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$0\r\n\r\n");

        let cmd = fmt("SET %s %s", &["".into(), "foo".into()]);
        assert_eq!(&cmd[..], b"*3\r\n$3\r\nSET\r\n$0\r\n\r\n$3\r\nfoo\r\n");
    }

    #[test]
    fn binary_interpolation() {
        let cmd = fmt("SET %b %b", &[b"foo".into(), b"b\0r".into()]);
        assert_eq!(&cmd[..], b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nb\0r\r\n");

        let cmd = fmt("SET %b %b", &[b"foo".into(), Arg::Bytes(b"")]);
        assert_eq!(&cmd[..], b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$0\r\n\r\n");
    }

    #[test]
    fn string_conversion_stops_at_nul() {
        let cmd = fmt("GET %s", &["ab\0cd".into()]);
        assert_eq!(&cmd[..], b"*2\r\n$3\r\nGET\r\n$2\r\nab\r\n");
    }

    #[test]
    fn literal_percent() {
        let cmd = fmt("SET %% %%", &[]);
        assert_eq!(&cmd[..], b"*3\r\n$3\r\nSET\r\n$1\r\n%\r\n$1\r\n%\r\n");

        // 末尾的 '%' 原样保留
        let cmd = fmt("ECHO 100%", &[]);
        assert_eq!(&cmd[..], b"*2\r\n$4\r\nECHO\r\n$4\r\n100%\r\n");
    }

    #[test]
    fn repeated_spaces_do_not_create_arguments() {
        let cmd = fmt("  PING   ", &[]);
        assert_eq!(&cmd[..], b"*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn integer_delegation() {
        for directive in ["d", "hhd", "hd", "ld", "lld", "u", "hhu", "hu", "lu", "llu"] {
            let format = format!("key:%08{} str:%s", directive);
            let cmd = fmt(&format, &[123i32.into(), "hello".into()]);
            assert_eq!(
                &cmd[..],
                b"*2\r\n$12\r\nkey:00000123\r\n$9\r\nstr:hello\r\n",
                "directive = {}",
                directive
            );
        }
    }

    #[test]
    fn float_delegation() {
        for value in [Arg::from(123.0f32), Arg::from(123.0f64)] {
            let cmd = fmt("key:%08.3f str:%s", &[value, "hello".into()]);
            assert_eq!(&cmd[..], b"*2\r\n$12\r\nkey:0123.000\r\n$9\r\nstr:hello\r\n");
        }
    }

    #[test]
    fn integer_flags_and_bases() {
        fn one(format: &str, arg: Arg<'_>) -> String {
            last_arg(&fmt(&format!("X %{}", format), &[arg]))
        }

        assert_eq!(one("x", 255u32.into()), "ff");
        assert_eq!(one("#X", 255u32.into()), "0XFF");
        assert_eq!(one("#o", 8u32.into()), "010");
        assert_eq!(one("+d", 5i32.into()), "+5");
        assert_eq!(one("-5d|", 42i32.into()), "42   |");
        assert_eq!(one(".3d", 7i32.into()), "007");
        assert_eq!(one("hhd", 300i32.into()), "44");
        assert_eq!(one("u", (-1i32).into()), "4294967295");
        assert_eq!(one("lld", i64::MIN.into()), "-9223372036854775808");
    }

    #[test]
    fn float_styles() {
        fn one(format: &str, value: f64) -> String {
            last_arg(&fmt(&format!("X %{}", format), &[value.into()]))
        }

        assert_eq!(one("e", 1234.5), "1.234500e+03");
        assert_eq!(one("E", 0.00012), "1.200000E-04");
        assert_eq!(one("g", 0.0001), "0.0001");
        assert_eq!(one("g", 123456789.0), "1.23457e+08");
        assert_eq!(one("g", 100.0), "100");
        assert_eq!(one("f", f64::INFINITY), "inf");
        assert_eq!(one("F", f64::NEG_INFINITY), "-INF");
        assert_eq!(one(".1f", -2.26), "-2.3");
    }

    #[test]
    fn hex_float_styles() {
        fn one(format: &str, value: f64) -> String {
            last_arg(&fmt(&format!("SET k %{}", format), &[value.into()]))
        }

        assert_eq!(one("a", 1.0), "0x1p+0");
        assert_eq!(one("a", 3.0), "0x1.8p+1");
        assert_eq!(one("A", 3.0), "0X1.8P+1");
        assert_eq!(one("a", -0.5), "-0x1p-1");
        assert_eq!(one("a", 0.0), "0x0p+0");
        assert_eq!(one("a", 0.1), "0x1.999999999999ap-4");
        assert_eq!(one("a", 5e-324), "0x0.0000000000001p-1022");
        assert_eq!(one("a", f64::INFINITY), "inf");

        assert_eq!(one(".2a", 1.0), "0x1.00p+0");
        assert_eq!(one(".1a", 0.1), "0x1.ap-4");
        assert_eq!(one(".0a", 1.5), "0x2p+0");
        assert_eq!(one(".0a", 1.25), "0x1p+0");
        assert_eq!(one("#.0a", 1.0), "0x1.p+0");
        assert_eq!(one("+a", 2.0), "+0x1p+1");
        assert_eq!(one("010a", 1.0), "0x00001p+0");
        assert_eq!(one("-8a", 1.0), "0x1p+0  ");
    }

    #[test]
    fn unsupported_conversions_are_format_errors() {
        let err = try_format_command("key:%08p %b", &[1u64.into(), b"foo".into()]);
        assert_eq!(err, Err(EncodeError::InvalidFormat));

        assert_eq!(try_format_command("%-", &[]), Err(EncodeError::InvalidFormat));
        assert_eq!(try_format_command("%lf", &[1.0f64.into()]), Err(EncodeError::InvalidFormat));
        assert_eq!(try_format_command("%la", &[1.0f64.into()]), Err(EncodeError::InvalidFormat));
        assert!(format_command("%-", &[]).is_none());
    }

    #[test]
    fn missing_or_mismatched_arguments_are_format_errors() {
        assert_eq!(try_format_command("GET %s", &[]), Err(EncodeError::InvalidFormat));
        assert_eq!(
            try_format_command("INCRBY k %d", &["1".into()]),
            Err(EncodeError::InvalidFormat)
        );
        assert_eq!(
            try_format_command("SET k %f", &[1i32.into()]),
            Err(EncodeError::InvalidFormat)
        );
    }

    #[test]
    fn argv_without_lengths_uses_string_length() {
        let argv: [&[u8]; 3] = [b"SET", b"foo\0xxx", b"bar"];
        let cmd = format_command_argv(&argv, None).unwrap();
        assert_eq!(&cmd[..], b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
    }

    #[test]
    fn argv_with_lengths() {
        let argv: [&[u8]; 3] = [b"SET", b"foo\0xxx", b"bar"];
        let cmd = format_command_argv(&argv, Some(&[3, 7, 3][..])).unwrap();
        assert_eq!(&cmd[..], b"*3\r\n$3\r\nSET\r\n$7\r\nfoo\0xxx\r\n$3\r\nbar\r\n");
        assert_eq!(cmd.len(), 4 + 4 + (3 + 2) + 4 + (7 + 2) + 4 + (3 + 2));
    }

    #[test]
    fn argv_length_mismatch() {
        let argv = ["GET", "key"];
        assert_eq!(
            format_command_argv(&argv, Some(&[3][..])),
            Err(EncodeError::LengthMismatch)
        );
        assert_eq!(
            format_command_argv(&argv, Some(&[3, 9][..])),
            Err(EncodeError::LengthMismatch)
        );
    }

    #[test]
    fn encode_errors_convert_to_crate_errors() {
        let err: crate::Error = EncodeError::InvalidFormat.into();
        assert_eq!(err.kind(), crate::ErrorKind::Format);
        assert_eq!(err.message(), "Invalid format string");

        let err: crate::Error = EncodeError::OutOfMemory.into();
        assert_eq!(err.kind(), crate::ErrorKind::OutOfMemory);
    }
}
