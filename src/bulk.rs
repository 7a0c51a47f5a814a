//! 计算 RESP 批量字符串编码长度的辅助函数。

/// 返回 `v` 的十进制位数。
pub fn digit_count(mut v: u64) -> u32 {
    let mut result = 1;

    loop {
        if v < 10 {
            return result;
        }
        if v < 100 {
            return result + 1;
        }
        if v < 1000 {
            return result + 2;
        }
        if v < 10000 {
            return result + 3;
        }

        v /= 10000;
        result += 4;
    }
}

/// 编码一个长度为 `len` 的批量字符串所需的字节数：`$<len>\r\n<bytes>\r\n`。
pub fn bulk_len(len: usize) -> usize {
    1 + digit_count(len as u64) as usize + 2 + len + 2
}

/// 多批量头部 `*<argc>\r\n` 的字节数。
pub(crate) fn multi_bulk_header_len(argc: usize) -> usize {
    1 + digit_count(argc as u64) as usize + 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digit_count_matches_formatting() {
        for v in [0u64, 9, 10, 99, 100, 999, 1000, 9999, 10000, 123456789, u64::MAX] {
            assert_eq!(digit_count(v) as usize, v.to_string().len(), "v = {}", v);
        }
    }

    #[test]
    fn bulk_len_of_small_strings() {
        // "$3\r\nfoo\r\n"
        assert_eq!(bulk_len(3), 9);
        // "$0\r\n\r\n"
        assert_eq!(bulk_len(0), 6);
        // "$10\r\n0123456789\r\n"
        assert_eq!(bulk_len(10), 17);
    }

    #[test]
    fn header_len() {
        assert_eq!(multi_bulk_header_len(3), 4);
        assert_eq!(multi_bulk_header_len(12), 5);
    }
}
