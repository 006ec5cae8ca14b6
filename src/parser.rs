//! Tag 报文解析
//!
//! 报文格式：`TAG,<tag_id>,<cnt>,<timestamp>`
//!
//! - `timestamp`: `YYYYMMDDHHMMSS`，可选 `.` + 1~3 位毫秒数
//!
//! 例：`TAG,fa451f0755d8,42,20240102153045.123`

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::ParseError;
use crate::types::TagReading;

/// 报文头
pub const TAG_LITERAL: &str = "TAG";

/// 单个数据报的最大长度（字节）
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// 时间戳主体长度 (YYYYMMDDHHMMSS)
const TIMESTAMP_MAIN_LEN: usize = 14;

/// 毫秒部分最多位数
const MAX_FRACTION_DIGITS: usize = 3;

/// Tag 报文解析器（无状态）
pub struct TagParser;

impl TagParser {
    /// 从原始字节解析（UTF-8 解码 + 解析）
    pub fn decode(data: &[u8]) -> Result<TagReading, ParseError> {
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(ParseError::Oversized(data.len()));
        }
        let text = std::str::from_utf8(data).map_err(|_| ParseError::InvalidEncoding)?;
        Self::parse(text)
    }

    /// 解析一条文本报文
    pub fn parse(raw: &str) -> Result<TagReading, ParseError> {
        let raw = raw.trim();
        let parts: Vec<&str> = raw.split(',').collect();

        if parts.len() != 4 {
            return Err(ParseError::FieldCount(parts.len()));
        }
        if parts[0] != TAG_LITERAL {
            return Err(ParseError::BadLiteral(parts[0].to_string()));
        }

        let tag_id = parts[1];
        if tag_id.is_empty() {
            return Err(ParseError::EmptyTagId);
        }

        let cnt: i64 = parts[2]
            .parse()
            .map_err(|_| ParseError::InvalidCounter(parts[2].to_string()))?;

        let timestamp = parse_timestamp(parts[3])
            .ok_or_else(|| ParseError::InvalidTimestamp(parts[3].to_string()))?;

        Ok(TagReading {
            tag_id: tag_id.to_string(),
            cnt,
            timestamp,
            raw: raw.to_string(),
        })
    }
}

/// 解析 `YYYYMMDDHHMMSS[.mmm]`
///
/// 小数部分按毫秒整数读取：`.5` 为 5ms，`.123` 为 123ms。
fn parse_timestamp(ts: &str) -> Option<NaiveDateTime> {
    let (main, millis) = match ts.split_once('.') {
        Some((main, fraction)) => {
            if fraction.is_empty()
                || fraction.len() > MAX_FRACTION_DIGITS
                || !fraction.bytes().all(|b| b.is_ascii_digit())
            {
                return None;
            }
            (main, fraction.parse::<u32>().ok()?)
        }
        None => (ts, 0),
    };

    if main.len() != TIMESTAMP_MAIN_LEN || !main.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    // 已确认全部为 ASCII 数字，按字节切片安全
    let field = |range: std::ops::Range<usize>| main[range].parse::<u32>().ok();

    // 公元 1 年起
    let year = field(0..4).filter(|&y| y >= 1)? as i32;
    let month = field(4..6)?;
    let day = field(6..8)?;
    let hour = field(8..10)?;
    let minute = field(10..12)?;
    let second = field(12..14)?;

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_milli_opt(hour, minute, second, millis)
}
