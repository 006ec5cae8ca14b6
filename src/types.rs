//! 数据类型定义

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// 一条 Tag 报文
///
/// 由 [`TagParser`](crate::parser::TagParser) 产生的实例均已通过校验；
/// 字段公开，直接构造时由调用方保证合法。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagReading {
    pub tag_id: String,
    pub cnt: i64,
    pub timestamp: NaiveDateTime,
    /// 去除首尾空白后的原始报文（用于诊断）
    pub raw: String,
}

/// Tag 的最近状态（内存缓存）
///
/// 计数器和时间戳作为一个值整体替换。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub last_cnt: i64,
    pub last_seen: NaiveDateTime,
}

/// 已注册 Tag 的状态（来自持久化存储）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagStatus {
    pub id: String,
    pub description: String,
    /// 最近一条日志的计数器，尚无日志时为 None
    pub last_cnt: Option<i64>,
    /// 最近一条日志的设备时间戳
    pub last_seen: Option<NaiveDateTime>,
}

/// 一条 Tag 历史日志
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagLog {
    pub id: i64,
    pub tag_id: String,
    pub cnt: i64,
    pub timestamp: NaiveDateTime,
    pub received_at: i64, // 接收时间（毫秒时间戳）
}

/// 统计信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub registered_count: i64,
    pub log_count: i64,
}
