//! 查询服务协议定义
//!
//! 通信方式：TCP + JSONL（每条消息一行 JSON + '\n'）

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::types::{CacheEntry, TagLog, TagStatus};

/// 历史查询默认条数
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// 请求类型（Client → Server）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// 注册 Tag
    RegisterTag {
        id: String,
        description: String,
    },

    /// 查询单个已注册 Tag
    GetTag {
        id: String,
    },

    /// 列出所有已注册 Tag
    ListTags,

    /// 查询 Tag 历史日志（最新在前）
    GetTagHistory {
        id: String,
        /// 最多返回条数，缺省为 [`DEFAULT_HISTORY_LIMIT`]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },

    /// 查询内存中的最近状态（不区分是否注册）
    GetLiveState {
        /// 指定 tag，缺省返回全部
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// 订阅计数器变化推送
    Subscribe,

    /// 健康检查
    Health,
}

/// 响应类型（Server → Client）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// 成功
    Ok,

    /// 错误（code 沿用 HTTP 语义：400 / 404 / 500）
    Error {
        code: i32,
        message: String,
    },

    /// 单个 Tag
    Tag {
        tag: TagStatus,
    },

    /// Tag 列表
    Tags {
        tags: Vec<TagStatus>,
    },

    /// 历史日志
    History {
        logs: Vec<TagLog>,
    },

    /// 内存状态快照
    LiveState {
        entries: HashMap<String, CacheEntry>,
    },

    /// 健康状态
    Health {
        status: String,
        timestamp: String,
    },
}

impl Response {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Response::Error {
            code: 400,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Response::Error {
            code: 404,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Response::Error {
            code: 500,
            message: message.into(),
        }
    }
}

/// 推送消息（Server → 订阅者）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Push {
    /// 计数器变化
    CntChanged {
        tag_id: String,
        cnt: i64,
        timestamp: NaiveDateTime,
    },
}

/// 事件（内部使用，由接收器广播）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagEvent {
    CntChanged {
        tag_id: String,
        cnt: i64,
        timestamp: NaiveDateTime,
    },
}

impl TagEvent {
    /// 转换为 Push 消息
    pub fn to_push(&self) -> Push {
        match self {
            TagEvent::CntChanged {
                tag_id,
                cnt,
                timestamp,
            } => Push::CntChanged {
                tag_id: tag_id.clone(),
                cnt: *cnt,
                timestamp: *timestamp,
            },
        }
    }
}
