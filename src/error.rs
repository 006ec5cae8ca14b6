//! 错误类型定义

use thiserror::Error;

/// 库错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 数据库错误
    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO 错误（socket 绑定、收发）
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 接收循环已在运行
    #[error("接收器已在运行")]
    AlreadyRunning,

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, Error>;

/// 报文拒收原因
///
/// 解析器从不 panic，所有畸形输入都以该类型返回给调用方。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// 数据报超过最大长度
    #[error("数据报过长: {0} 字节")]
    Oversized(usize),

    /// 非 UTF-8 内容
    #[error("非 UTF-8 数据")]
    InvalidEncoding,

    /// 字段数量不是 4
    #[error("字段数量错误: 期望 4, 实际 {0}")]
    FieldCount(usize),

    /// 首字段不是 TAG
    #[error("报文头错误: {0:?}")]
    BadLiteral(String),

    /// tag_id 为空
    #[error("tag_id 为空")]
    EmptyTagId,

    /// 计数器不是整数
    #[error("计数器非法: {0:?}")]
    InvalidCounter(String),

    /// 时间戳格式或取值非法
    #[error("时间戳非法: {0:?}")]
    InvalidTimestamp(String),
}
