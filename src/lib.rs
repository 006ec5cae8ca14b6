//! rtls-tag-receiver - RTLS Tag 报文接收
//!
//! 接收 RTLS Tag 周期性发送的 UDP 信标报文，跟踪每个 Tag 的最近计数器与时间戳，
//! 并为已注册的 Tag 持久化历史记录。
//!
//! # 核心功能
//!
//! - **报文解析**: `TAG,<tag_id>,<cnt>,<YYYYMMDDHHMMSS[.mmm]>`，畸形输入显式拒收
//! - **状态缓存**: 并发安全的最近状态表，检测计数器变化
//! - **接收循环**: UDP 接收 + 可随时唤醒的停止
//! - **持久化**: SQLite 注册表 + 追加写入的历史日志
//! - **查询服务**: 注册 / 查询 / 变化推送（JSONL over TCP）
//!
//! # Feature Flags
//!
//! - `receiver`: UDP 接收循环
//! - `api`: 查询服务（依赖 `receiver`）

pub mod config;
pub mod db;
pub mod error;
pub mod parser;
pub mod protocol;
pub mod schema;
pub mod state;
pub mod types;

#[cfg(feature = "receiver")]
pub mod receiver;

#[cfg(feature = "api")]
pub mod api;

// Re-exports
pub use config::{ConnectionMode, DbConfig};
pub use db::{TagDB, TagStore};
pub use error::{Error, ParseError, Result};
pub use parser::{TagParser, MAX_DATAGRAM_SIZE};
pub use protocol::{Push, Request, Response, TagEvent};
pub use state::StateCache;
pub use types::*;

#[cfg(feature = "receiver")]
pub use receiver::{DatagramOutcome, Persistence, Receiver, ReceiverConfig, ReceiverState};

#[cfg(feature = "api")]
pub use api::{ApiConfig, ApiServer};

/// 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
