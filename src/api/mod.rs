//! 查询服务 - Tag 注册 + 状态查询 + 变化推送
//!
//! 与接收器共享同一个数据库连接和状态缓存：
//! - 注册 / 查询已注册 Tag（持久化存储）
//! - 查询内存中的最近状态
//! - 订阅计数器变化推送

mod handler;
mod server;

// Re-export protocol types from crate root
pub use crate::protocol::{Push, Request, Response};
pub use handler::Handler;
pub use server::{ApiConfig, ApiServer};
