//! 数据库配置

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

/// 数据库连接配置
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// 连接 URL
    /// - 本地: 数据库文件路径
    /// - 内存: ":memory:"
    pub url: String,

    /// 连接模式
    pub mode: ConnectionMode,
}

/// 连接模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// 本地 SQLite 文件
    Local,
    /// 内存数据库（进程退出即丢失）
    Memory,
}

impl DbConfig {
    /// 创建本地 SQLite 配置
    pub fn local<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        Self {
            url: path.display().to_string(),
            mode: ConnectionMode::Local,
        }
    }

    /// 创建内存数据库配置
    pub fn memory() -> Self {
        Self {
            url: ":memory:".to_string(),
            mode: ConnectionMode::Memory,
        }
    }

    /// 从环境变量或默认路径创建配置
    pub fn from_env() -> Self {
        if let Ok(url) = std::env::var("RTLS_DB_PATH") {
            if url == ":memory:" {
                return Self::memory();
            }
            return Self::local(url);
        }

        // 默认路径: ~/.rtls/db/tag_data.db
        let default_path = dirs::home_dir()
            .map(|h| h.join(".rtls").join("db").join("tag_data.db"))
            .unwrap_or_else(|| PathBuf::from("tag_data.db"));

        Self::local(default_path)
    }

    /// 获取数据库文件路径 (仅本地模式)
    pub fn path(&self) -> Option<PathBuf> {
        match self.mode {
            ConnectionMode::Local => Some(PathBuf::from(&self.url)),
            ConnectionMode::Memory => None,
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// 读取环境变量，未设置时使用默认值
///
/// 变量存在但无法解析时返回 `Error::Config`，启动阶段即失败。
pub fn env_or<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{}={:?}: {}", key, raw, e))),
        Err(_) => Ok(default),
    }
}
