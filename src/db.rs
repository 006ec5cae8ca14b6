//! 数据库连接和操作

use crate::config::{ConnectionMode, DbConfig};
use crate::error::Result;
use crate::schema;
use crate::types::{Stats, TagLog, TagStatus};
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

/// 接收器依赖的持久化接口
///
/// 接收循环只调用这两个方法；错误由调用方记录，不会中断循环。
pub trait TagStore: Send + Sync {
    /// tag 是否已注册
    fn is_tag_registered(&self, tag_id: &str) -> Result<bool>;

    /// 追加一条日志（接收时间由存储端记录）
    fn log_tag_data(&self, tag_id: &str, cnt: i64, timestamp: NaiveDateTime) -> Result<()>;
}

/// 数据库连接
pub struct TagDB {
    pub(crate) conn: Arc<Mutex<Connection>>,
    config: DbConfig,
}

impl TagDB {
    /// 连接数据库
    pub fn connect(config: DbConfig) -> Result<Self> {
        let conn = match config.mode {
            ConnectionMode::Local => Self::open_local(&config)?,
            ConnectionMode::Memory => Connection::open_in_memory()?,
        };

        // 初始化 schema（创建表和索引）
        conn.execute_batch(schema::SCHEMA_SQL)?;

        tracing::info!("数据库已连接: {}", config.url);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
        })
    }

    /// 打开本地 SQLite 文件
    fn open_local(config: &DbConfig) -> Result<Connection> {
        let path = Path::new(&config.url);

        // 确保目录存在
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(Connection::open(path)?)
    }

    /// 连接配置
    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// 获取底层连接 (用于测试)
    #[doc(hidden)]
    pub fn connection(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }

    // ==================== 注册 ====================

    /// 注册 Tag，已存在时返回 false
    pub fn register_tag(&self, tag_id: &str, description: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO registered_tags (id, description, created_at) VALUES (?1, ?2, ?3)",
            params![tag_id, description, current_time_ms()],
        );

        match result {
            Ok(_) => {
                tracing::info!("📌 Tag 已注册: {}", tag_id);
                Ok(true)
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                tracing::debug!("Tag 已存在: {}", tag_id);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// tag 是否已注册
    pub fn is_tag_registered(&self, tag_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM registered_tags WHERE id = ?1",
                params![tag_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // ==================== 日志 ====================

    /// 追加一条 Tag 日志
    pub fn log_tag_data(&self, tag_id: &str, cnt: i64, timestamp: NaiveDateTime) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tag_logs (tag_id, cnt, timestamp, received_at) VALUES (?1, ?2, ?3, ?4)",
            params![tag_id, cnt, timestamp, current_time_ms()],
        )?;
        Ok(())
    }

    /// 获取 Tag 历史日志（最新在前）
    pub fn get_tag_logs(&self, tag_id: &str, limit: usize) -> Result<Vec<TagLog>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, tag_id, cnt, timestamp, received_at FROM tag_logs WHERE tag_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![tag_id, limit as i64], |row| {
            Ok(TagLog {
                id: row.get(0)?,
                tag_id: row.get(1)?,
                cnt: row.get(2)?,
                timestamp: row.get(3)?,
                received_at: row.get(4)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    // ==================== 查询 ====================

    /// 获取单个已注册 Tag 的状态
    pub fn get_tag_status(&self, tag_id: &str) -> Result<Option<TagStatus>> {
        let conn = self.conn.lock();
        let status = conn
            .query_row(
                r#"
                SELECT t.id, t.description, l.cnt, l.timestamp
                FROM registered_tags t
                LEFT JOIN tag_logs l ON l.id = (
                    SELECT id FROM tag_logs WHERE tag_id = t.id ORDER BY id DESC LIMIT 1
                )
                WHERE t.id = ?1
                "#,
                params![tag_id],
                row_to_status,
            )
            .optional()?;
        Ok(status)
    }

    /// 获取所有已注册 Tag（按注册顺序）
    pub fn get_all_tags(&self) -> Result<Vec<TagStatus>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT t.id, t.description, l.cnt, l.timestamp
            FROM registered_tags t
            LEFT JOIN tag_logs l ON l.id = (
                SELECT id FROM tag_logs WHERE tag_id = t.id ORDER BY id DESC LIMIT 1
            )
            ORDER BY t.rowid
            "#,
        )?;

        let rows = stmt.query_map([], row_to_status)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// 获取统计信息
    pub fn get_stats(&self) -> Result<Stats> {
        let conn = self.conn.lock();
        let registered_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM registered_tags", [], |row| row.get(0))?;
        let log_count: i64 = conn.query_row("SELECT COUNT(*) FROM tag_logs", [], |row| row.get(0))?;

        Ok(Stats {
            registered_count,
            log_count,
        })
    }
}

impl TagStore for TagDB {
    fn is_tag_registered(&self, tag_id: &str) -> Result<bool> {
        TagDB::is_tag_registered(self, tag_id)
    }

    fn log_tag_data(&self, tag_id: &str, cnt: i64, timestamp: NaiveDateTime) -> Result<()> {
        TagDB::log_tag_data(self, tag_id, cnt, timestamp)
    }
}

fn row_to_status(row: &rusqlite::Row<'_>) -> rusqlite::Result<TagStatus> {
    Ok(TagStatus {
        id: row.get(0)?,
        description: row.get(1)?,
        last_cnt: row.get(2)?,
        last_seen: row.get(3)?,
    })
}

fn current_time_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
