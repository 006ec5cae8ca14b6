//! 数据库 Schema 定义

/// 核心 Schema SQL
pub const SCHEMA_SQL: &str = r#"
-- 已注册 Tag 表
CREATE TABLE IF NOT EXISTS registered_tags (
    id TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000)
);

-- Tag 历史日志（仅已注册 Tag，追加写入）
CREATE TABLE IF NOT EXISTS tag_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tag_id TEXT NOT NULL,
    cnt INTEGER NOT NULL,
    timestamp TEXT NOT NULL,     -- 设备时间戳 (YYYY-MM-DD HH:MM:SS.SSS)
    received_at INTEGER NOT NULL, -- 接收时间 (毫秒时间戳)
    FOREIGN KEY (tag_id) REFERENCES registered_tags(id)
);

-- 索引
CREATE INDEX IF NOT EXISTS idx_tag_logs_tag_id ON tag_logs(tag_id);
"#;
