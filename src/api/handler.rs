//! 请求处理器
//!
//! 处理来自客户端的各类请求

use std::collections::HashMap;
use std::sync::Arc;

use crate::protocol::{Request, Response, DEFAULT_HISTORY_LIMIT};
use crate::state::StateCache;
use crate::TagDB;

/// 请求处理器
pub struct Handler {
    /// 数据库连接
    db: Arc<TagDB>,
    /// 最近状态缓存
    cache: Arc<StateCache>,
}

impl Handler {
    /// 创建处理器
    pub fn new(db: Arc<TagDB>, cache: Arc<StateCache>) -> Self {
        Self { db, cache }
    }

    /// 处理请求
    ///
    /// `Subscribe` 与连接绑定，由服务器处理，这里只返回 Ok。
    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::RegisterTag { id, description } => self.handle_register(&id, &description),

            Request::GetTag { id } => match self.db.get_tag_status(&id) {
                Ok(Some(tag)) => Response::Tag { tag },
                Ok(None) => Response::not_found("Tag not found"),
                Err(e) => {
                    tracing::error!("查询 Tag 失败: {}", e);
                    Response::internal(e.to_string())
                }
            },

            Request::ListTags => match self.db.get_all_tags() {
                Ok(tags) => Response::Tags { tags },
                Err(e) => {
                    tracing::error!("列出 Tag 失败: {}", e);
                    Response::internal(e.to_string())
                }
            },

            Request::GetTagHistory { id, limit } => {
                self.handle_history(&id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
            }

            Request::GetLiveState { id } => {
                let entries = match id {
                    Some(id) => {
                        let mut entries = HashMap::new();
                        if let Some(entry) = self.cache.get(&id) {
                            entries.insert(id, entry);
                        }
                        entries
                    }
                    None => self.cache.get_all(),
                };
                Response::LiveState { entries }
            }

            Request::Subscribe => Response::Ok,

            Request::Health => Response::Health {
                status: "healthy".to_string(),
                timestamp: chrono::Local::now()
                    .naive_local()
                    .format("%Y-%m-%dT%H:%M:%S%.3f")
                    .to_string(),
            },
        }
    }

    /// 注册 Tag
    fn handle_register(&self, id: &str, description: &str) -> Response {
        // 报文以逗号分隔，含逗号的 id 永远不会被收到
        if id.is_empty() || id.contains(',') {
            return Response::bad_request("Invalid tag id");
        }

        match self.db.register_tag(id, description) {
            Ok(true) => Response::Tag {
                tag: crate::TagStatus {
                    id: id.to_string(),
                    description: description.to_string(),
                    last_cnt: None,
                    last_seen: None,
                },
            },
            Ok(false) => Response::bad_request("Tag already registered"),
            Err(e) => {
                tracing::error!("注册 Tag 失败: {}", e);
                Response::internal(e.to_string())
            }
        }
    }

    /// 查询历史日志
    fn handle_history(&self, id: &str, limit: usize) -> Response {
        match self.db.is_tag_registered(id) {
            Ok(true) => {}
            Ok(false) => return Response::not_found("Tag not found"),
            Err(e) => return Response::internal(e.to_string()),
        }

        match self.db.get_tag_logs(id, limit) {
            Ok(logs) => Response::History { logs },
            Err(e) => {
                tracing::error!("查询历史失败: {}", e);
                Response::internal(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::TagParser;
    use crate::DbConfig;

    fn setup() -> (Handler, Arc<TagDB>, Arc<StateCache>) {
        let db = Arc::new(TagDB::connect(DbConfig::memory()).unwrap());
        let cache = Arc::new(StateCache::new());
        (Handler::new(db.clone(), cache.clone()), db, cache)
    }

    fn error_code(response: &Response) -> Option<i32> {
        match response {
            Response::Error { code, .. } => Some(*code),
            _ => None,
        }
    }

    #[test]
    fn test_register_then_duplicate() {
        let (handler, _db, _cache) = setup();

        let response = handler.handle(Request::RegisterTag {
            id: "fa451f0755d8".into(),
            description: "forklift".into(),
        });
        match response {
            Response::Tag { tag } => {
                assert_eq!(tag.id, "fa451f0755d8");
                assert_eq!(tag.last_cnt, None);
            }
            other => panic!("Expected Tag, got {:?}", other),
        }

        let response = handler.handle(Request::RegisterTag {
            id: "fa451f0755d8".into(),
            description: "again".into(),
        });
        assert_eq!(error_code(&response), Some(400));
    }

    #[test]
    fn test_register_rejects_invalid_id() {
        let (handler, _db, _cache) = setup();
        for id in ["", "a,b"] {
            let response = handler.handle(Request::RegisterTag {
                id: id.into(),
                description: String::new(),
            });
            assert_eq!(error_code(&response), Some(400));
        }
    }

    #[test]
    fn test_get_unknown_tag_is_404() {
        let (handler, _db, _cache) = setup();
        let response = handler.handle(Request::GetTag { id: "nope".into() });
        assert_eq!(error_code(&response), Some(404));

        let response = handler.handle(Request::GetTagHistory {
            id: "nope".into(),
            limit: None,
        });
        assert_eq!(error_code(&response), Some(404));
    }

    #[test]
    fn test_live_state_reads_cache() {
        let (handler, _db, cache) = setup();
        cache.update(&TagParser::parse("TAG,a,3,20240101120000").unwrap());
        cache.update(&TagParser::parse("TAG,b,4,20240101120000").unwrap());

        match handler.handle(Request::GetLiveState { id: None }) {
            Response::LiveState { entries } => assert_eq!(entries.len(), 2),
            other => panic!("Expected LiveState, got {:?}", other),
        }

        match handler.handle(Request::GetLiveState { id: Some("a".into()) }) {
            Response::LiveState { entries } => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries["a"].last_cnt, 3);
            }
            other => panic!("Expected LiveState, got {:?}", other),
        }

        match handler.handle(Request::GetLiveState { id: Some("zzz".into()) }) {
            Response::LiveState { entries } => assert!(entries.is_empty()),
            other => panic!("Expected LiveState, got {:?}", other),
        }
    }

    #[test]
    fn test_history_limit() {
        let (handler, db, _cache) = setup();
        db.register_tag("a", "").unwrap();
        for cnt in 0..5 {
            let reading = TagParser::parse(&format!("TAG,a,{},20240101120000", cnt)).unwrap();
            db.log_tag_data("a", reading.cnt, reading.timestamp).unwrap();
        }

        match handler.handle(Request::GetTagHistory {
            id: "a".into(),
            limit: Some(2),
        }) {
            Response::History { logs } => {
                assert_eq!(logs.len(), 2);
                assert_eq!(logs[0].cnt, 4);
                assert_eq!(logs[1].cnt, 3);
            }
            other => panic!("Expected History, got {:?}", other),
        }
    }

    #[test]
    fn test_health() {
        let (handler, _db, _cache) = setup();
        match handler.handle(Request::Health) {
            Response::Health { status, timestamp } => {
                assert_eq!(status, "healthy");
                assert!(!timestamp.is_empty());
            }
            other => panic!("Expected Health, got {:?}", other),
        }
    }
}
