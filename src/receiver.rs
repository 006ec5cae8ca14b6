//! UDP 接收器
//!
//! 单个 tokio 任务运行接收循环，是缓存的唯一写者，也是日志写入的唯一调用方。
//! 每个数据报依次经过：解码 → 解析 → 更新缓存 → （已注册）写日志 → 变化通知。
//!
//! 停止通过 watch 通道实现：接收操作与状态变化一起 `select!`，
//! 调用 [`Receiver::stop`] 会立即唤醒阻塞中的接收。
//! 循环尚未进入 Running 时收到的停止请求会被保留，由下一次 `serve` 消费。

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};

use crate::config::env_or;
use crate::db::TagStore;
use crate::error::{Error, ParseError, Result};
use crate::parser::{TagParser, MAX_DATAGRAM_SIZE};
use crate::protocol::TagEvent;
use crate::state::StateCache;
use crate::types::TagReading;

/// 变化通知通道容量
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// 接收器配置
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// 绑定地址
    pub bind_addr: String,
    /// UDP 端口
    pub port: u16,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl ReceiverConfig {
    /// 从环境变量读取（RTLS_UDP_HOST / RTLS_UDP_PORT）
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            bind_addr: env_or("RTLS_UDP_HOST", defaults.bind_addr)?,
            port: env_or("RTLS_UDP_PORT", defaults.port)?,
        })
    }

    /// `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// 接收器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Stopped,
    Running,
}

/// 持久化结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// 未注册，不写日志
    Unregistered,
    /// 已写入日志
    Logged,
    /// 存储出错（已记录日志，缓存不受影响）
    Failed,
}

/// 单个数据报的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatagramOutcome {
    /// 拒收，缓存未改动
    Rejected(ParseError),
    /// 已接受
    Accepted {
        changed: bool,
        persistence: Persistence,
    },
}

/// Tag UDP 接收器
pub struct Receiver {
    config: ReceiverConfig,
    cache: Arc<StateCache>,
    store: Arc<dyn TagStore>,
    events: broadcast::Sender<TagEvent>,
    state: watch::Sender<ReceiverState>,
    /// 未运行时收到的停止请求（只在 `state` 的写锁内读写）
    stop_pending: AtomicBool,
}

impl Receiver {
    /// 创建接收器（处于 Stopped 状态，尚未绑定 socket）
    pub fn new(config: ReceiverConfig, cache: Arc<StateCache>, store: Arc<dyn TagStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(ReceiverState::Stopped);

        Self {
            config,
            cache,
            store,
            events,
            state,
            stop_pending: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// 共享的状态缓存
    pub fn cache(&self) -> &Arc<StateCache> {
        &self.cache
    }

    /// 订阅计数器变化通知
    pub fn subscribe(&self) -> broadcast::Receiver<TagEvent> {
        self.events.subscribe()
    }

    /// 通知发送端（供查询服务为每个订阅连接创建接收端）
    pub fn event_sender(&self) -> broadcast::Sender<TagEvent> {
        self.events.clone()
    }

    /// 当前状态
    pub fn state(&self) -> ReceiverState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ReceiverState::Running
    }

    /// 绑定 UDP socket
    ///
    /// 失败即为致命错误，调用方不应进入接收循环。
    pub async fn bind(&self) -> Result<UdpSocket> {
        let addr = self.config.addr();
        let socket = UdpSocket::bind(addr.as_str()).await.map_err(|e| {
            tracing::error!("❌ 绑定 UDP 端口失败: {}: {}", addr, e);
            e
        })?;
        Ok(socket)
    }

    /// 绑定并运行接收循环，直到 [`stop`](Self::stop)
    pub async fn start(&self) -> Result<()> {
        let socket = self.bind().await?;
        self.serve(socket).await
    }

    /// 在已绑定的 socket 上运行接收循环
    ///
    /// 返回时 socket 已释放，状态回到 Stopped。
    /// 若在此之前已有未消费的停止请求，直接返回。
    pub async fn serve(&self, socket: UdpSocket) -> Result<()> {
        let mut start = StartOutcome::AlreadyRunning;
        self.state.send_if_modified(|state| {
            if *state != ReceiverState::Stopped {
                return false;
            }
            if self.stop_pending.swap(false, Ordering::AcqRel) {
                start = StartOutcome::StopPending;
                return false;
            }
            *state = ReceiverState::Running;
            start = StartOutcome::Started;
            true
        });
        match start {
            StartOutcome::Started => {}
            StartOutcome::AlreadyRunning => return Err(Error::AlreadyRunning),
            StartOutcome::StopPending => {
                drop(socket);
                tracing::info!("🛑 启动前已收到停止请求，接收循环未运行");
                return Ok(());
            }
        }

        // 任何退出路径（包括 panic）都回到 Stopped
        let _guard = StoppedOnDrop(&self.state);
        let mut state_rx = self.state.subscribe();

        match socket.local_addr() {
            Ok(addr) => tracing::info!("🚀 Tag 接收器启动: {}", addr),
            Err(_) => tracing::info!("🚀 Tag 接收器启动: {}", self.config.addr()),
        }

        // 多留一个字节用于识别超长数据报
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE + 1];

        while *state_rx.borrow_and_update() == ReceiverState::Running {
            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((n, src)) => {
                            self.handle_datagram(&buf[..n], Some(src));
                        }
                        Err(e) => {
                            tracing::warn!("接收失败: {}", e);
                        }
                    }
                }
            }
        }

        drop(socket);
        tracing::info!("🛑 Tag 接收器已停止");
        Ok(())
    }

    /// 请求停止
    ///
    /// Running 时立即转为 Stopped；未运行时请求被保留，下一次 `serve` 直接返回。
    pub fn stop(&self) {
        let stopped = self.state.send_if_modified(|state| {
            if *state == ReceiverState::Running {
                *state = ReceiverState::Stopped;
                true
            } else {
                self.stop_pending.store(true, Ordering::Release);
                false
            }
        });
        if stopped {
            tracing::info!("收到停止请求");
        } else {
            tracing::debug!("接收器未运行，停止请求已保留");
        }
    }

    /// 处理一个原始数据报
    pub fn handle_datagram(&self, data: &[u8], src: Option<SocketAddr>) -> DatagramOutcome {
        tracing::debug!("📥 {} bytes from {:?}", data.len(), src);

        match TagParser::decode(data) {
            Ok(reading) => self.process_reading(&reading),
            Err(e) => {
                let preview = &data[..data.len().min(MAX_DATAGRAM_SIZE)];
                tracing::warn!(
                    "[ERROR] Invalid data from {:?}: {} ({:?})",
                    src,
                    e,
                    String::from_utf8_lossy(preview)
                );
                DatagramOutcome::Rejected(e)
            }
        }
    }

    /// 处理一条已解析的读数
    pub fn process_reading(&self, reading: &TagReading) -> DatagramOutcome {
        let changed = self.cache.update(reading);
        let persistence = self.persist(reading);

        if changed {
            tracing::info!(
                tag_id = %reading.tag_id,
                cnt = reading.cnt,
                timestamp = %reading.timestamp.format("%Y-%m-%dT%H:%M:%S%.3f"),
                "[CNT CHANGED]"
            );
            // 没有订阅者时发送失败，忽略
            let _ = self.events.send(TagEvent::CntChanged {
                tag_id: reading.tag_id.clone(),
                cnt: reading.cnt,
                timestamp: reading.timestamp,
            });
        }

        DatagramOutcome::Accepted {
            changed,
            persistence,
        }
    }

    /// 已注册的 tag 写入日志；存储错误只记录，不向上传播
    fn persist(&self, reading: &TagReading) -> Persistence {
        match self.store.is_tag_registered(&reading.tag_id) {
            Ok(true) => {}
            Ok(false) => return Persistence::Unregistered,
            Err(e) => {
                tracing::error!("查询注册状态失败: tag_id={}, {}", reading.tag_id, e);
                return Persistence::Failed;
            }
        }

        match self
            .store
            .log_tag_data(&reading.tag_id, reading.cnt, reading.timestamp)
        {
            Ok(()) => Persistence::Logged,
            Err(e) => {
                tracing::error!(
                    "写入日志失败: tag_id={}, cnt={}, {}",
                    reading.tag_id,
                    reading.cnt,
                    e
                );
                Persistence::Failed
            }
        }
    }
}

/// `serve` 进入时的状态转换结果
enum StartOutcome {
    Started,
    AlreadyRunning,
    StopPending,
}

/// 离开接收循环时把状态置回 Stopped
struct StoppedOnDrop<'a>(&'a watch::Sender<ReceiverState>);

impl Drop for StoppedOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(ReceiverState::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// 内存存储，可切换为故障模式
    #[derive(Default)]
    struct MemoryStore {
        registered: HashSet<String>,
        logs: Mutex<Vec<(String, i64, NaiveDateTime)>>,
        failing: bool,
    }

    impl MemoryStore {
        fn with_registered(ids: &[&str]) -> Self {
            Self {
                registered: ids.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    impl TagStore for MemoryStore {
        fn is_tag_registered(&self, tag_id: &str) -> Result<bool> {
            Ok(self.registered.contains(tag_id))
        }

        fn log_tag_data(&self, tag_id: &str, cnt: i64, timestamp: NaiveDateTime) -> Result<()> {
            if self.failing {
                return Err(Error::Other(anyhow::anyhow!("disk full")));
            }
            self.logs.lock().push((tag_id.to_string(), cnt, timestamp));
            Ok(())
        }
    }

    fn receiver_with(store: Arc<MemoryStore>) -> Receiver {
        Receiver::new(ReceiverConfig::default(), Arc::new(StateCache::new()), store)
    }

    #[test]
    fn test_rejected_datagram_leaves_cache_untouched() {
        let receiver = receiver_with(Arc::new(MemoryStore::default()));

        let outcome = receiver.handle_datagram(b"TAG,abc", None);
        assert_eq!(outcome, DatagramOutcome::Rejected(ParseError::FieldCount(2)));

        let outcome = receiver.handle_datagram(&[0xC3, 0x28], None);
        assert_eq!(outcome, DatagramOutcome::Rejected(ParseError::InvalidEncoding));

        assert!(receiver.cache().is_empty());
    }

    #[test]
    fn test_unregistered_tag_updates_cache_only() {
        let store = Arc::new(MemoryStore::default());
        let receiver = receiver_with(store.clone());

        let outcome = receiver.handle_datagram(b"TAG,abc,1,20240101120000", None);
        assert_eq!(
            outcome,
            DatagramOutcome::Accepted {
                changed: true,
                persistence: Persistence::Unregistered,
            }
        );
        assert_eq!(receiver.cache().get("abc").unwrap().last_cnt, 1);
        assert!(store.logs.lock().is_empty());
    }

    #[test]
    fn test_registered_tag_is_logged_every_time() {
        let store = Arc::new(MemoryStore::with_registered(&["abc"]));
        let receiver = receiver_with(store.clone());

        receiver.handle_datagram(b"TAG,abc,5,20240101120000.100", None);
        let outcome = receiver.handle_datagram(b"TAG,abc,5,20240101120001.100", None);

        // 计数器未变仍然写日志
        assert_eq!(
            outcome,
            DatagramOutcome::Accepted {
                changed: false,
                persistence: Persistence::Logged,
            }
        );
        assert_eq!(store.logs.lock().len(), 2);
    }

    #[test]
    fn test_store_failure_keeps_cache() {
        let store = Arc::new(MemoryStore {
            failing: true,
            ..MemoryStore::with_registered(&["abc"])
        });
        let receiver = receiver_with(store);

        let outcome = receiver.handle_datagram(b"TAG,abc,7,20240101120000", None);
        assert_eq!(
            outcome,
            DatagramOutcome::Accepted {
                changed: true,
                persistence: Persistence::Failed,
            }
        );
        assert_eq!(receiver.cache().get("abc").unwrap().last_cnt, 7);
    }

    #[test]
    fn test_notification_only_on_change() {
        let receiver = receiver_with(Arc::new(MemoryStore::default()));
        let mut events = receiver.subscribe();

        receiver.handle_datagram(b"TAG,abc,1,20240101120000", None);
        receiver.handle_datagram(b"TAG,abc,1,20240101120001", None);
        receiver.handle_datagram(b"TAG,abc,0,20240101120002", None);

        let first = events.try_recv().unwrap();
        assert!(matches!(first, TagEvent::CntChanged { cnt: 1, .. }));
        let second = events.try_recv().unwrap();
        assert!(matches!(second, TagEvent::CntChanged { cnt: 0, .. }));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_stop_when_stopped_keeps_state() {
        let receiver = receiver_with(Arc::new(MemoryStore::default()));
        assert_eq!(receiver.state(), ReceiverState::Stopped);
        receiver.stop();
        assert_eq!(receiver.state(), ReceiverState::Stopped);
        assert!(receiver.stop_pending.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_pending_stop_is_consumed_once() {
        let receiver = Arc::new(receiver_with(Arc::new(MemoryStore::default())));
        receiver.stop();

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        receiver.serve(socket).await.unwrap();
        assert_eq!(receiver.state(), ReceiverState::Stopped);
        assert!(!receiver.stop_pending.load(Ordering::Acquire));

        // 请求已消费，下一次 serve 正常运行
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let handle = {
            let receiver = receiver.clone();
            tokio::spawn(async move { receiver.serve(socket).await })
        };
        while !receiver.is_running() {
            tokio::task::yield_now().await;
        }
        receiver.stop();
        handle.await.unwrap().unwrap();
        assert!(!receiver.stop_pending.load(Ordering::Acquire));
    }

    #[test]
    fn test_config_addr() {
        let config = ReceiverConfig {
            bind_addr: "127.0.0.1".into(),
            port: 5005,
        };
        assert_eq!(config.addr(), "127.0.0.1:5005");
        assert_eq!(ReceiverConfig::default().addr(), "0.0.0.0:5000");
    }
}
