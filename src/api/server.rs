//! 查询服务器
//!
//! TCP 服务，处理客户端连接和请求

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;

use super::handler::Handler;
use crate::config::env_or;
use crate::error::Result;
use crate::protocol::{Request, Response, TagEvent};
use crate::state::StateCache;
use crate::TagDB;

/// 客户端关闭写端后，等待剩余响应写出的最长时间
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// 查询服务配置
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// 绑定地址
    pub bind_addr: String,
    /// TCP 端口
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl ApiConfig {
    /// 从环境变量读取（RTLS_API_HOST / RTLS_API_PORT）
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            bind_addr: env_or("RTLS_API_HOST", defaults.bind_addr)?,
            port: env_or("RTLS_API_PORT", defaults.port)?,
        })
    }

    /// `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// 查询服务
pub struct ApiServer {
    config: ApiConfig,
    handler: Arc<Handler>,
    events: broadcast::Sender<TagEvent>,
    shutdown: watch::Sender<bool>,
}

impl ApiServer {
    /// 创建查询服务
    pub fn new(
        config: ApiConfig,
        db: Arc<TagDB>,
        cache: Arc<StateCache>,
        events: broadcast::Sender<TagEvent>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            handler: Arc::new(Handler::new(db, cache)),
            events,
            shutdown,
        }
    }

    /// 绑定 TCP 监听
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.addr();
        let listener = TcpListener::bind(addr.as_str()).await.map_err(|e| {
            tracing::error!("❌ 绑定查询端口失败: {}: {}", addr, e);
            e
        })?;
        Ok(listener)
    }

    /// 绑定并运行，直到 [`stop`](Self::stop)
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// 在已绑定的监听器上接受连接
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let mut shutdown_rx = self.shutdown.subscribe();

        if let Ok(addr) = listener.local_addr() {
            tracing::info!("🚀 查询服务启动: {}", addr);
        }

        while !*shutdown_rx.borrow_and_update() {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            tracing::debug!("📥 新连接: {}", peer);
                            let server = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream).await {
                                    tracing::error!("处理连接失败: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("接受连接失败: {}", e);
                        }
                    }
                }
            }
        }

        tracing::info!("🛑 查询服务已停止");
        Ok(())
    }

    /// 请求停止，同时关闭所有连接
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// 处理单个连接
    async fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut shutdown_rx = self.shutdown.subscribe();

        // 创建消息发送通道
        let (tx, mut rx) = mpsc::channel::<String>(100);

        // 启动发送任务
        let mut write_handle = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if writer.write_all(msg.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let mut forward_handle = None;
        let mut shutting_down = false;

        // 读取请求
        let mut line = String::new();
        loop {
            // 连接建立前服务可能已停止
            if *shutdown_rx.borrow_and_update() {
                shutting_down = true;
                break;
            }

            line.clear();
            let read = tokio::select! {
                read = reader.read_line(&mut line) => read,
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        shutting_down = true;
                        break;
                    }
                    continue;
                }
            };

            match read {
                Ok(0) => {
                    // 连接关闭
                    break;
                }
                Ok(_) => {
                    if line.trim().is_empty() {
                        continue;
                    }

                    let mut subscription = None;
                    let response = match serde_json::from_str::<Request>(&line) {
                        Ok(Request::Subscribe) => {
                            if forward_handle.is_none() {
                                subscription = Some(self.events.subscribe());
                            }
                            Response::Ok
                        }
                        Ok(request) => self.handler.handle(request),
                        Err(e) => {
                            tracing::warn!("解析请求失败: {}", e);
                            Response::bad_request(format!("Invalid JSON: {}", e))
                        }
                    };

                    let resp_json = serde_json::to_string(&response)?;
                    if tx.send(format!("{}\n", resp_json)).await.is_err() {
                        break;
                    }

                    // 先发送 Ok，再开始推送
                    if let Some(events) = subscription {
                        forward_handle = Some(tokio::spawn(forward_events(events, tx.clone())));
                    }
                }
                Err(e) => {
                    tracing::error!("读取失败: {}", e);
                    break;
                }
            }
        }

        // 清理
        if let Some(handle) = forward_handle {
            handle.abort();
            let _ = handle.await;
        }
        drop(tx);

        if shutting_down {
            write_handle.abort();
        } else {
            // 通道关闭后写任务写完剩余响应自行退出
            if timeout(FLUSH_TIMEOUT, &mut write_handle).await.is_err() {
                tracing::warn!("写出剩余响应超时");
                write_handle.abort();
            }
        }
        tracing::debug!("📤 连接关闭");

        Ok(())
    }
}

/// 把变化通知转发给订阅连接
async fn forward_events(mut events: broadcast::Receiver<TagEvent>, tx: mpsc::Sender<String>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let message = match serde_json::to_string(&event.to_push()) {
                    Ok(json) => format!("{}\n", json),
                    Err(e) => {
                        tracing::error!("Failed to serialize event: {}", e);
                        continue;
                    }
                };
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("订阅者处理过慢，丢弃 {} 条推送", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}
