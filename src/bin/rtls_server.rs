//! rtls-server - RTLS Tag 接收服务
//!
//! 负责：
//! - UDP 接收 Tag 报文
//! - 维护最近状态缓存
//! - 已注册 Tag 写入历史日志
//! - 查询 / 注册服务

use std::sync::Arc;

use anyhow::{Context, Result};
use rtls_tag_receiver::{
    ApiConfig, ApiServer, DbConfig, Receiver, ReceiverConfig, StateCache, TagDB, VERSION,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("rtls_tag_receiver=info".parse()?))
        .init();

    tracing::info!("🚀 rtls-server v{}", VERSION);

    // 解析配置（非法配置在任何处理开始前失败）
    let db_config = DbConfig::from_env();
    let receiver_config = ReceiverConfig::from_env()?;
    let api_config = ApiConfig::from_env()?;

    let db = Arc::new(TagDB::connect(db_config).context("打开数据库失败")?);
    let cache = Arc::new(StateCache::new());

    let receiver = Arc::new(Receiver::new(receiver_config, cache.clone(), db.clone()));
    let socket = receiver.bind().await.context("绑定 UDP 端口失败")?;

    let api = Arc::new(ApiServer::new(api_config, db, cache, receiver.event_sender()));
    let listener = api.bind().await.context("绑定查询端口失败")?;

    let receiver_task = {
        let receiver = receiver.clone();
        tokio::spawn(async move { receiver.serve(socket).await })
    };
    let api_task = tokio::spawn(api.clone().serve(listener));

    tokio::signal::ctrl_c().await?;
    tracing::info!("收到中断信号，准备退出...");

    receiver.stop();
    api.stop();

    receiver_task.await??;
    api_task.await??;

    tracing::info!("👋 rtls-server exiting");
    Ok(())
}
