//! Tag 模拟器
//!
//! 周期性向接收器发送模拟的 Tag 报文，每次发送计数器加一

use std::net::UdpSocket;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

/// 模拟的 Tag ID
const TAG_IDS: [&str; 3] = ["fa451f0755d8", "ab123c456def", "cd789e012fab"];

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "-h" || a == "--help") {
        eprintln!("用法: {} [host:port] [interval_ms]", args[0]);
        eprintln!("例: {} 127.0.0.1:5000 1000", args[0]);
        return Ok(());
    }

    let target = args.get(1).map(String::as_str).unwrap_or("127.0.0.1:5000");
    let interval_ms: u64 = match args.get(2) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("无效的发送间隔: {}", raw))?,
        None => 1000,
    };

    let socket = UdpSocket::bind("0.0.0.0:0").context("创建 UDP socket 失败")?;
    let mut counters = [0i64; TAG_IDS.len()];

    println!("Tag 模拟器启动 - 发送到 {}", target);
    println!("模拟 {} 个 Tag: {:?}", TAG_IDS.len(), TAG_IDS);
    println!("{}", "-".repeat(60));

    loop {
        for (tag_id, cnt) in TAG_IDS.iter().zip(counters.iter_mut()) {
            *cnt += 1;
            let message = format_message(tag_id, *cnt, chrono::Local::now().naive_local());

            match socket.send_to(message.as_bytes(), target) {
                Ok(_) => println!("[SENT] {}", message),
                Err(e) => eprintln!("发送失败 {}: {}", target, e),
            }
        }
        thread::sleep(Duration::from_millis(interval_ms));
    }
}

/// `TAG,<tag_id>,<cnt>,<YYYYMMDDHHMMSS.mmm>`
fn format_message(tag_id: &str, cnt: i64, now: chrono::NaiveDateTime) -> String {
    format!("TAG,{},{},{}", tag_id, cnt, now.format("%Y%m%d%H%M%S%.3f"))
}
