//! stdin/stdout ↔ TCP 中繼
//!
//! 遊戲模組把本程序當成子程序啟動：
//! 1. 從起始埠往上找第一個可綁定的埠，把埠號印到 stdout
//! 2. 一次服務一個 client
//! 3. stdin 的每一行（非空且為合法 JSON）轉送給 client
//! 4. client 的回覆（一條指令）寫回 stdout 並換行
//!
//! client 逾時未回覆時直接處理下一份狀態。stdout 是遊戲通道，日誌只走 stderr。

use std::io;
use std::time::Duration;

use log::{info, warn};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    Lines,
};
use tokio::net::TcpListener;
use tokio::time::timeout;

const MAX_PORT_PROBES: u16 = 1000;
const REPLY_CHUNK: usize = 4096;

/// 從 `start` 開始找第一個可綁定的埠，回傳已綁定的 listener
pub async fn bind_free_port(host: &str, start: u16) -> io::Result<TcpListener> {
    let mut port = start;
    for _ in 0..MAX_PORT_PROBES {
        match TcpListener::bind((host, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                warn!("port {} unavailable ({}), trying next", port, e);
                port = match port.checked_add(1) {
                    Some(p) => p,
                    None => break,
                };
            }
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AddrInUse,
        format!("no free port from {}", start),
    ))
}

/// 一個 client 連線的結束原因
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// stdin 已關閉，整個中繼應結束
    InputClosed,
    /// client 斷線，等待下一個 client
    ClientClosed,
}

/// 服務單一 client，直到 stdin 或 client 關閉
pub async fn relay_session<R, W, C>(
    input: &mut Lines<R>,
    output: &mut W,
    client: &mut C,
    reply_timeout: Duration,
) -> io::Result<SessionEnd>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    C: AsyncRead + AsyncWrite + Unpin,
{
    let mut reply = vec![0u8; REPLY_CHUNK];
    while let Some(line) = input.next_line().await? {
        let state = line.trim();
        if state.is_empty() {
            continue;
        }
        if serde_json::from_str::<serde_json::Value>(state).is_err() {
            warn!("invalid JSON from game, waiting for the next update");
            continue;
        }

        client.write_all(state.as_bytes()).await?;
        client.flush().await?;

        match timeout(reply_timeout, client.read(&mut reply)).await {
            Err(_) => {
                warn!("no reply from client within {:?}, reading next state", reply_timeout);
            }
            Ok(Ok(0)) => return Ok(SessionEnd::ClientClosed),
            Ok(Ok(n)) => {
                let command = String::from_utf8_lossy(&reply[..n]);
                info!("command from client: {}", command);
                output.write_all(command.as_bytes()).await?;
                output.write_all(b"\n").await?;
                output.flush().await?;
            }
            Ok(Err(e)) => {
                warn!("client read error: {}", e);
                return Ok(SessionEnd::ClientClosed);
            }
        }
    }
    Ok(SessionEnd::InputClosed)
}

/// 中繼主迴圈：綁埠、公告埠號、逐一服務 client
pub async fn run(host: &str, start_port: u16, reply_timeout: Duration) -> io::Result<()> {
    let listener = bind_free_port(host, start_port).await?;
    let port = listener.local_addr()?.port();

    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("{}\n", port).as_bytes()).await?;
    stdout.flush().await?;
    info!("relay listening on port {}", port);

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let (mut client, addr) = listener.accept().await?;
        client.set_nodelay(true)?;
        info!("accepted client {}", addr);
        match relay_session(&mut input, &mut stdout, &mut client, reply_timeout).await? {
            SessionEnd::InputClosed => {
                info!("game input closed, relay exiting");
                return Ok(());
            }
            SessionEnd::ClientClosed => info!("client {} disconnected", addr),
        }
    }
}

// ============================================================================
// 單元測試
// ============================================================================
