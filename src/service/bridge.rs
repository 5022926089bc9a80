//! 遊戲 bridge socket
//!
//! 入站：完整遊戲狀態的 JSON 文件，可能分多次到達、也可能多份黏在一起；
//! 以 `serde_json` 的串流反序列化逐份切出。
//! 出站：純 UTF-8 指令字串（不加換行）。
//!
//! 讀取逾時只記錄並重試；讀到 0 bytes 視為連線關閉。

use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;

use crate::game::GameMessage;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("malformed game state: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// 連線已不可用，worker 應結束迴圈
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BridgeError::Json(_))
    }
}

pub struct Bridge<S = TcpStream> {
    stream: S,
    pending: Vec<u8>,
    read_timeout: Duration,
}

impl Bridge<TcpStream> {
    pub async fn connect<A: ToSocketAddrs>(addr: A, read_timeout: Duration) -> Result<Self, BridgeError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, read_timeout))
    }
}

impl<S> Bridge<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, read_timeout: Duration) -> Self {
        Self {
            stream,
            pending: Vec::with_capacity(READ_CHUNK),
            read_timeout,
        }
    }

    /// 嘗試從已緩衝的資料切出一份完整文件
    ///
    /// 資料不完整回傳 `Ok(None)`。語法錯誤時只丟棄壞掉的那一段，
    /// 之後若還有資料就繼續解析；沒有其他資料才回傳錯誤。
    fn take_document(&mut self) -> Result<Option<Value>, BridgeError> {
        loop {
            let mut iter = serde_json::Deserializer::from_slice(&self.pending).into_iter::<Value>();
            match iter.next() {
                Some(Ok(value)) => {
                    let consumed = iter.byte_offset();
                    self.pending.drain(..consumed);
                    return Ok(Some(value));
                }
                Some(Err(e)) if e.is_eof() => return Ok(None),
                Some(Err(e)) => {
                    self.skip_malformed();
                    if self.pending.iter().all(u8::is_ascii_whitespace) {
                        self.pending.clear();
                        return Err(BridgeError::Json(e));
                    }
                    warn!("skipping malformed game state: {}", e);
                }
                None => {
                    // 只有空白
                    self.pending.clear();
                    return Ok(None);
                }
            }
        }
    }

    /// 丟棄壞文件的開頭，直到下一個換行或 `{`
    fn skip_malformed(&mut self) {
        let start = self
            .pending
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(self.pending.len());
        let resync = self.pending[start..]
            .iter()
            .skip(1)
            .position(|&b| b == b'\n' || b == b'{')
            .map(|offset| start + 1 + offset)
            .unwrap_or(self.pending.len());
        self.pending.drain(..resync);
    }

    /// 讀取下一份遊戲狀態
    pub async fn receive(&mut self) -> Result<GameMessage, BridgeError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(value) = self.take_document()? {
                return Ok(GameMessage::new(value));
            }
            match timeout(self.read_timeout, self.stream.read(&mut chunk)).await {
                Err(_) => {
                    warn!("timeout while receiving game state, retrying");
                    continue;
                }
                Ok(Ok(0)) => return Err(BridgeError::ConnectionClosed),
                Ok(Ok(n)) => {
                    debug!("received {} bytes", n);
                    self.pending.extend_from_slice(&chunk[..n]);
                }
                Ok(Err(e)) => return Err(BridgeError::Io(e)),
            }
        }
    }

    pub async fn send(&mut self, command: &str) -> Result<(), BridgeError> {
        self.stream.write_all(command.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// 送出指令並讀取回應的狀態
    pub async fn exchange(&mut self, command: &str) -> Result<GameMessage, BridgeError> {
        self.send(command).await?;
        self.receive().await
    }
}

// ============================================================================
// 單元測試
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn pair() -> (Bridge<tokio::io::DuplexStream>, tokio::io::DuplexStream) {
        let (a, b) = duplex(1 << 16);
        (Bridge::new(a, Duration::from_millis(50)), b)
    }

    #[tokio::test]
    async fn test_receive_split_document() {
        let (mut bridge, mut game) = pair();
        let writer = tokio::spawn(async move {
            game.write_all(br#"{"in_game": true, "#).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            game.write_all(br#""available_commands": ["play"]}"#).await.unwrap();
            game
        });
        let msg = bridge.receive().await.unwrap();
        assert_eq!(msg.available_commands().collect::<Vec<_>>(), vec!["play"]);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_receive_concatenated_documents() {
        let (mut bridge, mut game) = pair();
        game.write_all(b"{\"a\":1}\n{\"a\":2}").await.unwrap();
        assert_eq!(bridge.receive().await.unwrap().raw()["a"], 1);
        assert_eq!(bridge.receive().await.unwrap().raw()["a"], 2);
    }

    #[tokio::test]
    async fn test_timeout_is_retried() {
        let (mut bridge, mut game) = pair();
        let writer = tokio::spawn(async move {
            // 超過兩次讀取逾時才送資料
            tokio::time::sleep(Duration::from_millis(120)).await;
            game.write_all(br#"{"ok": true}"#).await.unwrap();
            game
        });
        let msg = bridge.receive().await.unwrap();
        assert_eq!(msg.raw()["ok"], true);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_connection_is_fatal() {
        let (mut bridge, game) = pair();
        drop(game);
        let err = bridge.receive().await.unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionClosed));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_malformed_document_recovers() {
        let (mut bridge, mut game) = pair();
        game.write_all(b"{]").await.unwrap();
        let err = bridge.receive().await.unwrap_err();
        assert!(!err.is_fatal());
        game.write_all(br#"{"ok": 1}"#).await.unwrap();
        assert_eq!(bridge.receive().await.unwrap().raw()["ok"], 1);
    }

    #[tokio::test]
    async fn test_malformed_document_keeps_following_state() {
        let (mut bridge, mut game) = pair();
        game.write_all(b"{]\n{\"ok\":1}").await.unwrap();
        assert_eq!(bridge.receive().await.unwrap().raw()["ok"], 1);
    }

    #[tokio::test]
    async fn test_malformed_prefix_before_brace() {
        let (mut bridge, mut game) = pair();
        game.write_all(b"garbage{\"ok\":2}").await.unwrap();
        assert_eq!(bridge.receive().await.unwrap().raw()["ok"], 2);
    }

    #[tokio::test]
    async fn test_send_has_no_newline() {
        let (mut bridge, mut game) = pair();
        bridge.send("PLAY 3 1").await.unwrap();
        let mut buf = [0u8; 16];
        let n = game.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"PLAY 3 1");
    }
}
