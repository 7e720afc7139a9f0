// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefixed JSON framing over TCP.
//!
//! ```text
//! +----------------+-------------------+
//! | Length (4B BE) | JSON payload      |
//! +----------------+-------------------+
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// A framed connection, used on both the dispatch side and the locator
/// client side.
pub struct FramedConnection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    max_frame_size: usize,
    read_buffer: Vec<u8>,
}

impl FramedConnection {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, max_frame_size: usize) -> Self {
        Self {
            stream,
            peer_addr,
            max_frame_size,
            read_buffer: Vec::with_capacity(4096),
        }
    }

    /// Connect to `authority` (`host:port`).
    pub async fn connect(authority: &str, max_frame_size: usize) -> Result<Self, ConnectionError> {
        let stream = TcpStream::connect(authority).await?;
        stream.set_nodelay(true).ok();
        let peer_addr = stream.peer_addr()?;
        Ok(Self::new(stream, peer_addr, max_frame_size))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Read one frame.
    ///
    /// Returns `Ok(None)` if the peer closed the connection between frames.
    pub async fn read_frame<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ConnectionError> {
        let mut len_buf = [0u8; 4];
        match self.stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len == 0 {
            return Err(ConnectionError::Protocol("Empty frame".into()));
        }
        if len > self.max_frame_size {
            return Err(ConnectionError::Protocol(format!(
                "Frame too large: {} > {}",
                len, self.max_frame_size
            )));
        }

        self.read_buffer.clear();
        self.read_buffer.resize(len, 0);
        self.stream.read_exact(&mut self.read_buffer).await?;

        let frame = serde_json::from_slice(&self.read_buffer)
            .map_err(|e| ConnectionError::Protocol(format!("Invalid JSON: {}", e)))?;

        Ok(Some(frame))
    }

    /// Write one frame.
    pub async fn write_frame<T: Serialize>(&mut self, frame: &T) -> Result<(), ConnectionError> {
        let json = serde_json::to_vec(frame)
            .map_err(|e| ConnectionError::Protocol(format!("Serialize error: {}", e)))?;

        if json.len() > self.max_frame_size {
            return Err(ConnectionError::Protocol(format!(
                "Frame too large: {} > {}",
                json.len(),
                self.max_frame_size
            )));
        }

        let len = json.len() as u32;
        self.stream.write_all(&len.to_be_bytes()).await?;
        self.stream.write_all(&json).await?;
        self.stream.flush().await?;

        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ConnectionError> {
        self.stream.shutdown().await.map_err(ConnectionError::from)
    }
}

/// Connection error types.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),
}
