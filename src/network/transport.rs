use log::{debug, info};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::utils::{P2PError, Result};

/// Length-prefixed JSON framing over TCP.
pub struct Transport;

impl Transport {
    pub async fn connect(addr: &str, connect_timeout: Duration) -> Result<TcpStream> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| P2PError::ConnectionFailed(format!("Timed out connecting to {}", addr)))?
            .map_err(|e| {
                P2PError::ConnectionFailed(format!("Failed to connect to {}: {}", addr, e))
            })?;

        stream
            .set_nodelay(true)
            .map_err(|e| P2PError::NetworkError(format!("Failed to set TCP_NODELAY: {}", e)))?;

        debug!("Connected to {}", addr);
        Ok(stream)
    }

    pub async fn listen(addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| P2PError::NetworkError(format!("Failed to bind to {}: {}", addr, e)))?;

        info!("Listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    pub async fn send_data(stream: &mut TcpStream, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| P2PError::MessageTooLarge(data.len()))?;
        stream.write_u32(len).await?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    pub async fn receive_data(stream: &mut TcpStream, max_size: usize) -> Result<Vec<u8>> {
        let len = stream.read_u32().await? as usize;

        if len > max_size {
            return Err(P2PError::MessageTooLarge(len));
        }

        let mut buffer = vec![0u8; len];
        stream.read_exact(&mut buffer).await?;

        Ok(buffer)
    }

    pub async fn send_message<T: Serialize>(stream: &mut TcpStream, message: &T) -> Result<()> {
        let serialized = serde_json::to_vec(message)?;
        Self::send_data(stream, &serialized).await
    }

    pub async fn receive_message<T: DeserializeOwned>(
        stream: &mut TcpStream,
        max_size: usize,
    ) -> Result<T> {
        let buffer = Self::receive_data(stream, max_size).await?;
        Ok(serde_json::from_slice(&buffer)?)
    }
}
