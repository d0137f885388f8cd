//! OSC over UDP

use crate::engine::EventSource;
use crate::error::SourceError;
use crate::event::ControlEvent;
use crate::normalize::{Normalizer, OscNormalizer};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{info, trace};

/// Largest datagram accepted
const MAX_DATAGRAM: usize = 4096;

/// Event source listening for OSC messages on a UDP socket
pub struct OscSource {
    normalizer: OscNormalizer,
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl OscSource {
    pub async fn bind(source_id: &str, addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("Failed to bind OSC socket on {}", addr))?;
        info!("OSC source '{}' listening on {}", source_id, socket.local_addr()?);
        Ok(Self {
            normalizer: OscNormalizer::new(source_id),
            socket,
            buf: vec![0; MAX_DATAGRAM],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl EventSource for OscSource {
    fn source_id(&self) -> &str {
        self.normalizer.source_id()
    }

    async fn poll_next(&mut self) -> Result<ControlEvent, SourceError> {
        loop {
            let (len, peer) = self
                .socket
                .recv_from(&mut self.buf)
                .await
                .map_err(|e| SourceError::disconnected(self.normalizer.source_id(), e.to_string()))?;

            let packet = self.buf[..len].to_vec();
            match self.normalizer.decode(&packet, Instant::now())? {
                Some(event) => return Ok(event),
                None => trace!("Ignoring OSC bundle from {}", peer),
            }
        }
    }
}
