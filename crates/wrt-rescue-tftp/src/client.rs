//! Built-in TFTP write client.
//!
//! Sends the file with a WRQ, follows the server onto its transfer port
//! (the first reply comes from a fresh TID), and pushes DATA blocks in
//! lock-step with ACKs. A file whose size is an exact multiple of the block
//! size ends with an empty DATA block.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};
use wrt_rescue_core::TransferOutcome;
use wrt_rescue_core::config::TransferConfig;

use crate::error::{Result, TftpError};
use crate::packet::{self, DEFAULT_BLOCK_SIZE, Reply, WriteOptions};
use crate::transport::Transport;

const MAX_RETRIES: u32 = 5;
const RECV_BUFFER_BYTES: usize = 512 * 1024;

#[derive(Debug, Clone)]
pub struct NativeTransport {
    server: SocketAddr,
    block_size: usize,
    block_timeout: Duration,
}

impl NativeTransport {
    pub fn new(config: &TransferConfig, target: Ipv4Addr) -> Self {
        Self {
            server: SocketAddr::from((target, config.port)),
            block_size: config.block_size,
            block_timeout: Duration::from_secs(config.block_timeout_secs),
        }
    }

    /// Per-packet wait before a retransmit
    pub fn with_block_timeout(mut self, block_timeout: Duration) -> Self {
        self.block_timeout = block_timeout;
        self
    }

    /// Write `local_file` to the server as `remote_file`, returning the bytes sent
    pub async fn put(&self, local_file: &Path, remote_file: &str) -> Result<u64> {
        let mut file = File::open(local_file).await?;
        let file_size = file.metadata().await?.len();

        let socket = open_socket()?;
        debug!(
            "Sending {} ({} bytes) to {} from {:?}",
            remote_file,
            file_size,
            self.server,
            socket.local_addr()?
        );

        let wrq = packet::encode_wrq(
            remote_file,
            &WriteOptions {
                block_size: self.block_size,
                timeout_secs: self.block_timeout.as_secs().max(1),
                transfer_size: file_size,
            },
        );

        let (block_size, peer) = self.negotiate(&socket, &wrq).await?;
        debug!("Server {} accepted write, block size {}", peer, block_size);

        let mut block_num = 1u16;
        let mut total_bytes = 0u64;
        let mut data = vec![0u8; block_size];
        let start_time = std::time::Instant::now();

        loop {
            let bytes_read = read_block(&mut file, &mut data).await?;
            let payload = packet::encode_data(block_num, &data[..bytes_read]);
            self.send_block(&socket, peer, block_num, &payload).await?;
            total_bytes += bytes_read as u64;

            if bytes_read < block_size {
                break;
            }
            block_num = block_num.wrapping_add(1);
        }

        info!(
            "Transfer complete: {} bytes in {:.2}s",
            total_bytes,
            start_time.elapsed().as_secs_f64()
        );
        Ok(total_bytes)
    }

    /// Send the WRQ until the server answers; yields the agreed block size and the server TID
    async fn negotiate(&self, socket: &UdpSocket, wrq: &[u8]) -> Result<(usize, SocketAddr)> {
        for attempt in 1..=MAX_RETRIES {
            socket.send_to(wrq, self.server).await?;

            let Some((reply, from)) = self.recv_reply(socket, None).await? else {
                warn!(
                    "No answer to write request, retrying ({}/{})",
                    attempt, MAX_RETRIES
                );
                continue;
            };

            let block_size = match reply {
                Reply::Ack(0) => DEFAULT_BLOCK_SIZE,
                Reply::Ack(n) => {
                    return Err(TftpError::Tftp(format!("Expected ACK 0, got {}", n)));
                }
                Reply::Oack(options) => self.accepted_block_size(options.get("blksize"))?,
                Reply::Error { code, message } => {
                    return Err(TftpError::Remote { code, message });
                }
            };
            return Ok((block_size, from));
        }

        Err(TftpError::NoResponse(MAX_RETRIES))
    }

    fn accepted_block_size(&self, offered: Option<&String>) -> Result<usize> {
        let Some(value) = offered else {
            return Ok(DEFAULT_BLOCK_SIZE);
        };
        match value.parse::<usize>() {
            Ok(size) if (8..=self.block_size).contains(&size) => Ok(size),
            _ => Err(TftpError::Tftp(format!(
                "Server offered unusable blksize {}",
                value
            ))),
        }
    }

    async fn send_block(
        &self,
        socket: &UdpSocket,
        peer: SocketAddr,
        block_num: u16,
        payload: &[u8],
    ) -> Result<()> {
        for attempt in 1..=MAX_RETRIES {
            socket.send_to(payload, peer).await?;

            let deadline = Instant::now() + self.block_timeout;
            loop {
                match self.recv_until(socket, Some(peer), deadline).await? {
                    Some((Reply::Ack(n), _)) if n == block_num => return Ok(()),
                    // Duplicate ACK for an earlier block
                    Some((Reply::Ack(_), _)) | Some((Reply::Oack(_), _)) => continue,
                    Some((Reply::Error { code, message }, _)) => {
                        return Err(TftpError::Remote { code, message });
                    }
                    None => break,
                }
            }
            warn!(
                "Timeout waiting for ACK {}, retrying ({}/{})",
                block_num, attempt, MAX_RETRIES
            );
        }

        Err(TftpError::NoResponse(MAX_RETRIES))
    }

    async fn recv_reply(
        &self,
        socket: &UdpSocket,
        peer: Option<SocketAddr>,
    ) -> Result<Option<(Reply, SocketAddr)>> {
        self.recv_until(socket, peer, Instant::now() + self.block_timeout)
            .await
    }

    /// Next parseable reply from the expected sender, or `None` once `deadline` passes.
    /// Before the TID is known any port on the server's address is accepted.
    async fn recv_until(
        &self,
        socket: &UdpSocket,
        peer: Option<SocketAddr>,
        deadline: Instant,
    ) -> Result<Option<(Reply, SocketAddr)>> {
        let mut buf = vec![0u8; 1024];
        loop {
            let (len, from) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => return Ok(None),
            };

            let expected = match peer {
                Some(peer) => from == peer,
                None => from.ip() == self.server.ip(),
            };
            if !expected {
                debug!("Ignoring packet from unexpected source {}", from);
                continue;
            }

            match packet::parse_reply(&buf[..len]) {
                Ok(reply) => return Ok(Some((reply, from))),
                Err(e) => debug!("Ignoring malformed reply from {}: {}", from, e),
            }
        }
    }
}

#[async_trait]
impl Transport for NativeTransport {
    fn name(&self) -> &str {
        "built-in tftp"
    }

    async fn send(&self, file: &Path, remote_name: &str) -> TransferOutcome {
        match self.put(file, remote_name).await {
            Ok(_) => TransferOutcome::Success,
            Err(TftpError::NoResponse(_)) => TransferOutcome::Timeout,
            Err(e) => TransferOutcome::Failed {
                code: None,
                detail: e.to_string(),
            },
        }
    }
}

fn open_socket() -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_recv_buffer_size(RECV_BUFFER_BYTES)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)).into())?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

/// Fill `buf` from the file; short only at end of file
async fn read_block(file: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(block_size: usize) -> NativeTransport {
        let config = TransferConfig {
            block_size,
            ..Default::default()
        };
        NativeTransport::new(&config, Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn missing_blksize_in_oack_falls_back_to_default() {
        assert_eq!(transport(1468).accepted_block_size(None).unwrap(), 512);
    }

    #[test]
    fn server_may_lower_but_not_raise_block_size() {
        let t = transport(1468);
        assert_eq!(t.accepted_block_size(Some(&"1024".into())).unwrap(), 1024);
        assert!(t.accepted_block_size(Some(&"4096".into())).is_err());
        assert!(t.accepted_block_size(Some(&"4".into())).is_err());
        assert!(t.accepted_block_size(Some(&"big".into())).is_err());
    }

    #[tokio::test]
    async fn read_block_fills_across_short_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        std::fs::write(&path, vec![7u8; 1000]).unwrap();

        let mut file = File::open(&path).await.unwrap();
        let mut buf = vec![0u8; 600];
        assert_eq!(read_block(&mut file, &mut buf).await.unwrap(), 600);
        assert_eq!(read_block(&mut file, &mut buf).await.unwrap(), 400);
        assert_eq!(read_block(&mut file, &mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_file_is_a_failed_attempt() {
        let outcome = transport(512)
            .send(Path::new("/nonexistent/wrt-rescue/fw.bin"), "fw.bin")
            .await;
        assert!(matches!(outcome, TransferOutcome::Failed { code: None, .. }));
    }
}
