//! Channel shim
//!
//! The protocol sees a reliable byte stream with a tiny framing discipline:
//! 8-byte tags bracketing each stream (hello/bye-bye), 8-byte success/fail
//! tags inside the vector-OLE, and packed vectors of field elements.
//!
//! Field elements travel in **native** byte order. That is legal because
//! every connection starts with a ping/pong handshake whose two 64-bit
//! constants must be read back byte-identically, so a pair of peers that
//! disagree on endianness cannot get past the handshake.
//!
//! [`Channel`] is generic over the stream so the protocol and its tests run
//! equally over TCP sockets and in-process duplex pipes.

use std::io;
use std::net::Ipv4Addr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::field::Zp;

/// Sent by the connecting side immediately after connect.
pub const PING: u64 = 0x42de0135245310ed;
/// The listening side's response to a valid ping.
pub const PONG: u64 = 0x4201356738573920;
/// Opens every protocol stream.
pub const HELLO: u64 = 0x4242424242424242;
/// Closes every protocol stream.
pub const BYE_BYE: u64 = 0x8888888888888888;
/// Bob decoded his vector-OLE successfully.
pub const VEC_OLE_SUCCESS: u64 = 0x6666666666666666;
/// Bob's decoding failed; the vector-OLE is retried.
pub const VEC_OLE_FAIL: u64 = 0x0000000000000000;

/// Upper bound on a single read while discarding skipped bytes.
const SKIP_CHUNK: usize = 1 << 20;

/// Transport failure on one channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),
    #[error("bad {0} tag: misaligned stream?")]
    BadTag(&'static str),
    #[error("endianness handshake failed")]
    Handshake,
}

/// A framed stream of tags and field-element vectors.
pub struct Channel<S> {
    stream: S,
    scratch: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Channel<S> {
    pub fn new(stream: S) -> Self {
        Channel { stream, scratch: Vec::new() }
    }

    /// Send one 8-byte tag.
    pub async fn send_tag(&mut self, tag: u64) -> Result<(), ChannelError> {
        self.stream.write_all(&tag.to_ne_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive one 8-byte tag.
    pub async fn recv_tag(&mut self) -> Result<u64, ChannelError> {
        let mut buf = [0u8; 8];
        self.stream.read_exact(&mut buf).await?;
        Ok(u64::from_ne_bytes(buf))
    }

    /// Receive a tag and require it to equal `expected`.
    pub async fn expect_tag(&mut self, expected: u64, what: &'static str) -> Result<(), ChannelError> {
        if self.recv_tag().await? != expected {
            return Err(ChannelError::BadTag(what));
        }
        Ok(())
    }

    /// Send a packed vector of field elements.
    pub async fn send_elements(&mut self, elements: &[Zp]) -> Result<(), ChannelError> {
        self.scratch.clear();
        self.scratch.reserve(elements.len() * 4);
        for z in elements {
            self.scratch.extend_from_slice(&z.raw().to_ne_bytes());
        }
        self.stream.write_all(&self.scratch).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive exactly `out.len()` field elements.
    pub async fn recv_elements(&mut self, out: &mut [Zp]) -> Result<(), ChannelError> {
        self.scratch.clear();
        self.scratch.resize(out.len() * 4, 0);
        self.stream.read_exact(&mut self.scratch).await?;
        for (slot, bytes) in out.iter_mut().zip(self.scratch.chunks_exact(4)) {
            let raw = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            *slot = Zp::new(raw);
        }
        Ok(())
    }

    /// Receive and discard `count` field elements. This is the receiving end
    /// of the emulated oblivious transfer: the peer sends the codeword twice
    /// and the first copy is dropped unread.
    pub async fn skip_elements(&mut self, count: usize) -> Result<(), ChannelError> {
        let mut remaining = count * 4;
        self.scratch.clear();
        self.scratch.resize(remaining.min(SKIP_CHUNK), 0);
        while remaining != 0 {
            let take = remaining.min(self.scratch.len());
            self.stream.read_exact(&mut self.scratch[..take]).await?;
            remaining -= take;
        }
        Ok(())
    }
}

/// Bind `port` on all interfaces, accept one peer and answer its ping.
pub async fn listen_for_peer(port: u16) -> Result<Channel<TcpStream>, ChannelError> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    let (stream, _) = listener.accept().await?;
    stream.set_nodelay(true)?;
    let mut channel = Channel::new(stream);
    match channel.recv_tag().await {
        Ok(tag) if tag == PING => {}
        Ok(_) => return Err(ChannelError::Handshake),
        Err(e) => return Err(e),
    }
    channel.send_tag(PONG).await?;
    Ok(channel)
}

/// Connect to the peer at `addr:port` and run the ping/pong handshake.
pub async fn connect_to_peer(addr: Ipv4Addr, port: u16) -> Result<Channel<TcpStream>, ChannelError> {
    let stream = TcpStream::connect((addr, port)).await?;
    stream.set_nodelay(true)?;
    let mut channel = Channel::new(stream);
    channel.send_tag(PING).await?;
    match channel.recv_tag().await {
        Ok(tag) if tag == PONG => Ok(channel),
        Ok(_) => Err(ChannelError::Handshake),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[tokio::test]
    async fn tags_and_elements_round_trip() {
        let (left, right) = tokio::io::duplex(1 << 16);
        let mut sender = Channel::new(left);
        let mut receiver = Channel::new(right);

        let mut rng = StdRng::seed_from_u64(90);
        let mut payload = vec![Zp::ZERO; 257];
        Zp::fill_uniform(&mut payload, &mut rng);

        sender.send_tag(HELLO).await.unwrap();
        sender.send_elements(&payload).await.unwrap();
        sender.send_tag(BYE_BYE).await.unwrap();

        receiver.expect_tag(HELLO, "hello").await.unwrap();
        let mut received = vec![Zp::ZERO; 257];
        receiver.recv_elements(&mut received).await.unwrap();
        assert_eq!(received, payload);
        receiver.expect_tag(BYE_BYE, "bye-bye").await.unwrap();
    }

    #[tokio::test]
    async fn skip_discards_the_ot_decoy() {
        let (left, right) = tokio::io::duplex(1 << 16);
        let mut sender = Channel::new(left);
        let mut receiver = Channel::new(right);

        let decoy = vec![Zp::new(1); 100];
        let real = vec![Zp::new(2); 100];
        sender.send_elements(&decoy).await.unwrap();
        sender.send_elements(&real).await.unwrap();

        receiver.skip_elements(100).await.unwrap();
        let mut received = vec![Zp::ZERO; 100];
        receiver.recv_elements(&mut received).await.unwrap();
        assert_eq!(received, real);
    }

    #[tokio::test]
    async fn wrong_tag_is_reported() {
        let (left, right) = tokio::io::duplex(64);
        let mut sender = Channel::new(left);
        let mut receiver = Channel::new(right);
        sender.send_tag(PING).await.unwrap();
        assert!(matches!(
            receiver.expect_tag(HELLO, "hello").await,
            Err(ChannelError::BadTag("hello"))
        ));
    }
}
