use crate::codec::{read_varint, varint_len, write_varint, CodecError};
use aes::cipher::{generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes128;
use bytes::{Buf, BytesMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read as _, Write as _};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::trace;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection closed")]
    Closed,
    #[error("corrupt frame: {0}")]
    CorruptFrame(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

type Aes128Cfb8Enc = cfb8::Encryptor<Aes128>;
type Aes128Cfb8Dec = cfb8::Decryptor<Aes128>;

/// AES-128/CFB8 stream state for one direction. CFB8 advances one byte per
/// block, so arbitrary split points (e.g. the VarInt length prefix read a
/// byte at a time) keep both sides in sync.
struct CipherPair {
    enc: Aes128Cfb8Enc,
    dec: Aes128Cfb8Dec,
}

impl CipherPair {
    /// Key and IV are both the 16-byte shared secret.
    fn new(shared_secret: &[u8; 16]) -> Self {
        Self {
            enc: Aes128Cfb8Enc::new(shared_secret.into(), shared_secret.into()),
            dec: Aes128Cfb8Dec::new(shared_secret.into(), shared_secret.into()),
        }
    }
}

fn encrypt_in_place(enc: &mut Aes128Cfb8Enc, data: &mut [u8]) {
    for byte in data.chunks_mut(1) {
        enc.encrypt_block_mut(GenericArray::from_mut_slice(byte));
    }
}

fn decrypt_in_place(dec: &mut Aes128Cfb8Dec, data: &mut [u8]) {
    for byte in data.chunks_mut(1) {
        dec.decrypt_block_mut(GenericArray::from_mut_slice(byte));
    }
}

/// A framed protocol connection with optional compression and encryption.
pub struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
    compression_threshold: Option<i32>,
    encryptor: Option<Aes128Cfb8Enc>,
    decryptor: Option<Aes128Cfb8Dec>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(4096),
            compression_threshold: None,
            encryptor: None,
            decryptor: None,
        }
    }

    /// Enable AES-CFB8 encryption with the given 16-byte shared secret
    /// (key == IV). Independent cipher state per direction.
    pub fn enable_encryption(&mut self, shared_secret: &[u8; 16]) {
        let pair = CipherPair::new(shared_secret);
        self.encryptor = Some(pair.enc);
        self.decryptor = Some(pair.dec);
    }

    /// Enable zlib compression with the given threshold.
    pub fn enable_compression(&mut self, threshold: i32) {
        self.compression_threshold = Some(threshold);
    }

    /// Read a single packet frame, returning (packet_id, payload).
    pub async fn read_packet(&mut self) -> Result<(i32, BytesMut), FrameError> {
        loop {
            if let Some(result) = try_parse_packet(&mut self.read_buf, self.compression_threshold)? {
                return Ok(result);
            }
            let mut tmp = [0u8; 4096];
            let n = self.stream.read(&mut tmp).await?;
            if n == 0 {
                return Err(FrameError::Closed);
            }
            let data = &mut tmp[..n];
            if let Some(ref mut dec) = self.decryptor {
                decrypt_in_place(dec, data);
            }
            self.read_buf.extend_from_slice(data);
        }
    }

    /// Read a single packet frame with a timeout. Used during handshake /
    /// configuration transitions only.
    pub async fn read_packet_timeout(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Option<(i32, BytesMut)>, FrameError> {
        match tokio::time::timeout(timeout, self.read_packet()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Write a packet with the given ID and payload.
    pub async fn write_packet(&mut self, packet_id: i32, payload: &[u8]) -> Result<(), FrameError> {
        let frame = build_frame(
            packet_id,
            payload,
            self.compression_threshold,
            &mut self.encryptor,
        );
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }

    /// Split the connection into read and write halves for concurrent I/O.
    /// Compression and encryption state transfers to each half.
    pub fn into_split(self) -> (ConnectionReader, ConnectionWriter) {
        let (read_half, write_half) = self.stream.into_split();
        (
            ConnectionReader {
                stream: read_half,
                read_buf: self.read_buf,
                compression_threshold: self.compression_threshold,
                decryptor: self.decryptor,
            },
            ConnectionWriter {
                stream: write_half,
                compression_threshold: self.compression_threshold,
                encryptor: self.encryptor,
            },
        )
    }
}

/// Read half of a split connection.
pub struct ConnectionReader {
    stream: OwnedReadHalf,
    read_buf: BytesMut,
    compression_threshold: Option<i32>,
    decryptor: Option<Aes128Cfb8Dec>,
}

impl ConnectionReader {
    pub async fn read_packet(&mut self) -> Result<(i32, BytesMut), FrameError> {
        loop {
            if let Some(result) = try_parse_packet(&mut self.read_buf, self.compression_threshold)? {
                return Ok(result);
            }
            let mut tmp = [0u8; 4096];
            let n = self.stream.read(&mut tmp).await?;
            if n == 0 {
                return Err(FrameError::Closed);
            }
            let data = &mut tmp[..n];
            if let Some(ref mut dec) = self.decryptor {
                decrypt_in_place(dec, data);
            }
            self.read_buf.extend_from_slice(data);
        }
    }
}

/// Write half of a split connection. The owner serializes access (the
/// per-connection send lock), which preserves packet order on the wire.
pub struct ConnectionWriter {
    stream: OwnedWriteHalf,
    compression_threshold: Option<i32>,
    encryptor: Option<Aes128Cfb8Enc>,
}

impl ConnectionWriter {
    pub async fn write_packet(&mut self, packet_id: i32, payload: &[u8]) -> Result<(), FrameError> {
        let frame = build_frame(
            packet_id,
            payload,
            self.compression_threshold,
            &mut self.encryptor,
        );
        self.stream.write_all(&frame).await?;
        Ok(())
    }
}

// === Shared helpers ===

fn try_parse_packet(
    read_buf: &mut BytesMut,
    compression_threshold: Option<i32>,
) -> Result<Option<(i32, BytesMut)>, FrameError> {
    if read_buf.is_empty() {
        return Ok(None);
    }

    let mut peek = read_buf.clone();
    let length = match read_varint(&mut peek) {
        Ok(len) => len as usize,
        Err(CodecError::Truncated) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let varint_bytes = read_buf.len() - peek.len();

    if peek.remaining() < length {
        return Ok(None);
    }

    read_buf.advance(varint_bytes);
    let mut packet_data = read_buf.split_to(length);

    if compression_threshold.is_some() {
        let data_length = read_varint(&mut packet_data)? as usize;
        if data_length > 0 {
            let mut decompressed = vec![0u8; data_length];
            let mut decoder = ZlibDecoder::new(&packet_data[..]);
            decoder
                .read_exact(&mut decompressed)
                .map_err(|e| FrameError::CorruptFrame(e.to_string()))?;
            packet_data = BytesMut::from(&decompressed[..]);
        }
    }

    let packet_id = read_varint(&mut packet_data)?;
    trace!("read packet id=0x{:02X} len={}", packet_id, packet_data.len());

    Ok(Some((packet_id, packet_data)))
}

fn build_frame(
    packet_id: i32,
    payload: &[u8],
    compression_threshold: Option<i32>,
    encryptor: &mut Option<Aes128Cfb8Enc>,
) -> BytesMut {
    let mut packet_buf = BytesMut::new();
    write_varint(&mut packet_buf, packet_id);
    packet_buf.extend_from_slice(payload);

    let mut frame = BytesMut::new();

    if let Some(threshold) = compression_threshold {
        let uncompressed_len = packet_buf.len() as i32;
        if uncompressed_len >= threshold {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            let _ = encoder.write_all(&packet_buf);
            let compressed = encoder.finish().unwrap_or_default();

            let data_length_size = varint_len(uncompressed_len);
            let total_length = data_length_size + compressed.len();
            write_varint(&mut frame, total_length as i32);
            write_varint(&mut frame, uncompressed_len);
            frame.extend_from_slice(&compressed);
        } else {
            // Below the threshold: data_length == 0 marks an uncompressed body.
            let total_length = 1 + packet_buf.len();
            write_varint(&mut frame, total_length as i32);
            write_varint(&mut frame, 0);
            frame.extend_from_slice(&packet_buf);
        }
    } else {
        write_varint(&mut frame, packet_buf.len() as i32);
        frame.extend_from_slice(&packet_buf);
    }

    if let Some(ref mut enc) = encryptor {
        encrypt_in_place(enc, &mut frame);
    }

    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(
        packet_id: i32,
        payload: &[u8],
        threshold: Option<i32>,
        secret: Option<[u8; 16]>,
    ) -> (i32, Vec<u8>) {
        let mut enc = secret.map(|s| CipherPair::new(&s).enc);
        let mut frame = build_frame(packet_id, payload, threshold, &mut enc);

        if let Some(s) = secret {
            let mut dec = CipherPair::new(&s).dec;
            decrypt_in_place(&mut dec, &mut frame);
        }
        let mut buf = BytesMut::from(&frame[..]);
        let (id, data) = try_parse_packet(&mut buf, threshold).unwrap().unwrap();
        assert!(buf.is_empty(), "frame fully consumed");
        (id, data.to_vec())
    }

    #[test]
    fn test_frame_roundtrip_plain() {
        let (id, data) = roundtrip(0x2C, b"hello world", None, None);
        assert_eq!(id, 0x2C);
        assert_eq!(data, b"hello world");
    }

    #[test]
    fn test_frame_roundtrip_below_threshold_uncompressed() {
        let payload = vec![7u8; 16];
        let mut enc = None;
        let frame = build_frame(0x01, &payload, Some(256), &mut enc);
        // Second varint (data_length) must be zero for small packets.
        let mut buf = BytesMut::from(&frame[..]);
        let _total = read_varint(&mut buf).unwrap();
        assert_eq!(read_varint(&mut buf).unwrap(), 0);

        let (id, data) = roundtrip(0x01, &payload, Some(256), None);
        assert_eq!((id, data), (0x01, payload));
    }

    #[test]
    fn test_frame_roundtrip_compressed() {
        let payload = vec![42u8; 4096];
        let mut enc = None;
        let frame = build_frame(0x28, &payload, Some(256), &mut enc);
        assert!(frame.len() < payload.len(), "compressible payload shrank");

        let (id, data) = roundtrip(0x28, &payload, Some(256), None);
        assert_eq!((id, data), (0x28, payload));
    }

    #[test]
    fn test_frame_roundtrip_encrypted() {
        let secret = [0x11u8; 16];
        let payload = b"encrypted payload".to_vec();
        let (id, data) = roundtrip(0x05, &payload, None, Some(secret));
        assert_eq!((id, data), (0x05, payload));
    }

    #[test]
    fn test_frame_roundtrip_compressed_and_encrypted() {
        let secret = [0xAB; 16];
        let payload = vec![9u8; 2000];
        let (id, data) = roundtrip(0x28, &payload, Some(128), Some(secret));
        assert_eq!((id, data), (0x28, payload));
    }

    #[test]
    fn test_cipher_state_survives_split_reads() {
        // Encrypt two frames in one stream, decrypt in 1-byte slices.
        let secret = [3u8; 16];
        let mut pair = CipherPair::new(&secret);
        let mut stream = BytesMut::new();
        let mut enc = Some(pair.enc);
        stream.extend_from_slice(&build_frame(1, b"first", None, &mut enc));
        stream.extend_from_slice(&build_frame(2, b"second", None, &mut enc));

        let mut read_buf = BytesMut::new();
        let mut parsed = Vec::new();
        for i in 0..stream.len() {
            let mut byte = [stream[i]];
            decrypt_in_place(&mut pair.dec, &mut byte);
            read_buf.extend_from_slice(&byte);
            while let Some((id, data)) = try_parse_packet(&mut read_buf, None).unwrap() {
                parsed.push((id, data.to_vec()));
            }
        }
        assert_eq!(
            parsed,
            vec![(1, b"first".to_vec()), (2, b"second".to_vec())]
        );
    }

    #[test]
    fn test_partial_frame_returns_none() {
        let mut enc = None;
        let frame = build_frame(7, b"abcdef", None, &mut enc);
        let mut buf = BytesMut::from(&frame[..frame.len() - 2]);
        assert!(try_parse_packet(&mut buf, None).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_zlib_rejected() {
        let mut frame = BytesMut::new();
        // total length = 1 (data_length varint) + 4 garbage bytes
        write_varint(&mut frame, 5);
        write_varint(&mut frame, 64); // claims 64 decompressed bytes
        frame.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        let mut buf = BytesMut::from(&frame[..]);
        assert!(matches!(
            try_parse_packet(&mut buf, Some(256)),
            Err(FrameError::CorruptFrame(_))
        ));
    }
}
