//! Streaming encryption for large payloads.
//!
//! Chunk-based encryption so that payloads larger than memory can be
//! processed. Each chunk is independently authenticated; the chunk counter
//! is bound into the nonce so chunks cannot be reordered, and the final
//! chunk carries a marker so the stream cannot be truncated undetected.
//!
//! [`StreamEncryptor`] and [`StreamDecryptor`] are `Write`/`Read` adapters
//! so the cipher composes into a pipeline (archive into compressor into
//! encryptor) without buffering a whole stage. [`encrypt_stream`] and
//! [`decrypt_stream`] are the reader-to-writer conveniences built on top.

use std::io::{Read, Write};

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    ChaCha20Poly1305,
};

use crate::aead::TAG_SIZE;
use crate::keys::{DerivedKey, NONCE_LENGTH};
use argo_common::{Error, Result};

/// Default chunk size for streaming encryption (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Stream format version.
const STREAM_VERSION: u8 = 1;

/// Random per-stream nonce prefix length; the remaining 4 nonce bytes are
/// the little-endian chunk counter.
const NONCE_PREFIX_LENGTH: usize = NONCE_LENGTH - 4;

/// Marker for an intermediate chunk.
const CHUNK_MORE: u8 = 0;

/// Marker for the final chunk.
const CHUNK_FINAL: u8 = 1;

fn chunk_nonce(prefix: &[u8; NONCE_PREFIX_LENGTH], counter: u32) -> [u8; NONCE_LENGTH] {
    let mut nonce = [0u8; NONCE_LENGTH];
    nonce[..NONCE_PREFIX_LENGTH].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_LENGTH..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Fill `buf` from `reader`, looping over short reads. Returns the number
/// of bytes read; less than `buf.len()` means end of stream.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Writer adapter that encrypts into an inner writer in authenticated
/// chunks.
///
/// # Format
/// - Header: version (1) + chunk size (u32 LE) + nonce prefix (8)
/// - Chunks: marker (1) + ciphertext length (u32 LE) + ciphertext || tag
///
/// The per-chunk nonce is the stream's random prefix plus the chunk
/// counter, so no nonce repeats within a stream and streams do not share
/// nonces with overwhelming probability.
///
/// Memory use is bounded by the chunk size. Typed errors raised inside the
/// `Write` impl are wrapped in `io::Error`; unwrap them at the seam with
/// [`Error::flatten_io`].
pub struct StreamEncryptor<W: Write> {
    cipher: ChaCha20Poly1305,
    prefix: [u8; NONCE_PREFIX_LENGTH],
    counter: u32,
    buffer: Vec<u8>,
    writer: W,
}

impl<W: Write> StreamEncryptor<W> {
    /// Write the stream header and wrap `writer`.
    pub fn new(key: &DerivedKey, mut writer: W) -> Result<Self> {
        let cipher = ChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

        let mut prefix = [0u8; NONCE_PREFIX_LENGTH];
        {
            use rand::rngs::OsRng;
            use rand::RngCore;
            OsRng.fill_bytes(&mut prefix);
        }

        writer.write_all(&[STREAM_VERSION])?;
        writer.write_all(&(DEFAULT_CHUNK_SIZE as u32).to_le_bytes())?;
        writer.write_all(&prefix)?;

        Ok(Self {
            cipher,
            prefix,
            counter: 0,
            buffer: Vec::with_capacity(DEFAULT_CHUNK_SIZE),
            writer,
        })
    }

    fn emit_chunk(&mut self, marker: u8) -> Result<()> {
        let nonce = chunk_nonce(&self.prefix, self.counter);
        let ciphertext = self
            .cipher
            .encrypt(
                GenericArray::from_slice(&nonce),
                Payload {
                    msg: &self.buffer,
                    aad: &[marker],
                },
            )
            .map_err(|_| Error::InvalidArgument("Encryption failed".to_string()))?;

        self.writer.write_all(&[marker])?;
        self.writer.write_all(&(ciphertext.len() as u32).to_le_bytes())?;
        self.writer.write_all(&ciphertext)?;

        self.buffer.clear();
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| Error::InvalidArgument("Stream too long".to_string()))?;
        Ok(())
    }

    /// Seal the stream with its final chunk and return the inner writer.
    ///
    /// Dropping the encryptor without calling this produces a stream that
    /// decryption rejects as truncated.
    pub fn finish(mut self) -> Result<W> {
        self.emit_chunk(CHUNK_FINAL)?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write> Write for StreamEncryptor<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let take = (DEFAULT_CHUNK_SIZE - self.buffer.len()).min(buf.len());
        self.buffer.extend_from_slice(&buf[..take]);

        if self.buffer.len() == DEFAULT_CHUNK_SIZE {
            self.emit_chunk(CHUNK_MORE).map_err(std::io::Error::other)?;
        }
        Ok(take)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// Reader adapter that decrypts a stream produced by [`StreamEncryptor`].
///
/// Typed errors ([`Error::AuthenticationFailure`], [`Error::CorruptData`])
/// raised inside the `Read` impl are wrapped in `io::Error`; unwrap them
/// at the seam with [`Error::flatten_io`].
pub struct StreamDecryptor<R: Read> {
    cipher: ChaCha20Poly1305,
    prefix: [u8; NONCE_PREFIX_LENGTH],
    counter: u32,
    chunk_size: usize,
    reader: R,
    plaintext: Vec<u8>,
    offset: usize,
    finished: bool,
}

impl<R: Read> StreamDecryptor<R> {
    /// Read and validate the stream header, then wrap `reader`.
    ///
    /// # Errors
    /// - `CorruptData` on a truncated or malformed header
    pub fn new(key: &DerivedKey, mut reader: R) -> Result<Self> {
        let cipher = ChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

        let mut header = [0u8; 1 + 4 + NONCE_PREFIX_LENGTH];
        if read_full(&mut reader, &mut header)? != header.len() {
            return Err(Error::CorruptData("Truncated stream header".to_string()));
        }

        if header[0] != STREAM_VERSION {
            return Err(Error::CorruptData(format!(
                "Unknown stream version {}",
                header[0]
            )));
        }

        let chunk_size = u32::from_le_bytes(header[1..5].try_into().unwrap()) as usize;
        if chunk_size == 0 || chunk_size > 16 * 1024 * 1024 {
            return Err(Error::CorruptData("Implausible chunk size".to_string()));
        }

        let mut prefix = [0u8; NONCE_PREFIX_LENGTH];
        prefix.copy_from_slice(&header[5..]);

        Ok(Self {
            cipher,
            prefix,
            counter: 0,
            chunk_size,
            reader,
            plaintext: Vec::new(),
            offset: 0,
            finished: false,
        })
    }

    fn next_chunk(&mut self) -> Result<()> {
        let mut chunk_header = [0u8; 5];
        match read_full(&mut self.reader, &mut chunk_header)? {
            0 => return Err(Error::CorruptData("Stream truncated".to_string())),
            n if n < chunk_header.len() => {
                return Err(Error::CorruptData("Truncated chunk header".to_string()))
            }
            _ => {}
        }

        let marker = chunk_header[0];
        if marker != CHUNK_MORE && marker != CHUNK_FINAL {
            return Err(Error::CorruptData("Invalid chunk marker".to_string()));
        }

        let len = u32::from_le_bytes(chunk_header[1..].try_into().unwrap()) as usize;
        if len < TAG_SIZE || len > self.chunk_size + TAG_SIZE {
            return Err(Error::CorruptData("Implausible chunk length".to_string()));
        }

        let mut ciphertext = vec![0u8; len];
        if read_full(&mut self.reader, &mut ciphertext)? != len {
            return Err(Error::CorruptData("Truncated chunk".to_string()));
        }

        let nonce = chunk_nonce(&self.prefix, self.counter);
        self.plaintext = self
            .cipher
            .decrypt(
                GenericArray::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: &[marker],
                },
            )
            .map_err(|_| Error::AuthenticationFailure)?;
        self.offset = 0;

        if marker == CHUNK_FINAL {
            self.finished = true;

            // Anything after the final chunk is not ours.
            let mut trailing = [0u8; 1];
            if self.reader.read(&mut trailing)? != 0 {
                return Err(Error::CorruptData(
                    "Trailing data after final chunk".to_string(),
                ));
            }
        } else {
            self.counter = self
                .counter
                .checked_add(1)
                .ok_or_else(|| Error::CorruptData("Stream too long".to_string()))?;
        }

        Ok(())
    }
}

impl<R: Read> Read for StreamDecryptor<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.offset == self.plaintext.len() {
            if self.finished {
                return Ok(0);
            }
            self.next_chunk().map_err(std::io::Error::other)?;
        }

        let n = (self.plaintext.len() - self.offset).min(buf.len());
        buf[..n].copy_from_slice(&self.plaintext[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

/// Encrypt data from `reader` into `writer` in authenticated chunks.
///
/// # Postconditions
/// - Returns the number of plaintext bytes consumed
/// - Memory use is bounded by the chunk size
pub fn encrypt_stream<R: Read, W: Write>(
    key: &DerivedKey,
    mut reader: R,
    writer: W,
) -> Result<u64> {
    let mut encryptor = StreamEncryptor::new(key, writer)?;

    let mut buffer = vec![0u8; DEFAULT_CHUNK_SIZE];
    let mut total_bytes = 0u64;
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        encryptor
            .write_all(&buffer[..n])
            .map_err(|e| Error::from(e).flatten_io())?;
        total_bytes += n as u64;
    }

    encryptor.finish()?;
    Ok(total_bytes)
}

/// Decrypt a stream produced by [`encrypt_stream`].
///
/// # Errors
/// - `CorruptData` on a malformed header, an oversized chunk, a stream
///   that ends before its final-chunk marker (truncation), or trailing
///   data after it
/// - `AuthenticationFailure` if any chunk fails tag verification
pub fn decrypt_stream<R: Read, W: Write>(
    key: &DerivedKey,
    reader: R,
    mut writer: W,
) -> Result<u64> {
    let mut decryptor = StreamDecryptor::new(key, reader)?;

    let mut buffer = vec![0u8; DEFAULT_CHUNK_SIZE];
    let mut total_bytes = 0u64;
    loop {
        let n = decryptor
            .read(&mut buffer)
            .map_err(|e| Error::from(e).flatten_io())?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n])?;
        total_bytes += n as u64;
    }

    writer.flush()?;
    Ok(total_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LENGTH;
    use std::io::Cursor;

    fn test_key() -> DerivedKey {
        DerivedKey::from_bytes([7u8; KEY_LENGTH])
    }

    fn roundtrip(data: &[u8]) -> Vec<u8> {
        let key = test_key();
        let mut encrypted = Vec::new();
        encrypt_stream(&key, Cursor::new(data), &mut encrypted).unwrap();

        let mut decrypted = Vec::new();
        decrypt_stream(&key, Cursor::new(&encrypted), &mut decrypted).unwrap();
        decrypted
    }

    #[test]
    fn test_stream_roundtrip_small() {
        let data = b"small payload";
        assert_eq!(roundtrip(data), data);
    }

    #[test]
    fn test_stream_roundtrip_empty() {
        assert!(roundtrip(b"").is_empty());
    }

    #[test]
    fn test_stream_roundtrip_multichunk() {
        let data: Vec<u8> = (0..(DEFAULT_CHUNK_SIZE * 2 + 100))
            .map(|i| (i % 251) as u8)
            .collect();
        assert_eq!(roundtrip(&data), data);
    }

    #[test]
    fn test_stream_roundtrip_exact_chunk_boundary() {
        let data = vec![0x5Au8; DEFAULT_CHUNK_SIZE];
        assert_eq!(roundtrip(&data), data);
    }

    #[test]
    fn test_encryptor_incremental_writes() {
        let key = test_key();
        let data: Vec<u8> = (0..(DEFAULT_CHUNK_SIZE + 500))
            .map(|i| (i % 83) as u8)
            .collect();

        let mut encrypted = Vec::new();
        let mut encryptor = StreamEncryptor::new(&key, &mut encrypted).unwrap();
        for chunk in data.chunks(7_001) {
            encryptor.write_all(chunk).unwrap();
        }
        encryptor.finish().unwrap();

        let mut decrypted = Vec::new();
        decrypt_stream(&key, Cursor::new(&encrypted), &mut decrypted).unwrap();
        assert_eq!(decrypted, data);
    }

    #[test]
    fn test_decryptor_partial_reads() {
        let key = test_key();
        let data = b"chunked reader under test".repeat(100);
        let mut encrypted = Vec::new();
        encrypt_stream(&key, Cursor::new(&data[..]), &mut encrypted).unwrap();

        let mut decryptor = StreamDecryptor::new(&key, Cursor::new(&encrypted)).unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 13];
        loop {
            let n = decryptor.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, data);
    }

    #[test]
    fn test_unfinished_encryptor_stream_is_truncated() {
        let key = test_key();
        let mut encrypted = Vec::new();
        {
            let mut encryptor = StreamEncryptor::new(&key, &mut encrypted).unwrap();
            encryptor.write_all(&vec![7u8; DEFAULT_CHUNK_SIZE]).unwrap();
        }

        let mut out = Vec::new();
        let result = decrypt_stream(&test_key(), Cursor::new(&encrypted), &mut out);
        assert!(matches!(result, Err(Error::CorruptData(_))));
    }

    #[test]
    fn test_stream_tamper_detected() {
        let key = test_key();
        let mut encrypted = Vec::new();
        encrypt_stream(&key, Cursor::new(b"payload under test"), &mut encrypted).unwrap();

        let mid = encrypted.len() - 4;
        encrypted[mid] ^= 0x80;

        let mut out = Vec::new();
        let result = decrypt_stream(&key, Cursor::new(&encrypted), &mut out);
        assert!(matches!(result, Err(Error::AuthenticationFailure)));
    }

    #[test]
    fn test_stream_truncation_detected() {
        let key = test_key();
        let data = vec![1u8; DEFAULT_CHUNK_SIZE + 10];
        let mut encrypted = Vec::new();
        encrypt_stream(&key, Cursor::new(&data), &mut encrypted).unwrap();

        // Cut the stream after the first chunk's worth of bytes.
        let cut = 1 + 4 + NONCE_PREFIX_LENGTH + 5 + DEFAULT_CHUNK_SIZE + TAG_SIZE;
        encrypted.truncate(cut);

        let mut out = Vec::new();
        let result = decrypt_stream(&key, Cursor::new(&encrypted), &mut out);
        assert!(matches!(result, Err(Error::CorruptData(_))));
    }

    #[test]
    fn test_stream_wrong_key_fails() {
        let mut encrypted = Vec::new();
        encrypt_stream(&test_key(), Cursor::new(b"some data"), &mut encrypted).unwrap();

        let other = DerivedKey::from_bytes([8u8; KEY_LENGTH]);
        let mut out = Vec::new();
        let result = decrypt_stream(&other, Cursor::new(&encrypted), &mut out);
        assert!(matches!(result, Err(Error::AuthenticationFailure)));
    }
}
