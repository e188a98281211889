//! Compression for the Argo document container.
//!
//! This module provides:
//! - zstd compression/decompression of byte buffers and streams
//! - `Write`/`Read` adapters so compression composes into a pipeline
//! - Bundling a directory tree into a single ordered archive stream
//!
//! All long-running entry points observe a cooperative cancellation token
//! and surface a distinct [`Error::OperationCancelled`] condition.

pub mod archive;

use std::io::{Read, Write};

use tokio_util::sync::CancellationToken;

use argo_common::{Error, Result};

pub use archive::{create_archive, extract_archive};

/// Copy buffer size for streaming operations (64 KiB).
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Compression level presets mapped to zstd levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// Fastest, lowest ratio (zstd level 1).
    Fast,
    /// Balanced (zstd level 3).
    #[default]
    Default,
    /// Slowest, highest ratio (zstd level 19).
    Best,
}

impl CompressionLevel {
    fn as_zstd(self) -> i32 {
        match self {
            Self::Fast => 1,
            Self::Default => 3,
            Self::Best => 19,
        }
    }
}

/// Compress a byte buffer.
///
/// # Postconditions
/// - `decompress(compress(x, level)) == x` for every byte sequence,
///   including the empty one
pub fn compress(data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
    zstd::encode_all(data, level.as_zstd())
        .map_err(|e| Error::Io(std::io::Error::other(format!("Compression failed: {}", e))))
}

/// Decompress a byte buffer produced by [`compress`].
///
/// # Errors
/// - `CorruptData` if the input is not a valid compressed stream
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    zstd::decode_all(data).map_err(|e| Error::CorruptData(format!("Malformed compressed data: {}", e)))
}

/// Writer adapter that compresses into an inner writer.
///
/// Wraps the zstd encoder so callers can chain it under other writer
/// adapters without naming zstd types. [`finish`](Self::finish) must run
/// to seal the compressed frame.
pub struct CompressWriter<W: Write> {
    encoder: zstd::stream::Encoder<'static, W>,
}

impl<W: Write> CompressWriter<W> {
    pub fn new(writer: W, level: CompressionLevel) -> Result<Self> {
        let encoder = zstd::stream::Encoder::new(writer, level.as_zstd())?;
        Ok(Self { encoder })
    }

    /// Seal the compressed frame and return the inner writer.
    pub fn finish(self) -> Result<W> {
        Ok(self.encoder.finish()?)
    }
}

impl<W: Write> Write for CompressWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.encoder.flush()
    }
}

/// Reader adapter that decompresses from an inner reader.
///
/// Decoder failures (malformed input) surface as [`Error::CorruptData`]
/// wrapped in an `io::Error`; unwrap them at the seam with
/// [`Error::flatten_io`]. Failures of the inner reader pass through
/// unchanged.
pub struct DecompressReader<R: Read> {
    decoder: zstd::stream::Decoder<'static, std::io::BufReader<R>>,
}

impl<R: Read> DecompressReader<R> {
    pub fn new(reader: R) -> Result<Self> {
        let decoder = zstd::stream::Decoder::new(reader)
            .map_err(|e| Error::CorruptData(format!("Malformed compressed data: {}", e)))?;
        Ok(Self { decoder })
    }
}

impl<R: Read> Read for DecompressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.decoder.read(buf).map_err(|e| match e.downcast::<Error>() {
            Ok(inner) => std::io::Error::other(inner),
            // The decoder reports malformed input with a bare `Other` kind;
            // inner-reader failures keep their original kind.
            Err(e) if e.kind() == std::io::ErrorKind::Other => std::io::Error::other(
                Error::CorruptData(format!("Malformed compressed data: {}", e)),
            ),
            Err(e) => e,
        })
    }
}

/// Compress from `reader` into `writer`, observing cancellation between
/// copy chunks.
///
/// # Errors
/// - `OperationCancelled` if the token is cancelled mid-operation
/// - `Io` for reader/writer errors
pub fn compress_stream<R: Read, W: Write>(
    mut reader: R,
    writer: W,
    level: CompressionLevel,
    token: &CancellationToken,
) -> Result<u64> {
    let mut encoder = CompressWriter::new(writer, level)?;
    let total = copy_cancellable(&mut reader, &mut encoder, token)?;
    encoder.finish()?.flush()?;
    Ok(total)
}

/// Decompress from `reader` into `writer`, observing cancellation between
/// copy chunks.
///
/// # Errors
/// - `CorruptData` if the input is not a valid compressed stream
/// - `OperationCancelled` if the token is cancelled mid-operation
/// - `Io` for writer errors, so a full disk stays distinguishable from a
///   corrupt source
pub fn decompress_stream<R: Read, W: Write>(
    reader: R,
    mut writer: W,
    token: &CancellationToken,
) -> Result<u64> {
    let mut decoder = DecompressReader::new(reader)?;

    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        if token.is_cancelled() {
            return Err(Error::OperationCancelled);
        }

        let n = decoder
            .read(&mut buffer)
            .map_err(|e| Error::from(e).flatten_io())?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n])?;
        total += n as u64;
    }

    writer.flush()?;
    Ok(total)
}

/// Copy all bytes from `reader` to `writer` in fixed-size chunks, checking
/// the cancellation token before each chunk.
fn copy_cancellable<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    token: &CancellationToken,
) -> Result<u64> {
    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        if token.is_cancelled() {
            return Err(Error::OperationCancelled);
        }

        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n])?;
        total += n as u64;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn test_roundtrip() {
        let data = b"The quick brown fox jumps over the lazy dog".repeat(100);

        let compressed = compress(&data, CompressionLevel::Default).unwrap();
        assert!(compressed.len() < data.len());

        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_roundtrip_empty() {
        let compressed = compress(b"", CompressionLevel::Default).unwrap();
        let decompressed = decompress(&compressed).unwrap();
        assert!(decompressed.is_empty());
    }

    #[test]
    fn test_malformed_input_is_corrupt_data() {
        let result = decompress(b"definitely not zstd");
        assert!(matches!(result, Err(Error::CorruptData(_))));
    }

    #[test]
    fn test_stream_roundtrip() {
        let data: Vec<u8> = (0..200_000).map(|i| (i % 239) as u8).collect();
        let token = CancellationToken::new();

        let mut compressed = Vec::new();
        compress_stream(
            Cursor::new(&data),
            &mut compressed,
            CompressionLevel::Fast,
            &token,
        )
        .unwrap();

        let mut decompressed = Vec::new();
        decompress_stream(Cursor::new(&compressed), &mut decompressed, &token).unwrap();

        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_writer_adapter_chains_into_reader_adapter() {
        let data = b"adapter pipeline".repeat(500);

        let mut compressed = Vec::new();
        let mut writer = CompressWriter::new(&mut compressed, CompressionLevel::Fast).unwrap();
        writer.write_all(&data).unwrap();
        writer.finish().unwrap();

        let mut reader = DecompressReader::new(Cursor::new(&compressed)).unwrap();
        let mut decompressed = Vec::new();
        reader.read_to_end(&mut decompressed).unwrap();

        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_decompress_stream_malformed_input_is_corrupt() {
        let token = CancellationToken::new();
        let mut out = Vec::new();

        let result = decompress_stream(Cursor::new(b"not zstd at all"), &mut out, &token);
        assert!(matches!(result, Err(Error::CorruptData(_))));
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_decompress_stream_writer_failure_stays_io() {
        let compressed =
            compress(b"valid input, failing destination", CompressionLevel::Fast).unwrap();
        let token = CancellationToken::new();

        // A destination error on valid input must not look like corruption.
        let result = decompress_stream(Cursor::new(&compressed), FailingWriter, &token);
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();

        let mut out = Vec::new();
        let result = compress_stream(
            Cursor::new(vec![0u8; 1024]),
            &mut out,
            CompressionLevel::Fast,
            &token,
        );
        assert!(matches!(result, Err(Error::OperationCancelled)));
    }

    #[test]
    fn test_levels_all_roundtrip() {
        let data = b"level check".repeat(50);
        for level in [
            CompressionLevel::Fast,
            CompressionLevel::Default,
            CompressionLevel::Best,
        ] {
            let compressed = compress(&data, level).unwrap();
            assert_eq!(decompress(&compressed).unwrap(), data);
        }
    }

    proptest! {
        #[test]
        fn prop_roundtrip_identity(data in proptest::collection::vec(any::<u8>(), 0..8192)) {
            let compressed = compress(&data, CompressionLevel::Fast).unwrap();
            let decompressed = decompress(&compressed).unwrap();
            prop_assert_eq!(decompressed, data);
        }
    }
}
