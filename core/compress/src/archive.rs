//! Directory archive bundling.
//!
//! Serializes a directory tree into a single ordered byte stream of
//! (relative path, content) entries and reverses the process. The walk is
//! iterative with an explicit stack, so pathological directory depths do
//! not overflow the call stack, and entries are emitted in a deterministic
//! order (sorted by name at each level).
//!
//! # Entry format
//!
//! ```text
//! path length (u32 LE) | path (UTF-8, '/'-separated) | content length (u64 LE) | content
//! ```
//!
//! Extraction treats the archive as untrusted input: any entry whose path
//! would resolve outside the destination directory is rejected.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use argo_common::{Error, Result};

/// Longest accepted entry path in bytes.
const MAX_PATH_LENGTH: usize = 4096;

/// Bundle a directory tree into an archive stream.
///
/// # Preconditions
/// - `dir` must be an existing directory
///
/// # Postconditions
/// - Entries appear in deterministic order (sorted by name per level)
/// - Every regular file below `dir` is included with its relative path;
///   with `include_root` the root directory's own name is the first path
///   component
///
/// # Errors
/// - `InvalidArgument` if `dir` is not a directory or a file name is not
///   valid UTF-8
/// - `OperationCancelled` if the token is cancelled mid-walk
pub fn create_archive<W: Write>(
    dir: &Path,
    include_root: bool,
    mut writer: W,
    token: &CancellationToken,
) -> Result<u64> {
    if !dir.is_dir() {
        return Err(Error::InvalidArgument(format!(
            "Not a directory: {}",
            dir.display()
        )));
    }

    let root_prefix = if include_root {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidArgument("Directory name is not valid UTF-8".to_string()))?;
        format!("{}/", name)
    } else {
        String::new()
    };

    // Iterative depth-first walk; each stack element is (dir, relative prefix).
    let mut stack: Vec<(PathBuf, String)> = vec![(dir.to_path_buf(), root_prefix)];
    let mut entries = 0u64;

    while let Some((current, prefix)) = stack.pop() {
        if token.is_cancelled() {
            return Err(Error::OperationCancelled);
        }

        let mut children: Vec<_> = fs::read_dir(&current)?.collect::<std::io::Result<_>>()?;
        children.sort_by_key(|e| e.file_name());

        // Reverse so that popping preserves sorted order for directories.
        for child in children.into_iter().rev() {
            let name = child
                .file_name()
                .into_string()
                .map_err(|_| Error::InvalidArgument("File name is not valid UTF-8".to_string()))?;
            let file_type = child.file_type()?;
            let child_path = child.path();

            if file_type.is_dir() {
                stack.push((child_path, format!("{}{}/", prefix, name)));
            } else if file_type.is_file() {
                if token.is_cancelled() {
                    return Err(Error::OperationCancelled);
                }

                let rel_path = format!("{}{}", prefix, name);
                check_entry_length(&rel_path)?;
                let metadata = child.metadata()?;

                writer.write_all(&(rel_path.len() as u32).to_le_bytes())?;
                writer.write_all(rel_path.as_bytes())?;
                writer.write_all(&metadata.len().to_le_bytes())?;

                let mut file = File::open(&child_path)?;
                let copied = std::io::copy(&mut file, &mut writer)?;
                if copied != metadata.len() {
                    return Err(Error::Io(std::io::Error::other(format!(
                        "File changed while archiving: {}",
                        child_path.display()
                    ))));
                }

                entries += 1;
            }
            // Symlinks and special files are not carried into backups.
        }
    }

    writer.flush()?;
    debug!(entries, "Archive created");
    Ok(entries)
}

/// Recreate a directory tree from an archive stream.
///
/// # Security
/// Rejects any entry whose relative path would resolve outside `dest`
/// (absolute paths or `..` segments). Archive contents may originate from
/// an untrusted or corrupted file; this check is mandatory, and no file is
/// written outside `dest`.
///
/// # Errors
/// - `InvalidArgument` on a path-traversal entry
/// - `CorruptData` on a truncated or malformed archive
/// - `OperationCancelled` if the token is cancelled mid-extraction
pub fn extract_archive<R: Read>(
    mut reader: R,
    dest: &Path,
    token: &CancellationToken,
) -> Result<u64> {
    fs::create_dir_all(dest)?;
    let mut entries = 0u64;

    loop {
        if token.is_cancelled() {
            return Err(Error::OperationCancelled);
        }

        let mut len_buf = [0u8; 4];
        match read_exact_or_eof(&mut reader, &mut len_buf)? {
            ReadOutcome::Eof => break,
            ReadOutcome::Partial => {
                return Err(Error::CorruptData("Truncated archive entry".to_string()))
            }
            ReadOutcome::Full => {}
        }

        let path_len = u32::from_le_bytes(len_buf) as usize;
        if path_len == 0 || path_len > MAX_PATH_LENGTH {
            return Err(Error::CorruptData("Implausible entry path length".to_string()));
        }

        let mut path_buf = vec![0u8; path_len];
        read_record(&mut reader, &mut path_buf)?;
        let rel_path = String::from_utf8(path_buf)
            .map_err(|_| Error::CorruptData("Entry path is not valid UTF-8".to_string()))?;

        let mut content_len_buf = [0u8; 8];
        read_record(&mut reader, &mut content_len_buf)?;
        let content_len = u64::from_le_bytes(content_len_buf);

        let target = resolve_entry_path(dest, &rel_path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = File::create(&target)?;
        let copied = std::io::copy(&mut reader.by_ref().take(content_len), &mut file)?;
        if copied != content_len {
            return Err(Error::CorruptData("Truncated entry content".to_string()));
        }
        file.flush()?;

        entries += 1;
    }

    debug!(entries, dest = %dest.display(), "Archive extracted");
    Ok(entries)
}

/// Reject entry paths that extraction would refuse, so every archive this
/// module creates can also be restored.
fn check_entry_length(rel_path: &str) -> Result<()> {
    if rel_path.len() > MAX_PATH_LENGTH {
        return Err(Error::InvalidArgument(format!(
            "Entry path exceeds {} bytes",
            MAX_PATH_LENGTH
        )));
    }
    Ok(())
}

/// Read exactly `buf.len()` bytes mid-record. A clean end-of-stream is
/// corruption here; any other reader failure passes through untouched so
/// errors smuggled by upstream adapters survive to the seam.
fn read_record<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::CorruptData("Truncated archive entry".to_string())
        } else {
            Error::from(e).flatten_io()
        }
    })
}

/// Resolve an archive entry path against the destination directory,
/// rejecting anything that would escape it.
fn resolve_entry_path(dest: &Path, rel_path: &str) -> Result<PathBuf> {
    let candidate = Path::new(rel_path);

    if candidate.is_absolute() || rel_path.starts_with('/') || rel_path.starts_with('\\') {
        return Err(Error::InvalidArgument(format!(
            "Archive entry has an absolute path: {}",
            rel_path
        )));
    }

    for component in candidate.components() {
        match component {
            Component::Normal(_) => {}
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "Archive entry path escapes the destination: {}",
                    rel_path
                )))
            }
        }
    }

    Ok(dest.join(candidate))
}

enum ReadOutcome {
    Full,
    Partial,
    Eof,
}

/// Read exactly `buf.len()` bytes, distinguishing a clean end-of-stream
/// (no bytes at all) from a mid-record truncation.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(if filled == 0 {
                ReadOutcome::Eof
            } else {
                ReadOutcome::Partial
            });
        }
        filled += n;
    }
    Ok(ReadOutcome::Full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn write_file(dir: &Path, rel: &str, content: &[u8]) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_archive_roundtrip() {
        let source = TempDir::new().unwrap();
        write_file(source.path(), "ledger.json", b"{\"accounts\":[]}");
        write_file(source.path(), "attachments/receipt.pdf", b"%PDF-1.4");
        write_file(source.path(), "attachments/deep/note.txt", b"memo");

        let token = CancellationToken::new();
        let mut archive = Vec::new();
        let written =
            create_archive(source.path(), false, &mut archive, &token).unwrap();
        assert_eq!(written, 3);

        let dest = TempDir::new().unwrap();
        let extracted = extract_archive(Cursor::new(&archive), dest.path(), &token).unwrap();
        assert_eq!(extracted, 3);

        assert_eq!(
            fs::read(dest.path().join("ledger.json")).unwrap(),
            b"{\"accounts\":[]}"
        );
        assert_eq!(
            fs::read(dest.path().join("attachments/deep/note.txt")).unwrap(),
            b"memo"
        );
    }

    #[test]
    fn test_archive_include_root() {
        let source = TempDir::new().unwrap();
        let company = source.path().join("acme");
        fs::create_dir(&company).unwrap();
        write_file(&company, "data.json", b"{}");

        let token = CancellationToken::new();
        let mut archive = Vec::new();
        create_archive(&company, true, &mut archive, &token).unwrap();

        let dest = TempDir::new().unwrap();
        extract_archive(Cursor::new(&archive), dest.path(), &token).unwrap();

        assert!(dest.path().join("acme/data.json").exists());
    }

    #[test]
    fn test_archive_deterministic_order() {
        let source = TempDir::new().unwrap();
        write_file(source.path(), "b.txt", b"b");
        write_file(source.path(), "a.txt", b"a");
        write_file(source.path(), "c.txt", b"c");

        let token = CancellationToken::new();
        let mut first = Vec::new();
        create_archive(source.path(), false, &mut first, &token).unwrap();
        let mut second = Vec::new();
        create_archive(source.path(), false, &mut second, &token).unwrap();

        assert_eq!(first, second);

        // "a.txt" must be serialized before "b.txt".
        let a_pos = first.windows(5).position(|w| w == b"a.txt").unwrap();
        let b_pos = first.windows(5).position(|w| w == b"b.txt").unwrap();
        assert!(a_pos < b_pos);
    }

    #[test]
    fn test_extract_rejects_parent_traversal() {
        let mut archive = Vec::new();
        let path = b"../../evil.txt";
        archive.extend_from_slice(&(path.len() as u32).to_le_bytes());
        archive.extend_from_slice(path);
        archive.extend_from_slice(&4u64.to_le_bytes());
        archive.extend_from_slice(b"evil");

        let dest = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let result = extract_archive(Cursor::new(&archive), dest.path(), &token);

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(!dest.path().parent().unwrap().join("evil.txt").exists());
    }

    #[test]
    fn test_extract_rejects_absolute_path() {
        let mut archive = Vec::new();
        let path = b"/etc/evil.conf";
        archive.extend_from_slice(&(path.len() as u32).to_le_bytes());
        archive.extend_from_slice(path);
        archive.extend_from_slice(&0u64.to_le_bytes());

        let dest = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let result = extract_archive(Cursor::new(&archive), dest.path(), &token);

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_extract_truncated_archive_is_corrupt() {
        let source = TempDir::new().unwrap();
        write_file(source.path(), "file.bin", &[9u8; 100]);

        let token = CancellationToken::new();
        let mut archive = Vec::new();
        create_archive(source.path(), false, &mut archive, &token).unwrap();
        archive.truncate(archive.len() - 10);

        let dest = TempDir::new().unwrap();
        let result = extract_archive(Cursor::new(&archive), dest.path(), &token);
        assert!(matches!(result, Err(Error::CorruptData(_))));
    }

    #[test]
    fn test_extract_truncated_archive_keeps_earlier_entries() {
        let source = TempDir::new().unwrap();
        write_file(source.path(), "a.txt", b"first");
        write_file(source.path(), "b.txt", &[9u8; 100]);

        let token = CancellationToken::new();
        let mut archive = Vec::new();
        create_archive(source.path(), false, &mut archive, &token).unwrap();
        archive.truncate(archive.len() - 10);

        let dest = TempDir::new().unwrap();
        let result = extract_archive(Cursor::new(&archive), dest.path(), &token);
        assert!(matches!(result, Err(Error::CorruptData(_))));

        // Extraction is incremental: entries before the corruption remain.
        assert_eq!(fs::read(dest.path().join("a.txt")).unwrap(), b"first");
    }

    #[test]
    fn test_overlong_entry_path_rejected_at_creation() {
        assert!(check_entry_length("attachments/receipt.pdf").is_ok());

        let deep = "d/".repeat(MAX_PATH_LENGTH / 2) + "leaf.txt";
        assert!(matches!(
            check_entry_length(&deep),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_create_archive_cancelled() {
        let source = TempDir::new().unwrap();
        write_file(source.path(), "x.txt", b"x");

        let token = CancellationToken::new();
        token.cancel();

        let mut archive = Vec::new();
        let result = create_archive(source.path(), false, &mut archive, &token);
        assert!(matches!(result, Err(Error::OperationCancelled)));
    }

    #[test]
    fn test_create_archive_on_file_is_invalid() {
        let source = TempDir::new().unwrap();
        let file = source.path().join("plain.txt");
        fs::write(&file, b"not a dir").unwrap();

        let token = CancellationToken::new();
        let mut archive = Vec::new();
        let result = create_archive(&file, false, &mut archive, &token);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_empty_directory_archives_to_empty_stream() {
        let source = TempDir::new().unwrap();
        let token = CancellationToken::new();

        let mut archive = Vec::new();
        let written = create_archive(source.path(), false, &mut archive, &token).unwrap();
        assert_eq!(written, 0);
        assert!(archive.is_empty());

        let dest = TempDir::new().unwrap();
        let extracted = extract_archive(Cursor::new(&archive), dest.path(), &token).unwrap();
        assert_eq!(extracted, 0);
    }
}
