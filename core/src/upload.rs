//! Upload sink (C7): binary-framed file upload received over a session's
//! WebSocket. Envelope: `byte 0 = 0x01` (tag), `byte 1..2` = filename
//! length L (big-endian u16), `byte 3..3+L-1` = filename (UTF-8, basename
//! only), `byte 3+L..` = file contents.

use std::path::{Path, PathBuf};

use crate::error::UploadError;

const UPLOAD_TAG: u8 = 0x01;

pub struct ParsedUpload<'a> {
    pub filename: String,
    pub contents: &'a [u8],
}

/// Parse and validate an upload envelope. Does not write to disk — callers
/// decide where to persist the contents via `sanitized_path`.
pub fn parse_envelope(envelope: &[u8], max_bytes: u64) -> Result<ParsedUpload<'_>, UploadError> {
    if envelope.len() < 3 {
        return Err(UploadError::Truncated);
    }
    if envelope[0] != UPLOAD_TAG {
        return Err(UploadError::UnsupportedTag(envelope[0]));
    }
    let name_len = u16::from_be_bytes([envelope[1], envelope[2]]) as usize;
    let name_start = 3;
    let name_end = name_start
        .checked_add(name_len)
        .ok_or(UploadError::Truncated)?;
    if envelope.len() < name_end {
        return Err(UploadError::Truncated);
    }
    let filename = std::str::from_utf8(&envelope[name_start..name_end])
        .map_err(|_| UploadError::InvalidFilenameEncoding)?
        .to_string();
    let contents = &envelope[name_end..];

    if (contents.len() as u64) > max_bytes {
        return Err(UploadError::TooLarge);
    }

    sanitize_filename(&filename)?;
    Ok(ParsedUpload { filename, contents })
}

/// Reject empty names, path separators, and the Windows-reserved current/
/// parent-directory tokens — an upload only ever writes a single basename
/// into the session's uploads directory.
fn sanitize_filename(name: &str) -> Result<(), UploadError> {
    if name.is_empty() {
        return Err(UploadError::EmptyFilename);
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(UploadError::UnsafeFilename(name.to_string()));
    }
    Ok(())
}

/// Directory under a session's working directory where uploads land.
pub fn uploads_dir(workdir: &Path) -> PathBuf {
    workdir.join(".swe-swe").join("uploads")
}

/// Write the parsed upload to `<workdir>/.swe-swe/uploads/<filename>`,
/// replacing an existing file of the same name. Returns the absolute path
/// written, for the `file_uploaded` notification and the PTY path-write
/// side effect.
pub fn write_upload(workdir: &Path, upload: &ParsedUpload<'_>) -> Result<PathBuf, UploadError> {
    let dir = uploads_dir(workdir);
    std::fs::create_dir_all(&dir).map_err(UploadError::Io)?;
    let dest = dir.join(&upload.filename);
    std::fs::write(&dest, upload.contents).map_err(UploadError::Io)?;
    dest.canonicalize().map_err(UploadError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(name: &str, contents: &[u8]) -> Vec<u8> {
        let mut buf = vec![UPLOAD_TAG];
        buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(contents);
        buf
    }

    #[test]
    fn round_trips_through_write() {
        let tmp = tempfile::tempdir().unwrap();
        let env = envelope("notes.txt", b"hello upload");
        let parsed = parse_envelope(&env, 1024).unwrap();
        assert_eq!(parsed.filename, "notes.txt");
        let path = write_upload(tmp.path(), &parsed).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello upload");
    }

    #[test]
    fn rejects_path_traversal_filename() {
        let env = envelope("../../etc/passwd", b"x");
        assert!(matches!(
            parse_envelope(&env, 1024),
            Err(UploadError::UnsafeFilename(_))
        ));
    }

    #[test]
    fn rejects_oversized_upload() {
        let env = envelope("big.bin", &vec![0u8; 2048]);
        assert!(matches!(parse_envelope(&env, 1024), Err(UploadError::TooLarge)));
    }

    #[test]
    fn rejects_truncated_envelope() {
        assert!(matches!(parse_envelope(&[UPLOAD_TAG, 0], 1024), Err(UploadError::Truncated)));
        assert!(matches!(
            parse_envelope(&[UPLOAD_TAG, 0, 5, b'a'], 1024),
            Err(UploadError::Truncated)
        ));
    }

    #[test]
    fn rejects_wrong_tag() {
        let env = envelope("a.txt", b"x");
        let mut bad = env.clone();
        bad[0] = 0x02;
        assert!(matches!(parse_envelope(&bad, 1024), Err(UploadError::UnsupportedTag(0x02))));
    }
}
