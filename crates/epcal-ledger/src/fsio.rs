//! Durable file primitives.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{LedgerError, LedgerResult};

/// Replace `path` with `data` atomically: write a sibling temp file, fsync,
/// rename over the target.
pub fn write_atomic(path: &Path, data: &[u8]) -> LedgerResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| LedgerError::InvalidIteration(format!("no parent for {}", path.display())))?;
    fs::create_dir_all(dir).map_err(|e| LedgerError::io(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| LedgerError::io(dir, e))?;
    tmp.write_all(data).map_err(|e| LedgerError::io(path, e))?;
    tmp.as_file().sync_all().map_err(|e| LedgerError::io(path, e))?;
    tmp.persist(path).map_err(|e| LedgerError::io(path, e.error))?;
    Ok(())
}

/// Append `line` plus a newline and fsync before returning.
pub fn append_line(path: &Path, line: &str) -> LedgerResult<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LedgerError::io(path, e))?;
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    file.write_all(buf.as_bytes())
        .map_err(|e| LedgerError::io(path, e))?;
    file.sync_all().map_err(|e| LedgerError::io(path, e))
}

/// Drop a partially written final line left by an interrupted append.
/// Returns whether anything was cut.
pub fn repair_torn_tail(path: &Path) -> LedgerResult<bool> {
    let mut file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(LedgerError::io(path, e)),
    };
    let mut content = Vec::new();
    file.read_to_end(&mut content)
        .map_err(|e| LedgerError::io(path, e))?;
    if content.is_empty() || content.ends_with(b"\n") {
        return Ok(false);
    }

    let keep = content
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|i| i + 1)
        .unwrap_or(0);
    file.set_len(keep as u64)
        .map_err(|e| LedgerError::io(path, e))?;
    file.seek(SeekFrom::End(0))
        .map_err(|e| LedgerError::io(path, e))?;
    file.sync_all().map_err(|e| LedgerError::io(path, e))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/meta.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn torn_tail_is_trimmed_to_last_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        fs::write(&path, "{\"a\":1}\n{\"a\":").unwrap();

        assert!(repair_torn_tail(&path).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":1}\n");
        assert!(!repair_torn_tail(&path).unwrap());

        append_line(&path, "{\"a\":2}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn repair_of_missing_file_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!repair_torn_tail(&dir.path().join("absent")).unwrap());
    }
}
