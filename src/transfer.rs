//! File transfer over the SFTP subsystem.
//!
//! Single-file copies open the named path directly. Wildcard copies expand
//! the source glob verbatim (against the remote directory listing for
//! downloads, against the local filesystem for uploads) and copy every
//! match into the destination directory. A missing source path on a live
//! transport is a transfer failure, not a connection failure.

use std::path::Path;

use glob::Pattern;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::ExecError;
use crate::types::TransferDirection;

/// Copy between `local` and `remote` in the given direction.
pub(crate) async fn run(
    sftp: &SftpSession,
    local: &Path,
    remote: &str,
    direction: TransferDirection,
    wildcard: bool,
) -> Result<(), ExecError> {
    match (direction, wildcard) {
        (TransferDirection::Upload, false) => upload_file(sftp, local, remote).await,
        (TransferDirection::Download, false) => download_file(sftp, remote, local).await,
        (TransferDirection::Upload, true) => upload_wildcard(sftp, local, remote).await,
        (TransferDirection::Download, true) => download_wildcard(sftp, remote, local).await,
    }
}

/// Split a remote glob into its directory and the pattern to match inside
/// it. A bare pattern matches in the remote working directory.
pub(crate) fn split_wildcard(remote: &str) -> (&str, &str) {
    match remote.rsplit_once('/') {
        Some(("", pattern)) => ("/", pattern),
        Some((dir, pattern)) => (dir, pattern),
        None => (".", remote),
    }
}

async fn upload_file(sftp: &SftpSession, local: &Path, remote: &str) -> Result<(), ExecError> {
    debug!("Uploading {} to {}", local.display(), remote);

    let contents = tokio::fs::read(local)
        .await
        .map_err(|e| ExecError::Transfer(format!("local path {}: {}", local.display(), e)))?;

    let mut file = sftp
        .open_with_flags(
            remote,
            OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
        )
        .await
        .map_err(|e| ExecError::Transfer(format!("remote path {}: {}", remote, e)))?;

    file.write_all(&contents)
        .await
        .map_err(|e| ExecError::Transfer(format!("writing {}: {}", remote, e)))?;
    file.flush()
        .await
        .map_err(|e| ExecError::Transfer(format!("flushing {}: {}", remote, e)))?;
    file.shutdown()
        .await
        .map_err(|e| ExecError::Transfer(format!("closing {}: {}", remote, e)))?;

    Ok(())
}

async fn download_file(sftp: &SftpSession, remote: &str, local: &Path) -> Result<(), ExecError> {
    debug!("Downloading {} to {}", remote, local.display());

    let mut remote_file = sftp
        .open_with_flags(remote, OpenFlags::READ)
        .await
        .map_err(|e| ExecError::Transfer(format!("remote path {}: {}", remote, e)))?;

    let mut contents = Vec::new();
    remote_file
        .read_to_end(&mut contents)
        .await
        .map_err(|e| ExecError::Transfer(format!("reading {}: {}", remote, e)))?;

    tokio::fs::write(local, contents)
        .await
        .map_err(|e| ExecError::Transfer(format!("local path {}: {}", local.display(), e)))?;

    Ok(())
}

/// Upload every local file matching the glob into the remote directory.
async fn upload_wildcard(
    sftp: &SftpSession,
    local_pattern: &Path,
    remote_dir: &str,
) -> Result<(), ExecError> {
    let pattern = local_pattern.to_string_lossy();
    let matches = glob::glob(&pattern)
        .map_err(|e| ExecError::Transfer(format!("bad pattern {}: {}", pattern, e)))?;

    let remote_dir = remote_dir.trim_end_matches('/');
    let mut copied = 0usize;

    for entry in matches {
        let path =
            entry.map_err(|e| ExecError::Transfer(format!("reading match: {}", e)))?;
        if !path.is_file() {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ExecError::Transfer(format!("match {} has no file name", path.display()))
            })?;
        upload_file(sftp, &path, &format!("{}/{}", remote_dir, name)).await?;
        copied += 1;
    }

    if copied == 0 {
        return Err(ExecError::Transfer(format!(
            "no local files match pattern {}",
            pattern
        )));
    }
    Ok(())
}

/// Download every remote file matching the glob into the local directory.
async fn download_wildcard(
    sftp: &SftpSession,
    remote_pattern: &str,
    local_dir: &Path,
) -> Result<(), ExecError> {
    let (remote_dir, name_pattern) = split_wildcard(remote_pattern);
    let pattern = Pattern::new(name_pattern)
        .map_err(|e| ExecError::Transfer(format!("bad pattern {}: {}", name_pattern, e)))?;

    let entries = sftp
        .read_dir(remote_dir)
        .await
        .map_err(|e| ExecError::Transfer(format!("remote directory {}: {}", remote_dir, e)))?;

    let mut copied = 0usize;

    for entry in entries {
        let name = entry.file_name();
        if !pattern.matches(&name) {
            continue;
        }
        let remote_path = format!("{}/{}", remote_dir.trim_end_matches('/'), name);
        let metadata = sftp
            .metadata(&remote_path)
            .await
            .map_err(|e| ExecError::Transfer(format!("remote path {}: {}", remote_path, e)))?;
        if metadata.is_dir() {
            continue;
        }
        download_file(sftp, &remote_path, &local_dir.join(&name)).await?;
        copied += 1;
    }

    if copied == 0 {
        return Err(ExecError::Transfer(format!(
            "no remote files match pattern {}",
            remote_pattern
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    mod wildcard_splitting {
        use super::*;

        #[test]
        fn test_absolute_path() {
            assert_eq!(split_wildcard("/tmp/results/*.log"), ("/tmp/results", "*.log"));
        }

        #[test]
        fn test_root_level_pattern() {
            assert_eq!(split_wildcard("/*.log"), ("/", "*.log"));
        }

        #[test]
        fn test_bare_pattern_matches_working_directory() {
            assert_eq!(split_wildcard("*.pcap"), (".", "*.pcap"));
        }

        #[test]
        fn test_relative_directory() {
            assert_eq!(split_wildcard("logs/run-?.txt"), ("logs", "run-?.txt"));
        }
    }

    mod pattern_matching {
        use super::*;

        #[test]
        fn test_star_matches_extension() {
            let pattern = Pattern::new("*.log").unwrap();
            assert!(pattern.matches("trace.log"));
            assert!(!pattern.matches("trace.txt"));
        }

        #[test]
        fn test_question_mark_matches_single_char() {
            let pattern = Pattern::new("run-?.txt").unwrap();
            assert!(pattern.matches("run-1.txt"));
            assert!(!pattern.matches("run-12.txt"));
        }

        #[test]
        fn test_literal_name_matches_itself_only() {
            let pattern = Pattern::new("exact.cfg").unwrap();
            assert!(pattern.matches("exact.cfg"));
            assert!(!pattern.matches("inexact.cfg"));
        }
    }
}
