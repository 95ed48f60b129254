//! Markdown export to the local file system.

use crate::error::CapabilityError;
use crate::pipeline::Exporter;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `<output_dir>/<stem>.md`, or `<source dir>/<stem>.md` without an output dir.
pub fn output_path_for(source: &Path, output_dir: Option<&Path>) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "output".into());
    let mut name = stem;
    name.push(".md");
    match output_dir {
        Some(dir) => dir.join(name),
        None => source.with_file_name(name),
    }
}

/// Write `bytes` to `path` via a temp file in the same directory and a rename,
/// so readers never observe a partial file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// [`Exporter`] that writes UTF-8 Markdown files atomically.
#[derive(Debug, Clone, Default)]
pub struct FileExporter;

#[async_trait]
impl Exporter for FileExporter {
    async fn export(&self, markdown: &str, destination: &Path) -> Result<PathBuf, CapabilityError> {
        let path = destination.to_path_buf();
        let bytes = markdown.as_bytes().to_vec();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
            .await
            .map_err(|e| CapabilityError::fatal(format!("export task failed: {e}")))?
            .map_err(|e| {
                let msg = format!("Cannot write '{}': {}", path.display(), e);
                // Only interrupted writes are worth another attempt.
                match e.kind() {
                    std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock => {
                        CapabilityError::transient(msg)
                    }
                    _ => CapabilityError::fatal(msg),
                }
            })?;
        debug!("Wrote {} bytes to {}", markdown.len(), path.display());
        Ok(path)
    }
}
