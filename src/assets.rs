use anyhow::{anyhow, Context};
use sha2::{Digest, Sha256};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct StoredAsset {
    /// Workspace-relative path, usable directly as a serving URL.
    pub public_url: String,
    pub sha256: String,
    pub byte_len: u64,
}

/// Copy a local file into the workspace asset store under `subdir`
/// (e.g. "homework", "photos"). Files are content-addressed by the first
/// 16 hex chars of their sha256, so re-uploading identical content is a
/// no-op and nothing is ever partially visible.
pub fn store_file(
    workspace: &Path,
    source_path: &Path,
    subdir: &str,
) -> anyhow::Result<StoredAsset> {
    if !source_path.is_file() {
        return Err(anyhow!(
            "source file not found: {}",
            source_path.to_string_lossy()
        ));
    }

    let bytes = std::fs::read(source_path)
        .with_context(|| format!("failed to read {}", source_path.to_string_lossy()))?;
    let digest = Sha256::digest(&bytes);
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();

    let ext = source_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();
    let file_name = format!("{}{}", &hex[..16], ext);

    let dir = workspace.join("assets").join(subdir);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.to_string_lossy()))?;
    let dest = dir.join(&file_name);
    if !dest.exists() {
        std::fs::write(&dest, &bytes)
            .with_context(|| format!("failed to write {}", dest.to_string_lossy()))?;
    }

    Ok(StoredAsset {
        public_url: format!("assets/{}/{}", subdir, file_name),
        sha256: hex,
        byte_len: bytes.len() as u64,
    })
}
