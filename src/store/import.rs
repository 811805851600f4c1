//! Seeding a project from a template directory on disk

use std::path::{Path, PathBuf};

use tracing::debug;

use super::{ProjectId, ProjectPath, ProjectStore, StoreError};

/// Directories never copied into a project
const SKIPPED_DIRS: &[&str] = &["node_modules", ".git", ".next", "dist"];

/// Extensions of binary assets, which the store cannot hold as text
const BINARY_EXTENSIONS: &[&str] = &["ico", "png", "jpg", "jpeg", "gif", "woff", "woff2", "ttf", "eot"];

fn is_binary(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| BINARY_EXTENSIONS.iter().any(|b| b.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Copy every text file under `root` into the project, returning how many were written
///
/// Paths are stored relative to `root`. Binary assets, dependency folders and
/// files that are not valid UTF-8 are skipped.
pub async fn import_dir(store: &dyn ProjectStore, project_id: &ProjectId, root: &Path) -> Result<usize, StoreError> {
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];
    let mut written = 0;

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if file_type.is_dir() {
                if !SKIPPED_DIRS.contains(&name.as_ref()) {
                    pending.push(path);
                }
                continue;
            }
            if !file_type.is_file() || is_binary(&path) {
                continue;
            }

            let bytes = tokio::fs::read(&path).await?;
            let Ok(content) = String::from_utf8(bytes) else {
                debug!(path = %path.display(), "Skipping non-UTF-8 file");
                continue;
            };
            let relative = path.strip_prefix(root).unwrap_or(&path);
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            store
                .write_file(project_id, &ProjectPath::new(&relative)?, &content)
                .await?;
            written += 1;
        }
    }

    debug!(project_id = %project_id, files = written, "Imported template directory");
    Ok(written)
}
