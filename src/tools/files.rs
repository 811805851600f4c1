//! Store-backed tools: read, write, list, delete, search and patch

use tracing::debug;

use super::{ToolContext, ToolError};
use crate::store::{FileEntry, ProjectPath};

/// Matches shown before the remainder is summarized
const SEARCH_LIMIT: usize = 20;

pub(super) async fn read_file(ctx: &ToolContext<'_>, path: &str) -> Result<String, ToolError> {
    let path = ProjectPath::new(path)?;
    Ok(match ctx.store.read_file(ctx.project_id, &path).await? {
        Some(content) => content,
        None => format!("Error: File {} not found.", path),
    })
}

pub(super) async fn write_file(ctx: &ToolContext<'_>, path: &str, content: &str) -> Result<String, ToolError> {
    let path = ProjectPath::new(path)?;
    ctx.store.write_file(ctx.project_id, &path, content).await?;
    debug!(project_id = %ctx.project_id, path = %path, bytes = content.len(), "Agent wrote file");
    Ok("File saved successfully.".to_string())
}

pub(super) async fn list_files(ctx: &ToolContext<'_>) -> Result<String, ToolError> {
    let files = ctx.store.list_files(ctx.project_id).await?;
    let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
    Ok(serde_json::to_string(&paths).unwrap_or_else(|_| "[]".to_string()))
}

pub(super) async fn delete_file(ctx: &ToolContext<'_>, path: &str) -> Result<String, ToolError> {
    let path = ProjectPath::new(path)?;
    let existed = ctx.store.delete_file(ctx.project_id, &path).await?;
    debug!(project_id = %ctx.project_id, path = %path, existed, "Agent deleted file");
    Ok("File deleted successfully.".to_string())
}

pub(super) async fn search_files(
    ctx: &ToolContext<'_>,
    pattern: &str,
    file_pattern: Option<&str>,
) -> Result<String, ToolError> {
    if pattern.is_empty() {
        return Ok("Error: pattern must not be empty.".to_string());
    }
    let files = ctx.store.list_files(ctx.project_id).await?;
    Ok(format_search(&search(&files, pattern, file_pattern)))
}

pub(super) async fn patch_file(
    ctx: &ToolContext<'_>,
    path: &str,
    old_content: &str,
    new_content: &str,
) -> Result<String, ToolError> {
    let path = ProjectPath::new(path)?;
    let Some(current) = ctx.store.read_file(ctx.project_id, &path).await? else {
        return Ok(format!("Error: File {} not found.", path));
    };
    if !current.contains(old_content) {
        return Ok(format!(
            "Error: Could not find the specified content to replace in {}. \
             The content may have already been changed or the match is not exact.",
            path
        ));
    }
    let patched = current.replacen(old_content, new_content, 1);
    ctx.store.write_file(ctx.project_id, &path, &patched).await?;
    Ok(format!("Successfully patched {}", path))
}

/// One matching line
#[derive(Debug, Clone, PartialEq)]
pub struct SearchMatch {
    pub path: String,
    /// 1-based
    pub line: usize,
    /// The matching line, trimmed
    pub content: String,
}

/// Path filter where `*` stands for any run of characters
///
/// The pattern may match anywhere in the path, so `*.tsx` keeps every path
/// containing `.tsx` and `components` keeps every path under a components
/// directory.
pub fn matches_file_pattern(path: &str, file_pattern: &str) -> bool {
    let mut rest = path;
    for segment in file_pattern.split('*').filter(|s| !s.is_empty()) {
        match rest.find(segment) {
            Some(index) => rest = &rest[index + segment.len()..],
            None => return false,
        }
    }
    true
}

fn search(files: &[FileEntry], pattern: &str, file_pattern: Option<&str>) -> Vec<SearchMatch> {
    files
        .iter()
        .filter(|file| file_pattern.map_or(true, |fp| matches_file_pattern(file.path.as_str(), fp)))
        .flat_map(|file| {
            file.content
                .split('\n')
                .enumerate()
                .filter(|(_, line)| line.contains(pattern))
                .map(|(index, line)| SearchMatch {
                    path: file.path.to_string(),
                    line: index + 1,
                    content: line.trim().to_string(),
                })
        })
        .collect()
}

/// Render matches, capped at the first 20 with a count of the rest
pub fn format_search(matches: &[SearchMatch]) -> String {
    if matches.is_empty() {
        return "No matches found.".to_string();
    }
    let mut out = format!("Found {} matches:", matches.len());
    for m in matches.iter().take(SEARCH_LIMIT) {
        out.push_str(&format!("\n{}:{} - {}", m.path, m.line, m.content));
    }
    if matches.len() > SEARCH_LIMIT {
        out.push_str(&format!("\n... and {} more", matches.len() - SEARCH_LIMIT));
    }
    out
}
