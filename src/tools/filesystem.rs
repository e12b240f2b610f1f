//! Built-in filesystem tools: `list_directory` and `read_file`.
//!
//! Paths accept a leading `~` for the home directory. Hidden entries are
//! skipped when listing.

use std::path::PathBuf;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent_core::registry::{Tool, ToolInvoker};
use crate::inference::config::expand_tilde;
use crate::inference::ToolDefinition;

/// Files longer than this are cut, with a note saying so.
pub const MAX_READ_CHARS: usize = 8_000;

/// Check if a file is hidden (cross-platform).
///
/// On Unix: files starting with '.' are hidden by convention.
/// On Windows: files with the `FILE_ATTRIBUTE_HIDDEN` attribute are hidden.
fn is_hidden(name: &str, _metadata: &std::fs::Metadata) -> bool {
    #[cfg(not(target_os = "windows"))]
    {
        name.starts_with('.')
    }
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::fs::MetadataExt;
        const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
        _metadata.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0
    }
}

fn format_file_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn path_argument(arguments: &Value) -> anyhow::Result<PathBuf> {
    let path = arguments
        .get("path")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .context("missing required argument 'path'")?;
    Ok(PathBuf::from(expand_tilde(path)))
}

fn path_schema(example: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": {
                "type": "string",
                "description": format!("Path, e.g. {example}")
            }
        },
        "required": ["path"]
    })
}

// ─── list_directory ──────────────────────────────────────────────────────────

pub struct ListDirectory;

#[async_trait]
impl ToolInvoker for ListDirectory {
    async fn invoke(&self, arguments: Value) -> anyhow::Result<Value> {
        let dir = path_argument(&arguments)?;
        if !dir.is_dir() {
            bail!("not a directory: {}", dir.display());
        }

        let mut read_dir = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("failed to read directory {}", dir.display()))?;

        // (is_dir, name, size)
        let mut entries: Vec<(bool, String, u64)> = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_hidden(&name, &metadata) {
                continue;
            }
            entries.push((metadata.is_dir(), name, metadata.len()));
        }

        if entries.is_empty() {
            return Ok(json!("Directory is empty."));
        }

        // Directories first, then files, both alphabetically.
        entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.to_lowercase().cmp(&b.1.to_lowercase())));

        let lines: Vec<String> = entries
            .iter()
            .map(|(is_dir, name, size)| {
                if *is_dir {
                    format!("[dir]  {name}/")
                } else {
                    format!("[file] {name} ({})", format_file_size(*size))
                }
            })
            .collect();

        Ok(Value::String(lines.join("\n")))
    }
}

impl Tool for ListDirectory {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_directory".into(),
            description: "List files and directories at the given path, with sizes. \
                Use ~/path for home-relative paths."
                .into(),
            parameters: path_schema("~/Desktop"),
        }
    }
}

// ─── read_file ───────────────────────────────────────────────────────────────

pub struct ReadFile;

#[async_trait]
impl ToolInvoker for ReadFile {
    async fn invoke(&self, arguments: Value) -> anyhow::Result<Value> {
        let path = path_argument(&arguments)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;

        let total = content.chars().count();
        if total <= MAX_READ_CHARS {
            return Ok(Value::String(content));
        }

        let head: String = content.chars().take(MAX_READ_CHARS).collect();
        Ok(Value::String(format!(
            "{head}\n\n[... truncated, showing first {MAX_READ_CHARS} of {total} characters]"
        )))
    }
}

impl Tool for ReadFile {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".into(),
            description: "Read the text contents of a file. Only works for text files; \
                long files are truncated."
                .into(),
            parameters: path_schema("~/Desktop/notes.txt"),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
