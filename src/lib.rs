//! Lumen: a streaming, tool-using assistant core.
//!
//! - [`inference`]: the model gateway (SSE streaming, tool-call reassembly,
//!   routing, fallback) and configuration
//! - [`agent_core`]: the capability registry, the task orchestrator and
//!   conversation memory
//! - [`protocol`]: the chunk protocol shared by all of the above
//! - [`tools`]: built-in tools

pub mod agent_core;
pub mod inference;
pub mod protocol;
pub mod tools;

use std::path::{Path, PathBuf};

pub use agent_core::{AgentError, ConversationManager, Orchestrator, TaskContext, ToolRegistry};
pub use inference::{AssistantConfig, InferenceClient, InferenceError, ModelGateway};
pub use protocol::{AgentStatus, StreamChunk};

/// Return the platform-standard data directory for Lumen.
///
/// - macOS: `~/Library/Application Support/com.lumen.app/`
/// - Windows: `{FOLDERID_RoamingAppData}\com.lumen.app\`
/// - Linux: `$XDG_DATA_HOME/com.lumen.app/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.lumen/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("com.lumen.app");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lumen")
}

/// Initialize the tracing subscriber, writing structured logs to the data directory.
///
/// On each startup:
/// 1. Rotates existing logs (lumen.log → lumen.log.1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh lumen.log with a line-flushing writer for crash resilience.
/// 3. Logs a startup banner with the data directory path for discoverability.
///
/// Stdout is left alone: it carries the chunk stream.
pub fn init_tracing() -> std::io::Result<PathBuf> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = data_dir();
    std::fs::create_dir_all(&log_dir)?;

    let log_path = log_dir.join("lumen.log");

    // Rotate: lumen.log.2 → .3, .1 → .2, lumen.log → .1
    rotate_log_file(&log_path, 3);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lumen=info,warn"));

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(|e| std::io::Error::other(format!("tracing already initialized: {e}")))?;

    // Startup banner: makes it easy to find the right log file
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %log_dir.display(),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== Lumen starting ==="
    );

    Ok(log_path)
}

/// Rotate log files: `lumen.log` → `lumen.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    // Delete the oldest
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    // Shift: .{n-1} → .{n}
    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    // Current → .1
    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write.
///
/// Without explicit flushing, log entries may sit in OS buffers and be lost
/// on crash.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_rotate_log_file_shifts_and_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("lumen.log");
        for (suffix, body) in [("", "current"), (".1", "one"), (".2", "two"), (".3", "three")] {
            std::fs::write(format!("{}{suffix}", base.display()), body).unwrap();
        }

        rotate_log_file(&base, 3);

        assert!(!base.exists());
        let read = |suffix: &str| std::fs::read_to_string(format!("{}{suffix}", base.display())).unwrap();
        assert_eq!(read(".1"), "current");
        assert_eq!(read(".2"), "one");
        assert_eq!(read(".3"), "two");
    }

    #[test]
    fn test_flushing_writer_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = FlushingWriter::new(file);
        writer.write_all(b"line\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line\n");
    }

    #[test]
    fn test_data_dir_is_app_specific() {
        let dir = data_dir();
        let name = dir.file_name().unwrap().to_string_lossy();
        assert!(name == "com.lumen.app" || name == ".lumen");
    }
}
