//! Per-run log files for captured process output.
use std::{
    fs::{self, File},
    io::{self, BufRead, BufReader, LineWriter, Read, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    thread::{self, JoinHandle},
};

use chrono::{DateTime, Local};
use strum_macros::{AsRefStr, Display};
use tracing::{debug, warn};

use crate::error::LogOpenError;

/// Which stream of the child a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum OutputChannel {
    /// Standard output, logged as `INFO`.
    #[strum(serialize = "INFO")]
    Stdout,
    /// Standard error, logged as `ERROR`.
    #[strum(serialize = "ERROR")]
    Stderr,
}

impl OutputChannel {
    /// Short stream name used for thread names and diagnostics.
    pub fn stream_name(&self) -> &'static str {
        match self {
            OutputChannel::Stdout => "stdout",
            OutputChannel::Stderr => "stderr",
        }
    }
}

/// Formats one log line: `HH:MM:SS.mmm [INFO|ERROR] <text>`.
pub fn format_line(channel: OutputChannel, timestamp: &DateTime<Local>, text: &str) -> String {
    format!("{} [{}] {}", timestamp.format("%H:%M:%S%.3f"), channel, text)
}

/// Log file name for one run: `<name> - <YYYY-MM-DD HH_MM_SS>.log`.
///
/// Second resolution only; two runs of the same name within one second share a file.
pub fn log_file_name(name: &str, timestamp: &DateTime<Local>) -> String {
    format!(
        "{}{}.log",
        log_file_prefix(name),
        timestamp.format("%Y-%m-%d %H_%M_%S")
    )
}

fn log_file_prefix(name: &str) -> String {
    let safe_name: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    format!("{safe_name} - ")
}

/// Thread-safe writer for one process's captured output.
///
/// Clones share the same file. Writes are serialized by a mutex, and once the sink is
/// closed every later write is dropped.
#[derive(Debug, Clone)]
pub struct LogSink {
    path: PathBuf,
    writer: Arc<Mutex<Option<LineWriter<File>>>>,
}

impl LogSink {
    /// Creates (or truncates) the log file at `path`.
    pub fn open(path: &Path) -> Result<Self, LogOpenError> {
        let file = File::create(path).map_err(|source| LogOpenError {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Opened log file {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            writer: Arc::new(Mutex::new(Some(LineWriter::new(file)))),
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, Option<LineWriter<File>>> {
        self.writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends one formatted line.
    ///
    /// `None` marks end of stream and is dropped. Returns whether a line reached the file.
    pub fn write_line(
        &self,
        channel: OutputChannel,
        timestamp: DateTime<Local>,
        text: Option<&str>,
    ) -> bool {
        let Some(text) = text else {
            return false;
        };

        let mut guard = self.guard();
        let Some(writer) = guard.as_mut() else {
            return false;
        };

        let line = format_line(channel, &timestamp, text);
        match writeln!(writer, "{line}") {
            Ok(()) => true,
            Err(err) => {
                warn!("Failed to write to {}: {err}", self.path.display());
                false
            }
        }
    }

    /// Flushes and releases the file. Closing a closed sink is a no-op.
    pub fn close(&self) -> io::Result<()> {
        let writer = self.guard().take();
        match writer {
            Some(mut writer) => {
                debug!("Closing log file {}", self.path.display());
                writer.flush()
            }
            None => Ok(()),
        }
    }

}

/// Longest line forwarded as one log entry; longer output is split into chunks of this size.
pub const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Spawns a thread that forwards each line of `reader` into `sink`.
///
/// The thread ends when the stream reaches EOF, which happens once the process and every
/// descendant holding the pipe have exited.
pub fn spawn_output_reader<R>(
    name: &str,
    reader: R,
    channel: OutputChannel,
    sink: LogSink,
) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    let label = format!("{name}-{}", channel.stream_name());
    thread::Builder::new()
        .name(label.clone())
        .spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut buffer = Vec::new();
            loop {
                buffer.clear();
                let mut limited = (&mut reader).take(MAX_LINE_BYTES);
                match limited.read_until(b'\n', &mut buffer) {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&buffer);
                        let text = text.trim_end_matches(['\n', '\r']);
                        sink.write_line(channel, Local::now(), Some(text));
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        debug!("Output reader {label} stopped: {err}");
                        break;
                    }
                }
            }
            sink.write_line(channel, Local::now(), None);
            debug!("Output reader {label} reached end of stream");
        })
}

/// Newest log file for `name` in `log_dir`, if any.
pub fn latest_log(log_dir: &Path, name: &str) -> io::Result<Option<PathBuf>> {
    let prefix = log_file_prefix(name);

    let mut candidates: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|file| file.to_str())
                .is_some_and(|file| file.starts_with(&prefix) && file.ends_with(".log"))
        })
        .collect();

    candidates.sort();
    Ok(candidates.pop())
}

/// Reads the last `lines` lines of a file.
pub fn tail_lines(path: &Path, lines: usize) -> io::Result<Vec<String>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let all_lines: Vec<String> = reader.lines().map_while(Result::ok).collect();

    let start = all_lines.len().saturating_sub(lines);
    Ok(all_lines[start..].to_vec())
}

/// Prints the last `lines` lines of the newest log for `name` to stdout.
pub fn show_logs(log_dir: &Path, name: &str, lines: usize) -> io::Result<()> {
    let Some(path) = latest_log(log_dir, name)? else {
        eprintln!("Error: no log file for '{name}' in {}", log_dir.display());
        return Ok(());
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "==> {} <==", path.display())?;
    for line in tail_lines(&path, lines)? {
        writeln!(out, "{line}")?;
    }
    Ok(())
}
