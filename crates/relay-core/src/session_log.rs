//! Durable per-request session records.
//!
//! Each relayed request produces one plain-text file named after the
//! request's start time, e.g. `model_output_20261018_140322.txt`. Records are
//! written whole with exclusive create, so concurrent requests never share a
//! file and no locking is needed.

use std::fmt::Write as _;
use std::future::Future;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SubsecRound, Utc};
use chrono_tz::Tz;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use crate::error::RelayError;
use crate::types::PromptDocument;

/// Zone used for filenames and timestamps unless configured otherwise.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::Los_Angeles;

/// Directory used when none is configured.
pub const DEFAULT_OUTPUT_DIR: &str = "model_outputs";

const FILE_PREFIX: &str = "model_output_";
const FILE_EXTENSION: &str = "txt";
const IMAGE_MARKER: &str = "[image attached]";
const PROBE_PREFIX: &str = ".write_probe-";

/// Upper bound on `_n` suffixes tried for one second.
const MAX_COLLISION_SUFFIX: u32 = 1000;

#[derive(Debug, Clone)]
pub struct SessionLogConfig {
    pub output_dir: PathBuf,
    pub timezone: Tz,
}

impl Default for SessionLogConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            timezone: DEFAULT_TIMEZONE,
        }
    }
}

/// What gets persisted for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Request start, second resolution.
    pub timestamp: DateTime<Tz>,
    pub system_prompt: String,
    pub user_message: String,
    pub image_present: bool,
    /// Everything forwarded to the client, possibly partial.
    pub full_output: String,
}

impl SessionRecord {
    pub fn new(timestamp: DateTime<Tz>, document: &PromptDocument, full_output: String) -> Self {
        Self {
            timestamp,
            system_prompt: document.system_prompt().to_owned(),
            user_message: document.user_message().to_owned(),
            image_present: document.has_image(),
            full_output,
        }
    }

    /// Render the record as the text written to disk.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(
            self.system_prompt.len() + self.user_message.len() + self.full_output.len() + 128,
        );
        let _ = writeln!(out, "timestamp: {}", self.timestamp.to_rfc3339());
        let _ = writeln!(out);
        let _ = writeln!(out, "=== SYSTEM PROMPT ===");
        let _ = writeln!(out, "{}", self.system_prompt);
        let _ = writeln!(out);
        let _ = writeln!(out, "=== USER MESSAGE ===");
        let _ = writeln!(out, "{}", self.user_message);
        if self.image_present {
            let _ = writeln!(out, "{IMAGE_MARKER}");
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "=== MODEL OUTPUT ===");
        let _ = writeln!(out, "{}", self.full_output);
        out
    }
}

/// Writes [`SessionRecord`]s into a directory.
#[derive(Debug, Clone)]
pub struct SessionLog {
    config: SessionLogConfig,
}

impl SessionLog {
    pub fn new(config: SessionLogConfig) -> Self {
        Self { config }
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    /// Current time in the configured zone, truncated to whole seconds.
    pub fn now(&self) -> DateTime<Tz> {
        Utc::now()
            .with_timezone(&self.config.timezone)
            .trunc_subsecs(0)
    }

    /// Filename for a record started at `timestamp`.
    ///
    /// `attempt` 0 is the plain name; later attempts add a `_<attempt>`
    /// suffix for records that share a second.
    pub fn file_name(timestamp: &DateTime<Tz>, attempt: u32) -> String {
        let stem = timestamp.format("%Y%m%d_%H%M%S");
        if attempt == 0 {
            format!("{FILE_PREFIX}{stem}.{FILE_EXTENSION}")
        } else {
            format!("{FILE_PREFIX}{stem}_{attempt}.{FILE_EXTENSION}")
        }
    }

    /// Persist one record and return the path written.
    ///
    /// Creates the directory if needed. An existing file for the same second
    /// is never overwritten; the record goes to `model_output_<ts>_<n>.txt`
    /// instead. A record that fails mid-write is removed again.
    pub async fn record(&self, entry: &SessionRecord) -> Result<PathBuf, RelayError> {
        fs::create_dir_all(&self.config.output_dir).await?;

        let contents = entry.render();

        for attempt in 0..MAX_COLLISION_SUFFIX {
            let path = self
                .config
                .output_dir
                .join(Self::file_name(&entry.timestamp, attempt));

            let file = match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };
            write_or_discard(&path, write_all(file, contents.as_bytes())).await?;
            return Ok(path);
        }

        Err(RelayError::Io(io::Error::new(
            ErrorKind::AlreadyExists,
            format!(
                "no free session log name left for {}",
                Self::file_name(&entry.timestamp, 0)
            ),
        )))
    }

    /// Check that the directory exists (creating it) and accepts writes.
    ///
    /// Each call uses its own scratch file, so concurrent checks never see
    /// each other's.
    pub async fn probe(&self) -> Result<(), RelayError> {
        fs::create_dir_all(&self.config.output_dir).await?;
        let path = self
            .config
            .output_dir
            .join(format!("{PROBE_PREFIX}{}", Uuid::new_v4()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        write_or_discard(&path, write_all(file, b"ok")).await?;
        fs::remove_file(&path).await?;
        Ok(())
    }
}

async fn write_all(mut file: File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await
}

/// Await `write` on the freshly created `path`, removing the file on failure.
async fn write_or_discard(
    path: &Path,
    write: impl Future<Output = io::Result<()>>,
) -> io::Result<()> {
    let Err(e) = write.await else {
        return Ok(());
    };
    if let Err(cleanup) = fs::remove_file(path).await {
        warn!(path = %path.display(), error = %cleanup, "failed to remove partial file");
    }
    Err(e)
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;
    use crate::prompt;
    use crate::types::{ChatRequest, OutputMode};

    fn log_in(dir: &Path) -> SessionLog {
        SessionLog::new(SessionLogConfig {
            output_dir: dir.to_path_buf(),
            timezone: DEFAULT_TIMEZONE,
        })
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Tz> {
        DEFAULT_TIMEZONE
            .with_ymd_and_hms(2026, 10, 18, h, m, s)
            .single()
            .unwrap()
    }

    fn record(timestamp: DateTime<Tz>, image: Option<&str>, output: &str) -> SessionRecord {
        let doc = prompt::build(&ChatRequest::new(
            "hello",
            image.map(str::to_owned),
            OutputMode::Plain,
        ))
        .unwrap();
        SessionRecord::new(timestamp, &doc, output.to_owned())
    }

    #[test]
    fn file_name_uses_local_second_resolution() {
        assert_eq!(
            SessionLog::file_name(&at(14, 3, 22), 0),
            "model_output_20261018_140322.txt"
        );
        assert_eq!(
            SessionLog::file_name(&at(14, 3, 22), 2),
            "model_output_20261018_140322_2.txt"
        );
    }

    #[test]
    fn now_is_in_configured_zone_without_subseconds() {
        let log = SessionLog::new(SessionLogConfig {
            output_dir: PathBuf::from("unused"),
            timezone: chrono_tz::Asia::Tokyo,
        });
        let now = log.now();
        assert_eq!(now.timezone(), chrono_tz::Asia::Tokyo);
        assert_eq!(now.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn render_marks_image_without_embedding_it() {
        let text = record(at(9, 0, 0), Some("data:image/png;base64,SECRETBYTES"), "Hi there!").render();

        assert!(text.contains("=== SYSTEM PROMPT ===\n"));
        assert!(text.contains(prompt::SYSTEM_PROMPT));
        assert!(text.contains("=== USER MESSAGE ===\nhello\n[image attached]\n"));
        assert!(text.contains("=== MODEL OUTPUT ===\nHi there!\n"));
        assert!(!text.contains("SECRETBYTES"));
    }

    #[test]
    fn render_without_image_has_no_marker() {
        let text = record(at(9, 0, 0), None, "").render();
        assert!(!text.contains(IMAGE_MARKER));
    }

    #[tokio::test]
    async fn record_creates_directory_and_file() {
        let tmp = tempfile::tempdir().unwrap();
        let log = log_in(&tmp.path().join("nested").join("logs"));

        let entry = record(at(14, 3, 22), None, "Hi there!");
        let path = log.record(&entry).await.unwrap();

        assert_eq!(path.file_name().unwrap(), "model_output_20261018_140322.txt");
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, entry.render());
    }

    #[tokio::test]
    async fn distinct_seconds_give_distinct_files() {
        let tmp = tempfile::tempdir().unwrap();
        let log = log_in(tmp.path());

        let first = log.record(&record(at(10, 0, 1), None, "one")).await.unwrap();
        let second = log.record(&record(at(10, 0, 2), None, "two")).await.unwrap();

        assert_ne!(first, second);
        assert!(tokio::fs::read_to_string(first).await.unwrap().ends_with("one\n"));
        assert!(tokio::fs::read_to_string(second).await.unwrap().ends_with("two\n"));
    }

    #[tokio::test]
    async fn same_second_gets_a_suffix_instead_of_overwriting() {
        let tmp = tempfile::tempdir().unwrap();
        let log = log_in(tmp.path());

        let first = log.record(&record(at(10, 0, 1), None, "first")).await.unwrap();
        let second = log.record(&record(at(10, 0, 1), None, "second")).await.unwrap();

        assert_eq!(first.file_name().unwrap(), "model_output_20261018_100001.txt");
        assert_eq!(second.file_name().unwrap(), "model_output_20261018_100001_1.txt");
        assert!(tokio::fs::read_to_string(first).await.unwrap().ends_with("first\n"));
    }

    #[tokio::test]
    async fn concurrent_records_share_a_new_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let log = log_in(&tmp.path().join("fresh"));

        let writes = (0..8).map(|i| {
            let log = log.clone();
            tokio::spawn(async move { log.record(&record(at(11, 0, i), None, "x")).await })
        });
        for handle in writes {
            handle.await.unwrap().unwrap();
        }

        let mut entries = tokio::fs::read_dir(tmp.path().join("fresh")).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 8);
    }

    #[tokio::test]
    async fn unwritable_target_is_an_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        tokio::fs::write(&blocker, b"file").await.unwrap();
        let log = log_in(&blocker);

        assert!(matches!(log.probe().await, Err(RelayError::Io(_))));
        let err = log.record(&record(at(12, 0, 0), None, "x")).await.unwrap_err();
        assert!(matches!(err, RelayError::Io(_)));
    }

    #[tokio::test]
    async fn probe_leaves_no_files_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let log = log_in(tmp.path());

        log.probe().await.unwrap();
        let mut entries = tokio::fs::read_dir(tmp.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_writability_checks_all_succeed() {
        let tmp = tempfile::tempdir().unwrap();
        let log = log_in(tmp.path());

        for _ in 0..10 {
            let checks: Vec<_> = (0..16)
                .map(|_| {
                    let log = log.clone();
                    tokio::spawn(async move { log.probe().await })
                })
                .collect();
            for handle in checks {
                handle.await.unwrap().unwrap();
            }
        }

        let mut entries = tokio::fs::read_dir(tmp.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_write_leaves_no_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("model_output_20261018_120000.txt");
        tokio::fs::write(&path, b"=== SYSTEM PROMPT ===\nhalf").await.unwrap();

        let err = write_or_discard(&path, async { Err(io::Error::other("disk full")) })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "disk full");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn successful_write_is_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("kept.txt");
        let file = File::create(&path).await.unwrap();

        write_or_discard(&path, write_all(file, b"whole")).await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "whole");
    }
}
