use async_process::Command;
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{ExtractionError, Extractor, VideoInfo};

/// Extractor backed by the `yt-dlp` executable.
pub struct YtDlpExtractor {
    program: String,
    // Limit concurrent yt-dlp processes to avoid rate limiting
    rate_limiter: Semaphore,
}

impl YtDlpExtractor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            rate_limiter: Semaphore::new(3),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, ExtractionError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| ExtractionError::Unavailable(e.to_string()))?;

        debug!("🔧 {} {}", self.program, args.join(" "));

        let output = Command::new(&self.program).args(args).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("yt-dlp exited with an error")
                .trim()
                .trim_start_matches("ERROR: ")
                .to_string();
            return Err(ExtractionError::Unavailable(reason));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Updates yt-dlp in place (only works for standalone installs).
    pub async fn self_update(&self) {
        info!("🔄 Updating yt-dlp...");
        match Command::new(&self.program).arg("-U").output().await {
            Ok(output) if output.status.success() => info!("✅ yt-dlp updated"),
            Ok(output) => warn!(
                "⚠️ yt-dlp update failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => warn!("⚠️ yt-dlp update could not start: {}", e),
        }
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn extract_info(&self, url: &str) -> Result<VideoInfo, ExtractionError> {
        info!("📊 Extracting: {}", url);
        let stdout = self
            .run(&[
                "--dump-single-json",
                "--format",
                "bestaudio/best",
                "--no-warnings",
                "--quiet",
                url,
            ])
            .await?;
        Ok(serde_json::from_str(&stdout)?)
    }

    async fn search(&self, term: &str) -> Result<Option<VideoInfo>, ExtractionError> {
        info!("🔍 Searching YouTube: {}", term);
        let query = format!("ytsearch1:{term}");
        let stdout = self
            .run(&[
                "--dump-single-json",
                "--format",
                "bestaudio/best",
                "--no-warnings",
                "--quiet",
                &query,
            ])
            .await?;
        let info: VideoInfo = serde_json::from_str(&stdout)?;
        Ok(info.into_first_entry().filter(|v| !v.id.is_empty()))
    }

    async fn search_many(
        &self,
        term: &str,
        limit: usize,
    ) -> Result<Vec<VideoInfo>, ExtractionError> {
        info!("🔍 Searching YouTube ({} results): {}", limit, term);
        let query = format!("ytsearch{limit}:{term}");
        let stdout = self
            .run(&[
                "--dump-json",
                "--flat-playlist",
                "--skip-download",
                "--no-warnings",
                &query,
            ])
            .await?;

        Ok(parse_json_lines(&stdout))
    }
}

/// One JSON object per line, as printed by `--dump-json`; broken lines are skipped.
fn parse_json_lines(stdout: &str) -> Vec<VideoInfo> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<VideoInfo>(line) {
            Ok(info) => Some(info),
            Err(e) => {
                debug!("Skipping unreadable search line: {}", e);
                None
            }
        })
        .collect()
}
