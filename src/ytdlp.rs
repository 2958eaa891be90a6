//! `yt-dlp` backed [`MediaOracle`].
//!
//! Search and download shell out to the `yt-dlp` binary. Analysis is done by
//! a separate extractor command that receives the downloaded file path as its
//! only argument and prints one [`RawFeatures`] JSON object on stdout.

use crate::error::{Error, Result};
use crate::features::RawFeatures;
use crate::oracle::{best_match, MediaHit, MediaOracle};
use log::{debug, trace, warn};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Results requested per search query.
pub const SEARCH_RESULTS: usize = 10;

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

#[derive(Debug, Deserialize)]
struct SearchLine {
    id: Option<String>,
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
}

/// Query strings tried in order until one yields a match.
#[must_use]
pub fn search_queries(track_name: &str, artist_name: &str) -> [String; 3] {
    [
        format!("{artist_name} {track_name} audio"),
        format!("{artist_name} {track_name}"),
        format!("{track_name} {artist_name} official audio"),
    ]
}

/// Whether `stderr` output from yt-dlp reports throttling.
#[must_use]
pub fn is_rate_limited(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests")
}

/// Parse `--dump-json` output, one object per line. Lines without an id or
/// title are ignored.
#[must_use]
pub fn parse_search_output(stdout: &str) -> Vec<MediaHit> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<SearchLine>(line) {
            Ok(entry) => Some(MediaHit {
                id: entry.id?,
                title: entry.title?,
                uploader: entry.uploader.or(entry.channel),
            }),
            Err(e) => {
                trace!("Skipping unparsable search line: {e}");
                None
            }
        })
        .collect()
}

pub struct YtDlpOracle {
    ytdlp: String,
    extractor: String,
}

impl YtDlpOracle {
    pub fn new(ytdlp: String, extractor: String) -> Self {
        Self { ytdlp, extractor }
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        trace!("Running {program} {args:?}");
        Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::Extraction(format!("cannot run {program}: {e}")))
    }

    /// Turn a failed yt-dlp run into the matching error.
    fn failure(&self, output: &Output, what: &str) -> Error {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_rate_limited(&stderr) {
            Error::RateLimited(format!("{what}: {}", stderr.trim()))
        } else {
            Error::Extraction(format!("{what} failed: {}", stderr.trim()))
        }
    }

    fn download(&self, media_id: &str, workdir: &Path) -> Result<PathBuf> {
        let template = workdir.join("audio.%(ext)s");
        let template = template.to_string_lossy();
        let url = format!("{WATCH_URL}{media_id}");
        let output = self.run(
            &self.ytdlp,
            &[
                "-f",
                "bestaudio/best",
                "--no-playlist",
                "--quiet",
                "--no-warnings",
                "-o",
                &template,
                &url,
            ],
        )?;
        if !output.status.success() {
            return Err(self.failure(&output, "download"));
        }

        std::fs::read_dir(workdir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .find(|path| {
                path.file_stem().is_some_and(|stem| stem == "audio")
                    && path.extension().is_some_and(|ext| ext != "part")
            })
            .ok_or_else(|| Error::Extraction(format!("no audio file downloaded for {media_id}")))
    }
}

impl MediaOracle for YtDlpOracle {
    fn search(&self, track_name: &str, artist_name: &str) -> Result<Vec<MediaHit>> {
        let mut seen = Vec::new();
        for query in search_queries(track_name, artist_name) {
            let target = format!("ytsearch{SEARCH_RESULTS}:{query}");
            let output = self.run(
                &self.ytdlp,
                &["--flat-playlist", "--dump-json", "--no-warnings", &target],
            )?;
            if !output.status.success() {
                match self.failure(&output, "search") {
                    Error::RateLimited(msg) => return Err(Error::RateLimited(msg)),
                    other => {
                        warn!("Search for {query:?} failed: {other}");
                        continue;
                    }
                }
            }

            let hits = parse_search_output(&String::from_utf8_lossy(&output.stdout));
            debug!("{} results for {query:?}", hits.len());
            if best_match(&hits, track_name, artist_name).is_some() {
                return Ok(hits);
            }
            seen.extend(hits);
        }
        Ok(seen)
    }

    fn extract_features(&self, media_id: &str, workdir: &Path) -> Result<RawFeatures> {
        let audio = self.download(media_id, workdir)?;
        debug!("Downloaded {media_id} to {}", audio.display());

        let path = audio.to_string_lossy();
        let output = self.run(&self.extractor, &[&path])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Extraction(format!("extractor failed: {}", stderr.trim())));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::Extraction(format!("extractor printed invalid features: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_detection() {
        assert!(is_rate_limited("ERROR: HTTP Error 429: Too Many Requests"));
        assert!(is_rate_limited("Rate Limit reached, try later"));
        assert!(!is_rate_limited("ERROR: Video unavailable"));
    }

    #[test]
    fn test_search_output_parsing() {
        let stdout = concat!(
            r#"{"id": "abc", "title": "Band - Song (Official Audio)", "uploader": "Band"}"#,
            "\n",
            r#"{"id": "def", "title": "Song live", "channel": "BandVEVO"}"#,
            "\n\nnot json\n",
            r#"{"title": "no id"}"#,
        );
        let hits = parse_search_output(stdout);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].uploader.as_deref(), Some("Band"));
        assert_eq!(hits[1].uploader.as_deref(), Some("BandVEVO"));
    }

    #[test]
    fn test_queries_order() {
        let queries = search_queries("Song", "Band");
        assert_eq!(queries[0], "Band Song audio");
        assert_eq!(queries[2], "Song Band official audio");
    }

    #[test]
    fn test_missing_binary_is_extraction_error() {
        let oracle = YtDlpOracle::new("kindred-no-such-binary".into(), "also-missing".into());
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            oracle.extract_features("abc", dir.path()),
            Err(Error::Extraction(_))
        ));
    }
}
