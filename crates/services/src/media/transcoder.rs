//! Probe and adaptive-streaming transcode of uploaded video.
//!
//! `FfmpegTranscoder` shells out to `ffprobe -v quiet -print_format json
//! -show_format -show_streams` and to `ffmpeg` producing an HLS VOD rendition
//! (`master.m3u8` plus `seg_NNN.ts` segments).

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use course_core::model::VideoMetadata;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

pub const MANIFEST_NAME: &str = "master.m3u8";

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(1800);
const DEFAULT_SEGMENT_SECS: u32 = 6;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TranscodeError {
    #[error("unsupported media: {0}")]
    Unsupported(String),

    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("could not read probe output: {0}")]
    Probe(String),

    #[error("input has no video stream")]
    NoVideoStream,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What the probe learned about an input file.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoProbe {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub codec: Option<String>,
    pub format: String,
}

impl VideoProbe {
    /// The subset stored on the section.
    ///
    /// # Errors
    ///
    /// Returns `TranscodeError::Probe` if the probed values are out of range.
    pub fn metadata(&self) -> Result<VideoMetadata, TranscodeError> {
        VideoMetadata::new(self.duration_secs, self.width, self.height, &self.format)
            .map_err(|e| TranscodeError::Probe(e.to_string()))
    }
}

/// Files produced by a transcode, relative to the output directory.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeOutput {
    pub manifest: PathBuf,
    pub files: Vec<PathBuf>,
    pub duration_secs: f64,
}

/// Turns an uploaded video into an adaptive-streaming rendition.
#[async_trait]
pub trait MediaTranscoder: Send + Sync {
    /// # Errors
    ///
    /// Returns `TranscodeError` if the input cannot be read or has no video stream.
    async fn probe(&self, input: &Path) -> Result<VideoProbe, TranscodeError>;

    /// Write the rendition into `output_dir`, which must exist and be empty.
    ///
    /// # Errors
    ///
    /// Returns `TranscodeError` if the tool fails or produces no manifest.
    async fn transcode_to_adaptive_streaming(
        &self,
        input: &Path,
        output_dir: &Path,
    ) -> Result<TranscodeOutput, TranscodeError>;
}

//
// ─── FFMPEG ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    command_timeout: Duration,
    segment_secs: u32,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegTranscoder {
    #[must_use]
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            segment_secs: DEFAULT_SEGMENT_SECS,
        }
    }

    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_segment_secs(mut self, secs: u32) -> Self {
        self.segment_secs = secs.max(1);
        self
    }
}

#[async_trait]
impl MediaTranscoder for FfmpegTranscoder {
    async fn probe(&self, input: &Path) -> Result<VideoProbe, TranscodeError> {
        let mut cmd = ToolCommand::new(&self.ffprobe, self.command_timeout);
        cmd.args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ]);
        cmd.arg(input.to_string_lossy());
        let stdout = cmd.execute().await?;
        parse_probe_output(&stdout)
    }

    async fn transcode_to_adaptive_streaming(
        &self,
        input: &Path,
        output_dir: &Path,
    ) -> Result<TranscodeOutput, TranscodeError> {
        let segments = output_dir.join("seg_%03d.ts");
        let manifest = output_dir.join(MANIFEST_NAME);

        tracing::info!(
            input = %input.display(),
            output_dir = %output_dir.display(),
            segment_secs = self.segment_secs,
            "transcoding to hls"
        );

        let mut cmd = ToolCommand::new(&self.ffmpeg, self.command_timeout);
        cmd.args(["-y", "-nostdin", "-i"]);
        cmd.arg(input.to_string_lossy());
        cmd.args(["-c:v", "libx264", "-preset", "veryfast", "-c:a", "aac"]);
        cmd.args(["-f", "hls", "-hls_time"]);
        cmd.arg(self.segment_secs.to_string());
        cmd.args(["-hls_playlist_type", "vod", "-hls_segment_filename"]);
        cmd.arg(segments.to_string_lossy());
        cmd.arg(manifest.to_string_lossy());
        cmd.execute().await?;

        let playlist = tokio::fs::read_to_string(&manifest).await?;
        let files = list_files(output_dir).await?;
        Ok(TranscodeOutput {
            manifest: PathBuf::from(MANIFEST_NAME),
            files,
            duration_secs: playlist_duration(&playlist),
        })
    }
}

/// One external tool invocation with captured output and a hard timeout.
struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    fn new(program: &Path, timeout: Duration) -> Self {
        Self {
            program: program.to_path_buf(),
            args: Vec::new(),
            timeout,
        }
    }

    fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Run to completion and return stdout. The child is killed if the
    /// timeout fires or the future is dropped.
    async fn execute(&self) -> Result<String, TranscodeError> {
        let tool = self
            .program
            .file_name()
            .map_or_else(|| self.program.to_string_lossy(), |n| n.to_string_lossy())
            .into_owned();

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::Spawn {
                tool: tool.clone(),
                source,
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TranscodeError::Timeout {
                    tool,
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            return Err(TranscodeError::Failed {
                tool,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

//
// ─── PARSING ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

fn parse_probe_output(json: &str) -> Result<VideoProbe, TranscodeError> {
    let parsed: FfprobeOutput =
        serde_json::from_str(json).map_err(|e| TranscodeError::Probe(e.to_string()))?;

    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or(TranscodeError::NoVideoStream)?;
    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(TranscodeError::Probe("video stream has no dimensions".into())),
    };

    let format = parsed
        .format
        .as_ref()
        .and_then(|f| f.format_name.clone())
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| TranscodeError::Probe("missing container format".into()))?;

    let duration_secs = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(VideoProbe {
        duration_secs,
        width,
        height,
        codec: video.codec_name.clone(),
        format,
    })
}

/// Sum of the `#EXTINF` segment durations of a media playlist.
fn playlist_duration(playlist: &str) -> f64 {
    playlist
        .lines()
        .filter_map(|line| line.strip_prefix("#EXTINF:"))
        .filter_map(|rest| rest.split(',').next())
        .filter_map(|secs| secs.trim().parse::<f64>().ok())
        .sum()
}

async fn list_files(root: &Path) -> Result<Vec<PathBuf>, TranscodeError> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if let Ok(relative) = path.strip_prefix(root) {
                files.push(relative.to_path_buf());
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE_JSON: &str = r#"{
        "streams": [
            {"codec_type": "audio", "codec_name": "aac"},
            {"codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720}
        ],
        "format": {"format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "61.480000"}
    }"#;

    #[test]
    fn parses_first_video_stream_and_container() {
        let probe = parse_probe_output(PROBE_JSON).unwrap();
        assert_eq!(probe.width, 1280);
        assert_eq!(probe.height, 720);
        assert_eq!(probe.codec.as_deref(), Some("h264"));
        assert_eq!(probe.format, "mov,mp4,m4a,3gp,3g2,mj2");
        assert!((probe.duration_secs - 61.48).abs() < 1e-9);

        let meta = probe.metadata().unwrap();
        assert_eq!(meta.width(), 1280);
        assert_eq!(meta.format(), "mov,mp4,m4a,3gp,3g2,mj2");
    }

    #[test]
    fn audio_only_input_has_no_video_stream() {
        let json = r#"{"streams": [{"codec_type": "audio"}], "format": {"format_name": "mp3"}}"#;
        assert!(matches!(
            parse_probe_output(json),
            Err(TranscodeError::NoVideoStream)
        ));
        assert!(matches!(
            parse_probe_output("garbage"),
            Err(TranscodeError::Probe(_))
        ));
    }

    #[test]
    fn playlist_duration_sums_segments() {
        let playlist = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.006000,\nseg_000.ts\n\
                        #EXTINF:4.5,\nseg_001.ts\n#EXT-X-ENDLIST\n";
        assert!((playlist_duration(playlist) - 10.506).abs() < 1e-9);
        assert!(playlist_duration("#EXTM3U\n").abs() < f64::EPSILON);
    }

    #[test]
    fn segment_length_is_at_least_one_second() {
        assert_eq!(FfmpegTranscoder::default().segment_secs, DEFAULT_SEGMENT_SECS);
        assert_eq!(FfmpegTranscoder::default().with_segment_secs(10).segment_secs, 10);
        assert_eq!(FfmpegTranscoder::default().with_segment_secs(0).segment_secs, 1);
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let transcoder = FfmpegTranscoder::new(
            "/nonexistent/ffmpeg-for-tests",
            "/nonexistent/ffprobe-for-tests",
        );
        let err = transcoder
            .probe(Path::new("/tmp/whatever.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, TranscodeError::Spawn { .. }));
    }

    #[tokio::test]
    async fn list_files_is_relative_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("seg_001.ts"), b"b").await.unwrap();
        tokio::fs::write(dir.path().join("master.m3u8"), b"m").await.unwrap();
        tokio::fs::create_dir(dir.path().join("audio")).await.unwrap();
        tokio::fs::write(dir.path().join("audio/a.ts"), b"a").await.unwrap();

        let files = list_files(dir.path()).await.unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("audio/a.ts"),
                PathBuf::from("master.m3u8"),
                PathBuf::from("seg_001.ts"),
            ]
        );
    }
}
