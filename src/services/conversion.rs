use crate::api::error::AppError;
use crate::services::runner::CommandRunner;
use crate::services::upload::UploadedFile;
use futures::Stream;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tempfile::TempPath;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// Appended to the input stem to name the converted file
pub const OUTPUT_SUFFIX: &str = "-h265";

/// Encoder argument vector: H.265 video, AAC audio, overwrite output
pub fn encoder_args(input: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::with_capacity(14);
    args.push("-y".into());
    args.push("-i".into());
    args.push(input.into());
    for flag in [
        "-c:v", "libx265", "-preset", "fast", "-crf", "28", "-c:a", "aac", "-b:a", "128k",
    ] {
        args.push(flag.into());
    }
    args.push(output.into());
    args
}

/// `<dir>/<temp stem>-h265.mp4`. The temp stem is unique per upload.
pub fn output_path(dir: &Path, input: &UploadedFile) -> PathBuf {
    dir.join(format!("{}{}.mp4", input.temp_stem(), OUTPUT_SUFFIX))
}

/// Name offered to the client in `Content-Disposition`
pub fn download_name(input: &UploadedFile) -> String {
    let stem = input.original_stem().unwrap_or_else(|| input.temp_stem());
    format!("{}{}.mp4", stem, OUTPUT_SUFFIX)
}

/// Temp files owned by one conversion; removed together on drop
#[derive(Debug)]
struct Artifacts {
    output: TempPath,
    input: UploadedFile,
}

impl Drop for Artifacts {
    fn drop(&mut self) {
        tracing::debug!(
            "Removing temp files {} and {}",
            self.input.path().display(),
            self.output.display()
        );
    }
}

/// Successful conversion, ready to be streamed to the client
#[derive(Debug)]
pub struct ConvertedVideo {
    file: File,
    len: u64,
    download_name: String,
    artifacts: Artifacts,
}

impl ConvertedVideo {
    pub fn download_name(&self) -> &str {
        &self.download_name
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn output_path(&self) -> &Path {
        &self.artifacts.output
    }

    /// Byte stream of the converted file. Both temp files are removed once
    /// the stream is dropped, whether it finished or the client went away.
    pub fn into_body_stream(self) -> CleanupStream<ReaderStream<File>> {
        CleanupStream {
            inner: ReaderStream::new(self.file),
            _artifacts: self.artifacts,
        }
    }
}

/// Stream wrapper that keeps the conversion's temp files alive until it is dropped
pub struct CleanupStream<S> {
    // Declared first so the file handle closes before the unlink
    inner: S,
    _artifacts: Artifacts,
}

impl<S> Stream for CleanupStream<S>
where
    S: Stream + Unpin,
{
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

pub struct ConversionService {
    runner: Arc<dyn CommandRunner>,
    output_dir: PathBuf,
}

impl ConversionService {
    pub fn new(runner: Arc<dyn CommandRunner>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            output_dir: output_dir.into(),
        }
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    /// Run the encoder once over `input`. On any failure both the input and
    /// whatever output the encoder left behind are removed before returning.
    pub async fn convert(&self, input: UploadedFile) -> Result<ConvertedVideo, AppError> {
        let download_name = download_name(&input);
        let artifacts = Artifacts {
            output: TempPath::from_path(output_path(&self.output_dir, &input)),
            input,
        };

        let args = encoder_args(artifacts.input.path(), &artifacts.output);
        tracing::info!(
            "Converting {} ({} bytes) with {}",
            artifacts.input.path().display(),
            artifacts.input.size,
            self.runner.program()
        );

        self.runner.run(&args).await?;

        let file = File::open(&artifacts.output)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to open converted file: {}", e)))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to stat converted file: {}", e)))?
            .len();

        tracing::info!(
            "Conversion finished: {} ({} bytes)",
            artifacts.output.display(),
            len
        );

        Ok(ConvertedVideo {
            file,
            len,
            download_name,
            artifacts,
        })
    }
}
