use crate::api::error::AppError;
use crate::config::ConverterConfig;
use axum::extract::Multipart;
use axum::extract::multipart::MultipartError;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

/// A file part staged on disk for the duration of one request.
///
/// The temp file is unlinked when this value is dropped; unlink errors are ignored.
#[derive(Debug)]
pub struct UploadedFile {
    pub path: TempPath,
    pub original_name: Option<String>,
    pub size: u64,
}

impl UploadedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Temp file name without its extension
    pub fn temp_stem(&self) -> String {
        file_stem(self.path()).unwrap_or_else(|| "upload".to_string())
    }

    /// Client-supplied file name without its extension, if usable
    pub fn original_stem(&self) -> Option<String> {
        self.original_name
            .as_deref()
            .and_then(|name| file_stem(Path::new(last_component(name))))
    }
}

/// Clients may send a full path; only the last component counts
fn last_component(filename: &str) -> &str {
    filename.rsplit(['/', '\\']).next().unwrap_or(filename)
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
}

/// Extension worth carrying over to the temp file, e.g. `.mkv`
fn safe_extension(filename: &str) -> Option<String> {
    Path::new(last_component(filename))
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 16 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_lowercase()))
}

fn parse_error(err: MultipartError) -> AppError {
    AppError::Parse(err.body_text())
}

/// Cap on the combined size of non-file fields
pub const DEFAULT_MAX_FIELDS_SIZE: u64 = 20 * 1024 * 1024;

/// Streams multipart file parts into temp files under `upload_dir`
#[derive(Debug, Clone)]
pub struct UploadIngestor {
    upload_dir: PathBuf,
    keep_extensions: bool,
    max_file_size: u64,
    max_fields_size: u64,
}

impl UploadIngestor {
    pub fn new(upload_dir: impl Into<PathBuf>, keep_extensions: bool, max_file_size: usize) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            keep_extensions,
            max_file_size: max_file_size as u64,
            max_fields_size: DEFAULT_MAX_FIELDS_SIZE,
        }
    }

    pub fn with_max_fields_size(mut self, max_fields_size: usize) -> Self {
        self.max_fields_size = max_fields_size as u64;
        self
    }

    pub fn from_config(config: &ConverterConfig) -> Self {
        Self::new(
            config.upload_dir.clone(),
            config.keep_extensions,
            config.max_file_size,
        )
        .with_max_fields_size(config.max_fields_size)
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    fn create_temp(&self, original_name: &str) -> Result<tempfile::NamedTempFile, AppError> {
        let suffix = if self.keep_extensions {
            safe_extension(original_name).unwrap_or_default()
        } else {
            String::new()
        };

        let mut builder = tempfile::Builder::new();
        builder.prefix("upload_").suffix(&suffix);
        builder
            .tempfile_in(&self.upload_dir)
            .map_err(|e| AppError::Parse(format!("Failed to stage upload: {}", e)))
    }

    /// Parse the whole body, returning every file part keyed by field name
    /// in the order received. Non-file fields are drained and discarded.
    pub async fn ingest(
        &self,
        mut multipart: Multipart,
    ) -> Result<Vec<(String, UploadedFile)>, AppError> {
        let mut files = Vec::new();
        let mut total_size: u64 = 0;
        let mut fields_size: u64 = 0;

        while let Some(mut field) = multipart.next_field().await.map_err(parse_error)? {
            let name = field.name().unwrap_or_default().to_string();

            let file_name = field
                .file_name()
                .filter(|n| !n.is_empty())
                .map(str::to_string);
            let Some(original_name) = file_name else {
                while let Some(chunk) = field.chunk().await.map_err(parse_error)? {
                    fields_size += chunk.len() as u64;
                    if fields_size > self.max_fields_size {
                        return Err(AppError::Parse(format!(
                            "maxFieldsSize exceeded, received {} bytes of field data (limit {} bytes)",
                            fields_size, self.max_fields_size
                        )));
                    }
                }
                continue;
            };

            let (std_file, path) = self.create_temp(&original_name)?.into_parts();
            let mut upload = UploadedFile {
                path,
                original_name: Some(original_name),
                size: 0,
            };
            let mut file = tokio::fs::File::from_std(std_file);

            while let Some(chunk) = field.chunk().await.map_err(parse_error)? {
                total_size += chunk.len() as u64;
                if total_size > self.max_file_size {
                    return Err(AppError::Parse(format!(
                        "maxFileSize exceeded, received {} bytes of file data (limit {} bytes)",
                        total_size, self.max_file_size
                    )));
                }
                file.write_all(&chunk)
                    .await
                    .map_err(|e| AppError::Parse(format!("Failed to write upload: {}", e)))?;
                upload.size += chunk.len() as u64;
            }

            file.flush()
                .await
                .map_err(|e| AppError::Parse(format!("Failed to write upload: {}", e)))?;
            drop(file);

            tracing::info!(
                "Staged upload field '{}' ({} bytes) at {}",
                name,
                upload.size,
                upload.path().display()
            );
            files.push((name, upload));
        }

        Ok(files)
    }
}

/// First file-bearing field; the rest are dropped (and thereby removed)
pub fn first_file(files: Vec<(String, UploadedFile)>) -> Result<UploadedFile, AppError> {
    files
        .into_iter()
        .next()
        .map(|(_, file)| file)
        .ok_or(AppError::NoFile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::FromRequest;
    use axum::http::Request;

    const BOUNDARY: &str = "----converter-test-boundary";

    enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, &'a str, &'a [u8]),
    }

    async fn multipart(parts: &[Part<'_>]) -> Multipart {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}")
                            .as_bytes(),
                    );
                }
                Part::File(name, filename, data) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                             Content-Type: application/octet-stream\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(data);
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let request = Request::builder()
            .method("POST")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        Multipart::from_request(request, &()).await.unwrap()
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_file_part_is_staged_with_extension() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = UploadIngestor::new(dir.path(), true, 1024);

        let files = ingestor
            .ingest(multipart(&[Part::File("video", "holiday.MOV", b"moov-bytes")]).await)
            .await
            .unwrap();

        assert_eq!(files.len(), 1);
        let (field, upload) = &files[0];
        assert_eq!(field, "video");
        assert_eq!(upload.size, 10);
        assert_eq!(upload.original_name.as_deref(), Some("holiday.MOV"));
        assert_eq!(upload.original_stem().as_deref(), Some("holiday"));
        assert!(upload.path().starts_with(dir.path()));
        assert_eq!(upload.path().extension().unwrap(), "mov");
        assert_eq!(std::fs::read(upload.path()).unwrap(), b"moov-bytes");
    }

    #[tokio::test]
    async fn test_extension_dropped_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = UploadIngestor::new(dir.path(), false, 1024);

        let files = ingestor
            .ingest(multipart(&[Part::File("file", "clip.mp4", b"data")]).await)
            .await
            .unwrap();

        assert!(files[0].1.path().extension().is_none());
    }

    #[tokio::test]
    async fn test_dropping_upload_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = UploadIngestor::new(dir.path(), true, 1024);

        let files = ingestor
            .ingest(multipart(&[Part::File("file", "clip.mp4", b"data")]).await)
            .await
            .unwrap();
        assert_eq!(entries(dir.path()), 1);

        drop(files);
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_text_fields_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = UploadIngestor::new(dir.path(), true, 1024);

        let files = ingestor
            .ingest(
                multipart(&[
                    Part::Text("title", "my clip"),
                    Part::File("file", "clip.webm", b"data"),
                ])
                .await,
            )
            .await
            .unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "file");
    }

    #[tokio::test]
    async fn test_no_file_parts() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = UploadIngestor::new(dir.path(), true, 1024);

        let files = ingestor
            .ingest(multipart(&[Part::Text("title", "nothing here")]).await)
            .await
            .unwrap();

        assert!(files.is_empty());
        assert!(matches!(first_file(files), Err(AppError::NoFile)));
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_first_file_wins_and_rest_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = UploadIngestor::new(dir.path(), true, 1024);

        let files = ingestor
            .ingest(
                multipart(&[
                    Part::File("a", "first.mp4", b"one"),
                    Part::File("b", "second.mp4", b"two"),
                ])
                .await,
            )
            .await
            .unwrap();
        assert_eq!(entries(dir.path()), 2);

        let upload = first_file(files).unwrap();
        assert_eq!(upload.original_name.as_deref(), Some("first.mp4"));
        assert_eq!(entries(dir.path()), 1);
    }

    #[tokio::test]
    async fn test_upload_exactly_at_limit_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = UploadIngestor::new(dir.path(), true, 64);
        let data = vec![7u8; 64];

        let files = ingestor
            .ingest(multipart(&[Part::File("file", "clip.mp4", &data)]).await)
            .await
            .unwrap();

        assert_eq!(files[0].1.size, 64);
    }

    #[tokio::test]
    async fn test_upload_over_limit_is_rejected_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = UploadIngestor::new(dir.path(), true, 64);
        let data = vec![7u8; 65];

        let err = ingestor
            .ingest(multipart(&[Part::File("file", "clip.mp4", &data)]).await)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Parse(_)));
        assert!(err.to_string().contains("maxFileSize exceeded"));
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_limit_is_cumulative_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = UploadIngestor::new(dir.path(), true, 64);
        let data = vec![1u8; 40];

        let err = ingestor
            .ingest(
                multipart(&[
                    Part::File("a", "a.mp4", &data),
                    Part::File("b", "b.mp4", &data),
                ])
                .await,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Parse(_)));
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_text_fields_over_limit_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = UploadIngestor::new(dir.path(), true, 1024).with_max_fields_size(16);
        let notes = "n".repeat(17);

        let err = ingestor
            .ingest(
                multipart(&[
                    Part::File("file", "clip.mp4", b"data"),
                    Part::Text("notes", &notes),
                ])
                .await,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Parse(_)));
        assert!(err.to_string().contains("maxFieldsSize exceeded"));
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_empty_filename_counts_as_field() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = UploadIngestor::new(dir.path(), true, 1024).with_max_fields_size(4);

        let err = ingestor
            .ingest(multipart(&[Part::File("file", "", b"not a file")]).await)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("maxFieldsSize exceeded"));
    }

    #[tokio::test]
    async fn test_unwritable_upload_dir_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = UploadIngestor::new(dir.path().join("missing"), true, 1024);

        let err = ingestor
            .ingest(multipart(&[Part::File("file", "clip.mp4", b"data")]).await)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Parse(_)));
        assert!(err.to_string().contains("Failed to stage upload"));
    }

    #[test]
    fn test_safe_extension() {
        assert_eq!(safe_extension("movie.MKV").as_deref(), Some(".mkv"));
        assert_eq!(safe_extension("C:\\videos\\movie.avi").as_deref(), Some(".avi"));
        assert_eq!(safe_extension("noext"), None);
        assert_eq!(safe_extension("weird.m p4"), None);
    }

    #[test]
    fn test_last_component() {
        assert_eq!(last_component("clips/2024/beach.mp4"), "beach.mp4");
        assert_eq!(last_component("C:\\clips\\beach.mp4"), "beach.mp4");
        assert_eq!(last_component("beach.mp4"), "beach.mp4");
    }
}
