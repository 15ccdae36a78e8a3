use std::env;
use std::path::PathBuf;

/// Extra room allowed on top of the file and field caps for multipart framing
pub const MULTIPART_OVERHEAD: usize = 10 * 1024 * 1024; // 10 MB

/// Conversion service configuration
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// Directory for uploaded and converted temp files (default: OS temp dir)
    pub upload_dir: PathBuf,

    /// Keep the original extension on uploaded temp files (default: true)
    pub keep_extensions: bool,

    /// Maximum accepted upload size in bytes (default: 1 GB)
    pub max_file_size: usize,

    /// Maximum bytes across all non-file fields (default: 20 MB)
    pub max_fields_size: usize,

    /// Encoder binary, resolved through PATH when relative (default: "ffmpeg")
    pub encoder_path: PathBuf,

    /// Bytes of encoder stdout/stderr kept per stream (default: 64 KB)
    pub stderr_limit: usize,

    /// Allowed CORS Origins (comma separated, empty allows any)
    pub allowed_origins: Vec<String>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            upload_dir: env::temp_dir(),
            keep_extensions: true,
            max_file_size: 1024 * 1024 * 1024, // 1 GB
            max_fields_size: 20 * 1024 * 1024, // 20 MB
            encoder_path: PathBuf::from("ffmpeg"),
            stderr_limit: 64 * 1024, // 64 KB
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(), // Vite default
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

impl ConverterConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            upload_dir: env::var("UPLOAD_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(default.upload_dir),

            keep_extensions: env::var("KEEP_EXTENSIONS")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default.keep_extensions),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            max_fields_size: env::var("MAX_FIELDS_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_fields_size),

            encoder_path: env::var("FFMPEG_PATH")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(default.encoder_path),

            stderr_limit: env::var("ENCODER_OUTPUT_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.stderr_limit),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(default.allowed_origins),
        }
    }

    /// Create config for development (any CORS origin)
    pub fn development() -> Self {
        Self {
            allowed_origins: Vec::new(),
            ..Self::default()
        }
    }

    /// Transport-level request body cap, leaving room for multipart framing
    pub fn body_limit(&self) -> usize {
        self.max_file_size
            .saturating_add(self.max_fields_size)
            .saturating_add(MULTIPART_OVERHEAD)
    }
}
