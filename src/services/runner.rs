use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Output captured from a successful encoder run
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Error, Debug)]
pub enum RunError {
    /// The process could not be started (binary missing, permissions)
    #[error("failed to launch encoder: {0}")]
    Launch(#[source] std::io::Error),

    /// The process ran and exited with a nonzero status
    #[error("encoder exited {}", display_code(.code))]
    Encoding { code: Option<i32>, stderr: String },

    /// Reading the child's pipes or waiting on it failed
    #[error("encoder I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Exit code as text; `null` when the process was killed by a signal
pub fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "null".to_string(), |c| c.to_string())
}

/// Trait for running the external encoder
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run once with the given argument vector and wait for it to exit
    async fn run(&self, args: &[OsString]) -> Result<RunOutput, RunError>;

    /// Program name, used for logging and health reporting
    fn program(&self) -> String;
}

/// Append-only text buffer holding at most `limit` bytes.
///
/// Once full, the oldest text is discarded so the tail (where encoders
/// report why they failed) survives.
#[derive(Debug, Clone)]
pub struct BoundedBuffer {
    text: String,
    limit: usize,
    truncated: bool,
}

impl BoundedBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
            truncated: false,
        }
    }

    pub fn push_str(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        if self.text.len() > self.limit {
            let mut start = self.text.len() - self.limit;
            while !self.text.is_char_boundary(start) {
                start += 1;
            }
            self.text.drain(..start);
            self.truncated = true;
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

/// Runs the encoder as a child process
pub struct ProcessRunner {
    program: PathBuf,
    output_limit: usize,
}

impl ProcessRunner {
    pub fn new(program: impl Into<PathBuf>, output_limit: usize) -> Self {
        Self {
            program: program.into(),
            output_limit,
        }
    }
}

/// Bytes read from a child pipe per call
const READ_CHUNK: usize = 8 * 1024;

/// Decode the longest prefix of `pending` that is safe to turn into text.
///
/// A multibyte character cut at the chunk edge stays in `pending` for the
/// next read; any other invalid byte is replaced with U+FFFD.
fn take_text(pending: &mut Vec<u8>) -> String {
    let cut = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => pending.len(),
    };
    let text = String::from_utf8_lossy(&pending[..cut]).into_owned();
    pending.drain(..cut);
    text
}

async fn drain_output<R>(
    mut reader: R,
    limit: usize,
    stream: &'static str,
) -> std::io::Result<BoundedBuffer>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BoundedBuffer::new(limit);
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut pending = Vec::new();

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        pending.extend_from_slice(&chunk[..n]);
        let text = take_text(&mut pending);

        // ffmpeg separates progress updates with \r rather than \n
        for line in text.split(['\n', '\r']).filter(|l| !l.is_empty()) {
            tracing::trace!(target: "encoder", stream, "{}", line);
        }
        buffer.push_str(&text);
    }

    if !pending.is_empty() {
        buffer.push_str(&String::from_utf8_lossy(&pending));
    }
    if buffer.is_truncated() {
        tracing::debug!("Encoder {} exceeded {} bytes, kept the tail", stream, limit);
    }
    Ok(buffer)
}

#[async_trait::async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, args: &[OsString]) -> Result<RunOutput, RunError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!("Spawning encoder command: {:?}", cmd);
        let mut child = cmd.spawn().map_err(RunError::Launch)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("Failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("Failed to capture stderr"))?;

        let (stdout, stderr) = tokio::try_join!(
            drain_output(stdout, self.output_limit, "stdout"),
            drain_output(stderr, self.output_limit, "stderr"),
        )?;

        let status = child.wait().await?;
        tracing::debug!("Encoder finished with status: {}", status);

        if status.success() {
            Ok(RunOutput {
                stdout: stdout.into_string(),
                stderr: stderr.into_string(),
            })
        } else {
            Err(RunError::Encoding {
                code: status.code(),
                stderr: stderr.into_string(),
            })
        }
    }

    fn program(&self) -> String {
        self.program.display().to_string()
    }
}
