use crate::config::ConverterConfig;
use crate::services::runner::{CommandRunner, ProcessRunner};
use std::ffi::OsString;
use std::sync::Arc;
use tracing::info;

pub async fn setup_encoder(config: &ConverterConfig) -> Arc<dyn CommandRunner> {
    let runner = ProcessRunner::new(config.encoder_path.clone(), config.stderr_limit);

    // Probe the binary once so a missing encoder shows up at startup
    match runner.run(&[OsString::from("-version")]).await {
        Ok(output) => {
            let version = output.stdout.lines().next().unwrap_or("unknown version");
            info!("🎬 Encoder ready: {}", version);
        }
        Err(e) => {
            tracing::warn!(
                "⚠️  Encoder '{}' unavailable ({}). Conversions will fail until it is installed.",
                runner.program(),
                e
            );
        }
    }

    Arc::new(runner)
}
