use crate::config::ConverterConfig;
use anyhow::Context;
use tracing::info;

/// Make sure the temp directory for uploads and encoder output exists
pub async fn setup_storage(config: &ConverterConfig) -> anyhow::Result<()> {
    let dir = &config.upload_dir;

    match tokio::fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => info!("✅ Upload directory '{}' is ready", dir.display()),
        Ok(_) => anyhow::bail!("Upload path '{}' is not a directory", dir.display()),
        Err(_) => {
            info!("📁 Upload directory '{}' not found, creating...", dir.display());
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create upload directory '{}'", dir.display()))?;
            info!("✅ Upload directory '{}' created successfully", dir.display());
        }
    }

    Ok(())
}
