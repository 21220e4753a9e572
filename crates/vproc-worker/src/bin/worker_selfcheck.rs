use std::path::Path;
use std::process::Command;

use vproc_storage::R2Client;
use vproc_worker::config::first_missing_env;
use vproc_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    ensure_env_present()?;
    let config = WorkerConfig::from_env()?;

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_workdir(&config.work_dir).await?;
    ensure_ffmpeg()?;
    ensure_bucket().await?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;

    let marker = path.join(".selfcheck");
    tokio::fs::write(&marker, b"ok").await?;
    tokio::fs::remove_file(&marker).await?;
    Ok(())
}

fn ensure_ffmpeg() -> anyhow::Result<()> {
    let binary = vproc_media::check_ffmpeg()?;
    let output = Command::new(&binary)
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "ffmpeg -version failed: {:?}",
            output.status
        ));
    }
    Ok(())
}

async fn ensure_bucket() -> anyhow::Result<()> {
    let client = R2Client::from_env()?;
    client
        .check_connectivity()
        .await
        .map_err(|e| anyhow::anyhow!("bucket {} unreachable: {}", client.bucket(), e))?;
    println!("worker-selfcheck: bucket {} reachable", client.bucket());
    Ok(())
}

fn ensure_env_present() -> anyhow::Result<()> {
    if let Some(var) = first_missing_env() {
        return Err(anyhow::anyhow!("missing required env var {}", var));
    }
    Ok(())
}
