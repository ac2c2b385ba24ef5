//! One-shot operator commands.
//!
//! Each command opens the job store, builds an [`AppContext`] and calls the
//! service API, the same entry points the worker uses.

use std::path::Path;

use anyhow::{Context, Result};

use vf_core::config::Config;
use vf_core::JobId;
use vf_worker::{reconciler, service, AppContext};

/// Open the configured database and build the shared context.
pub fn open_context(config: Config) -> Result<AppContext> {
    let db = vf_db::pool::init_pool(&config.database.path)
        .with_context(|| format!("opening database {}", config.database.path.display()))?;
    Ok(AppContext::new(config, db)?)
}

pub async fn submit(config: Config, file: &Path, category: &str, name: Option<&str>) -> Result<()> {
    let ctx = open_context(config)?;
    let name = match name {
        Some(n) => n.to_string(),
        None => file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .context("cannot derive a name from the file; pass --name")?,
    };

    let job = service::submit(&ctx, &name, category, file).await?;
    println!("Job {} queued", job.id);
    println!("  Scoped id: {}", job.scoped_id.as_deref().unwrap_or("-"));
    println!("  Source:    {}", job.source_path.as_deref().unwrap_or("-"));
    Ok(())
}

pub async fn status(config: Config, job_id: JobId, resolve: bool) -> Result<()> {
    let ctx = open_context(config)?;
    if resolve {
        reconciler::resolve_for_streaming(&ctx, job_id).await?;
    }
    let view = service::get_status(&ctx, job_id).await?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

pub async fn retry(config: Config, job_id: JobId) -> Result<()> {
    let ctx = open_context(config)?;
    let job = service::retry_job(&ctx, job_id).await?;
    println!("Job {} is {} ({}%)", job.id, job.status, job.progress);
    Ok(())
}

pub async fn migrate(config: Config, job_id: JobId) -> Result<()> {
    let ctx = open_context(config)?;
    let entry = service::enqueue_migration_for(&ctx, job_id).await?;
    println!("Migration queued for job {} ({})", job_id, entry.correlation_id);
    Ok(())
}

pub async fn delete(config: Config, job_id: JobId) -> Result<()> {
    let ctx = open_context(config)?;
    service::delete_job(&ctx, job_id).await?;
    println!("Job {job_id} deleted");
    Ok(())
}

pub async fn reconcile(config: Config) -> Result<()> {
    let ctx = open_context(config)?;
    let report = reconciler::reconcile_all(&ctx).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub fn normalize(config: &Config, manifest: &Path) -> Result<()> {
    let default_duration = f64::from(config.encoder.segment_seconds.max(1));
    let outcome = vf_media::ensure_playable(manifest, default_duration)
        .with_context(|| format!("repairing {}", manifest.display()))?;
    match outcome {
        vf_media::Repaired::Normalized => println!("✓ {} normalized", manifest.display()),
        vf_media::Repaired::Rebuilt { segments } => {
            println!("✓ {} rebuilt from {segments} segments", manifest.display())
        }
    }
    match vf_media::readiness(manifest) {
        Ok(()) => println!("  Ready for streaming"),
        Err(why) => println!("  Not ready: {why}"),
    }
    Ok(())
}

pub fn check_tools(config: &Config) -> Result<()> {
    println!("Checking external tools...\n");

    let tools = vf_av::ToolRegistry::discover(&config.tools);
    let mut all_ok = true;

    for tool in tools.check_all() {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install ffmpeg to enable transcoding.");
    }
    Ok(())
}

pub fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("reading {}", p.display()))?;
            Config::from_json(&contents)?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("✓ Configuration is valid");
    println!("  Database: {}", config.database.path.display());
    println!("  Storage root: {}", config.storage.root.display());
    println!("  Workers: {}", config.queue.workers);
    println!("  Queue capacity: {}", config.queue.capacity);
    println!("  Remote tier: {:?}", config.remote.kind);
    println!("  DRM enabled: {}", config.drm.enabled);

    let warnings = config.validate();
    for warning in &warnings {
        println!("  ! {warning}");
    }
    Ok(())
}
