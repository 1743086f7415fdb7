//! Subcommand implementations

use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use parcel_client::UploadCoordinator;
use parcel_core::integrity::{composite_etag, digest_from_etag};
use parcel_core::{
    BucketName, ByteSource, ContentDigest, FileSource, ObjectKey, ObjectTarget, UploadConfig,
};
use parcel_store::{LocalStore, ObjectMetadata};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub async fn upload(matches: &ArgMatches) -> Result<()> {
    let config = upload_config(matches)?;
    config.validate().context("invalid upload configuration")?;
    let target = config.target()?;

    let store = open_store(matches)?;
    let coordinator = UploadCoordinator::from_config(store.clone(), &config)?;

    info!(
        source = %config.source_path.display(),
        target = %target,
        part_size = config.part_size_bytes,
        concurrency = config.concurrency,
        "starting upload"
    );
    let report = coordinator
        .upload_config(&config)
        .await
        .with_context(|| format!("upload of {} failed", config.source_path.display()))?;

    if report.etag_matches() == Some(false) {
        warn!(object = %report.object, "store fingerprint differs from the bytes sent");
    }

    if matches.get_flag("verify") {
        let metadata = store.head_object(&target)?;
        check_against_file(&metadata, &config.source_path).await?;
        info!(object = %report.object, "verified against source");
    }

    println!("{}", serde_json::to_string(&report.object)?);
    Ok(())
}

pub async fn verify(matches: &ArgMatches) -> Result<()> {
    let target = target(matches)?;
    let source = matches
        .get_one::<PathBuf>("source")
        .context("--source is required")?;

    let store = open_store(matches)?;
    let metadata = store
        .head_object(&target)
        .with_context(|| format!("cannot read {}", target))?;

    check_against_file(&metadata, source).await?;
    info!(target = %target, etag = %metadata.etag, "object matches source");
    println!("OK {} {}", target, metadata.etag);
    Ok(())
}

pub fn cat(matches: &ArgMatches) -> Result<()> {
    let target = target(matches)?;
    let store = open_store(matches)?;
    let body = store
        .get_object(&target)
        .with_context(|| format!("cannot read {}", target))?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&body)?;
    stdout.flush()?;
    Ok(())
}

/// Config file (if any) with command-line flags laid over it
fn upload_config(matches: &ArgMatches) -> Result<UploadConfig> {
    let source = matches.get_one::<PathBuf>("source");
    let bucket = matches.get_one::<String>("bucket");

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => UploadConfig::from_json_file(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => match (source, bucket) {
            (Some(source), Some(bucket)) => UploadConfig::new(source, bucket),
            _ => bail!("either --config or both --source and --bucket are required"),
        },
    };

    if let Some(source) = source {
        config.source_path = source.clone();
    }
    if let Some(bucket) = bucket {
        config.bucket = bucket.clone();
    }
    if let Some(key) = matches.get_one::<String>("key") {
        config.key = Some(key.clone());
    }
    if let Some(part_size) = matches.get_one::<u64>("part-size") {
        config.part_size_bytes = *part_size;
    }
    if let Some(concurrency) = matches.get_one::<usize>("concurrency") {
        config.concurrency = *concurrency;
    }
    if let Some(max_retries) = matches.get_one::<u32>("max-retries") {
        config.max_retries = *max_retries;
    }

    Ok(config)
}

fn target(matches: &ArgMatches) -> Result<ObjectTarget> {
    let bucket = matches.get_one::<String>("bucket").context("--bucket is required")?;
    let key = matches.get_one::<String>("key").context("--key is required")?;
    Ok(ObjectTarget::new(BucketName::new(bucket)?, ObjectKey::new(key)?))
}

fn open_store(matches: &ArgMatches) -> Result<LocalStore> {
    let dir = matches
        .get_one::<PathBuf>("store-dir")
        .context("--store-dir is required")?;
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create store directory {}", dir.display()))?;
        info!(dir = %dir.display(), "created store directory");
    }
    LocalStore::open(dir).with_context(|| format!("cannot open store at {}", dir.display()))
}

/// Re-read `path` along the object's part boundaries and compare fingerprints
async fn check_against_file(metadata: &ObjectMetadata, path: &Path) -> Result<()> {
    let source = FileSource::open(path)
        .await
        .with_context(|| format!("cannot open {}", path.display()))?;

    if source.len() != metadata.size {
        bail!(
            "size mismatch: {} has {} bytes, stored object has {}",
            path.display(),
            source.len(),
            metadata.size
        );
    }

    let mut digests = Vec::with_capacity(metadata.parts.len());
    let mut offset = 0u64;
    for part in &metadata.parts {
        let data = source.read_range(offset, part.size).await?;
        let digest = ContentDigest::new(&data);
        if digest_from_etag(&part.etag) != Some(digest) {
            bail!("part {} differs from {}", part.part_number, path.display());
        }
        digests.push(digest);
        offset += part.size;
    }

    let local = composite_etag(&digests);
    if local != metadata.etag {
        bail!("fingerprint mismatch: local {}, stored {}", local, metadata.etag);
    }
    Ok(())
}
