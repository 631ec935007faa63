//! `a3s-mirror save` command: copy images from a registry into a local
//! archive directory and record them in the archive's index.
//!
//! `a3s-mirror save-validate` re-reads that index and checks every record
//! against its source registry.

use std::path::PathBuf;
use std::sync::Arc;

use a3s_mirror_core::config::MirrorConfig;
use a3s_mirror_queue::FailedList;
use a3s_mirror_runtime::{
    DirArchive, ImageReference, MirrorUnit, Mirrorer, SaveIndex, SaveIndexWriter, SavedImage,
};
use clap::Args;

use super::{Prepared, RunArgs};
use crate::list::{read_list, ImageLine};

#[derive(Args, Debug, Clone)]
pub struct SaveArgs {
    /// Image list file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Archive directory (created if missing)
    #[arg(short = 'd', long)]
    pub directory: PathBuf,

    /// Source registry override
    #[arg(long)]
    pub source_registry: Option<String>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SaveValidateArgs {
    /// Archive directory written by `save`
    #[arg(short = 'd', long)]
    pub directory: PathBuf,

    #[command(flatten)]
    pub run: RunArgs,
}

fn build_unit(line: &ImageLine, raw: &str, args: &SaveArgs, config: &MirrorConfig) -> MirrorUnit {
    let (source, tag) = line.source();
    let source = super::mirror::relocate(source, args.source_registry.as_deref(), None);
    MirrorUnit::save(source, tag)
        .with_platforms(config.arch.clone(), config.os.clone())
        .with_provenance(config.copy_provenance)
        .with_failure_line(raw)
}

pub async fn execute(args: SaveArgs, config: MirrorConfig) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::finalize_config(config, &args.run)?;
    let entries = read_list(&args.file)?;
    let failed = Arc::new(FailedList::create(&config.failed_file).await?);

    let archive = DirArchive::new(&args.directory)?;
    let index = Arc::new(SaveIndexWriter::create(&archive.index_path()).await?);

    let mut prepared = Prepared {
        units: Vec::new(),
        rejected: 0,
    };
    for entry in entries {
        match entry.parsed {
            Ok(line) => prepared
                .units
                .push(build_unit(&line, &entry.line, &args, &config)),
            Err(e) => {
                super::reject(&failed, &entry.line, e).await?;
                prepared.rejected += 1;
            }
        }
    }

    tracing::info!(
        images = prepared.units.len(),
        directory = %args.directory.display(),
        "Starting save"
    );
    let mirrorer = Mirrorer::new(super::registry_client(&config)?)
        .with_retry(config.retry.clone())
        .with_archive(Arc::new(archive))
        .with_index(Arc::clone(&index));
    let result = super::run_units(&config, mirrorer, failed, prepared).await;

    let saved = index.snapshot().await;
    println!(
        "Index {} lists {} image(s)",
        index.path().display(),
        saved.list.len()
    );
    result.map(|_| ())
}

/// Turn one index record into a save-validate unit, checking the saved
/// platforms unless `--arch`/`--os` narrow them.
fn validate_unit(
    saved: SavedImage,
    args: &SaveValidateArgs,
    config: &MirrorConfig,
) -> Result<MirrorUnit, String> {
    ImageReference::parse(&saved.source).map_err(|e| e.to_string())?;
    let arch = if args.run.arch.is_empty() {
        saved.arch_list.clone()
    } else {
        config.arch.clone()
    };
    let os = if args.run.os.is_empty() {
        saved.os_list.clone()
    } else {
        config.os.clone()
    };
    let line = format!("{}:{}", saved.source, saved.tag);
    Ok(MirrorUnit::save_validate(saved)
        .with_platforms(arch, os)
        .with_provenance(config.copy_provenance)
        .with_failure_line(line))
}

pub async fn execute_validate(
    args: SaveValidateArgs,
    config: MirrorConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::finalize_config(config, &args.run)?;
    let archive = DirArchive::new(&args.directory)?;
    let index = SaveIndex::load(&archive.index_path()).await?;
    let failed = Arc::new(FailedList::create(&config.failed_file).await?);

    let mut prepared = Prepared {
        units: Vec::new(),
        rejected: 0,
    };
    for saved in index.list {
        let line = format!("{}:{}", saved.source, saved.tag);
        match validate_unit(saved, &args, &config) {
            Ok(unit) => prepared.units.push(unit),
            Err(e) => {
                super::reject(&failed, &line, e).await?;
                prepared.rejected += 1;
            }
        }
    }

    tracing::info!(
        images = prepared.units.len(),
        directory = %args.directory.display(),
        "Starting save validation"
    );
    let mirrorer = Mirrorer::new(super::registry_client(&config)?)
        .with_retry(config.retry.clone())
        .with_archive(Arc::new(archive));
    super::run_units(&config, mirrorer, failed, prepared).await?;
    Ok(())
}
