//! `a3s-mirror load` and `a3s-mirror load-validate` commands.

use std::path::PathBuf;
use std::sync::Arc;

use a3s_mirror_core::config::MirrorConfig;
use a3s_mirror_queue::FailedList;
use a3s_mirror_runtime::{DirArchive, ImageReference, MirrorUnit, Mirrorer, SaveIndex, SavedImage};
use clap::Args;

use super::{Prepared, RunArgs};

#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Archive directory written by `save`
    #[arg(short = 'd', long)]
    pub directory: PathBuf,

    /// Destination registry (e.g., "air.gap:5000")
    #[arg(long)]
    pub registry: String,

    /// Destination project, replacing the first repository component
    #[arg(long)]
    pub project: Option<String>,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Turn one index record into a load unit.
///
/// Without `--arch`/`--os` the unit loads whatever platforms were saved.
fn build_unit(
    saved: SavedImage,
    args: &LoadArgs,
    config: &MirrorConfig,
    validate: bool,
) -> Result<MirrorUnit, String> {
    let source = ImageReference::parse(&saved.source).map_err(|e| e.to_string())?;
    let destination = super::mirror::relocate(&source, Some(&args.registry), args.project.as_deref());

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

    let unit = if validate {
        MirrorUnit::load_validate(saved, destination)
    } else {
        MirrorUnit::load(saved, destination)
    };
    Ok(unit
        .with_platforms(arch, os)
        .with_provenance(config.copy_provenance)
        .with_failure_line(line))
}

pub async fn execute(
    args: LoadArgs,
    config: MirrorConfig,
    validate: bool,
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
        match build_unit(saved, &args, &config, validate) {
            Ok(unit) => prepared.units.push(unit),
            Err(e) => {
                super::reject(&failed, &line, e).await?;
                prepared.rejected += 1;
            }
        }
    }

    tracing::info!(
        images = prepared.units.len(),
        registry = %args.registry,
        validate,
        "Starting load"
    );
    let mirrorer = Mirrorer::new(super::registry_client(&config)?)
        .with_retry(config.retry.clone())
        .with_archive(Arc::new(archive));
    super::run_units(&config, mirrorer, failed, prepared).await?;
    Ok(())
}
