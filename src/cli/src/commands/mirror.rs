//! `a3s-mirror mirror` and `a3s-mirror mirror-validate` commands.

use std::path::PathBuf;
use std::sync::Arc;

use a3s_mirror_core::config::MirrorConfig;
use a3s_mirror_queue::FailedList;
use a3s_mirror_runtime::{ImageReference, MirrorUnit, Mirrorer};
use clap::Args;

use super::{Prepared, RunArgs};
use crate::list::{read_list, ImageLine};

#[derive(Args, Debug, Clone)]
pub struct MirrorArgs {
    /// Image list file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Destination registry (e.g., "priv.io:5000"); required for IMAGE:TAG lines
    #[arg(long)]
    pub registry: Option<String>,

    /// Destination project, replacing the first repository component
    #[arg(long)]
    pub project: Option<String>,

    /// Source registry override
    #[arg(long)]
    pub source_registry: Option<String>,

    /// Source project override
    #[arg(long)]
    pub source_project: Option<String>,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Apply registry and project overrides to a repository.
pub(crate) fn relocate(
    reference: &ImageReference,
    registry: Option<&str>,
    project: Option<&str>,
) -> ImageReference {
    let mut r = reference.clone();
    if let Some(registry) = registry {
        r = r.with_registry(registry);
    }
    if let Some(project) = project {
        r = r.with_project(project);
    }
    r
}

/// Turn one list line into a mirror unit.
fn build_unit(
    line: &ImageLine,
    raw: &str,
    args: &MirrorArgs,
    config: &MirrorConfig,
    validate: bool,
) -> Result<MirrorUnit, String> {
    let (source, tag) = line.source();
    let source = relocate(
        source,
        args.source_registry.as_deref(),
        args.source_project.as_deref(),
    );
    let destination = match line {
        ImageLine::Default(reference) => {
            let registry = args.registry.as_deref().ok_or_else(|| {
                "no destination registry, pass --registry or use 'SOURCE DESTINATION TAG' lines"
                    .to_string()
            })?;
            relocate(reference, Some(registry), args.project.as_deref())
        }
        ImageLine::Mirror { destination, .. } => {
            relocate(destination, args.registry.as_deref(), args.project.as_deref())
        }
    };

    let unit = if validate {
        MirrorUnit::mirror_validate(source, destination, tag)
    } else {
        MirrorUnit::mirror(source, destination, tag)
    };
    Ok(unit
        .with_platforms(config.arch.clone(), config.os.clone())
        .with_provenance(config.copy_provenance)
        .with_failure_line(raw))
}

pub async fn execute(
    args: MirrorArgs,
    config: MirrorConfig,
    validate: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::finalize_config(config, &args.run)?;
    let entries = read_list(&args.file)?;
    let failed = Arc::new(FailedList::create(&config.failed_file).await?);

    let mut prepared = Prepared {
        units: Vec::new(),
        rejected: 0,
    };
    for entry in entries {
        let unit = entry
            .parsed
            .map_err(|e| e.to_string())
            .and_then(|line| build_unit(&line, &entry.line, &args, &config, validate));
        match unit {
            Ok(unit) => prepared.units.push(unit),
            Err(e) => {
                super::reject(&failed, &entry.line, e).await?;
                prepared.rejected += 1;
            }
        }
    }

    tracing::info!(
        images = prepared.units.len(),
        jobs = config.jobs,
        validate,
        "Starting mirror"
    );
    let mirrorer = Mirrorer::new(super::registry_client(&config)?).with_retry(config.retry.clone());
    super::run_units(&config, mirrorer, failed, prepared).await?;
    Ok(())
}
