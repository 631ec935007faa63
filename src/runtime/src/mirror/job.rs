//! Worker-pool adapter for mirror units.

use std::sync::Arc;

use a3s_mirror_core::error::Result;
use a3s_mirror_core::job::{Job, JobId};
use async_trait::async_trait;
use tracing::Instrument;

use super::machine::Mirrorer;
use super::unit::MirrorUnit;

/// A mirror unit scheduled on the worker pool.
pub struct MirrorJob {
    unit: MirrorUnit,
    mirrorer: Arc<Mirrorer>,
}

impl MirrorJob {
    pub fn new(unit: MirrorUnit, mirrorer: Arc<Mirrorer>) -> Self {
        Self { unit, mirrorer }
    }

    pub fn unit(&self) -> &MirrorUnit {
        &self.unit
    }
}

#[async_trait]
impl Job for MirrorJob {
    async fn execute(&mut self) -> Result<()> {
        let span = tracing::info_span!("unit", id = %self.unit.id(), mode = %self.unit.mode());
        let result = self.mirrorer.run(&mut self.unit).instrument(span).await;
        let copied = self.unit.images.iter().filter(|i| i.done && !i.skipped).count();
        let skipped = self.unit.images.iter().filter(|i| i.skipped).count();
        match &result {
            Ok(()) => tracing::info!(
                unit = %self.unit.id(),
                mode = %self.unit.mode(),
                copied,
                skipped,
                "PASS"
            ),
            Err(e) => tracing::error!(
                unit = %self.unit.id(),
                mode = %self.unit.mode(),
                copied,
                skipped,
                failed = self.unit.failed_images(),
                error = %e,
                "FAILED"
            ),
        }
        result
    }

    fn id(&self) -> JobId {
        self.unit.id()
    }

    fn failure_line(&self) -> String {
        self.unit.failure_line()
    }

    fn job_type(&self) -> &str {
        match self.unit.mode() {
            super::MirrorMode::Mirror => "mirror",
            super::MirrorMode::Save => "save",
            super::MirrorMode::Load => "load",
            super::MirrorMode::MirrorValidate => "mirror-validate",
            super::MirrorMode::SaveValidate => "save-validate",
            super::MirrorMode::LoadValidate => "load-validate",
        }
    }
}
