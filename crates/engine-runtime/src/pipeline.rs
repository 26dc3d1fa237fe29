use crate::error::RuntimeError;
use engine_config::settings::PipelineSettings;
use engine_core::stage::Stage;
use model::{core::identifiers::StageId, execution::policy::OnRecordError};

/// A stage plus the identity and error policy it runs with.
pub struct StageDefinition {
    pub id: StageId,
    pub stage: Stage,
    pub on_record_error: Option<OnRecordError>,
}

impl StageDefinition {
    pub fn new(
        id: impl Into<String>,
        stage: Stage,
        on_record_error: Option<OnRecordError>,
    ) -> Self {
        StageDefinition {
            id: StageId::new(id),
            stage,
            on_record_error,
        }
    }
}

/// One origin followed by the stages every batch passes through, in order.
pub struct Pipeline {
    pub settings: PipelineSettings,
    pub(crate) origin: StageDefinition,
    pub(crate) downstream: Vec<StageDefinition>,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings, origin: StageDefinition) -> Result<Self, RuntimeError> {
        if !origin.stage.is_origin() {
            return Err(RuntimeError::Definition(format!(
                "stage '{}' of kind {} cannot start a pipeline",
                origin.id,
                origin.stage.kind()
            )));
        }

        Ok(Pipeline {
            settings,
            origin,
            downstream: Vec::new(),
        })
    }

    pub fn with_stage(mut self, stage: StageDefinition) -> Result<Self, RuntimeError> {
        if stage.stage.is_origin() {
            return Err(RuntimeError::Definition(format!(
                "origin '{}' can only start a pipeline",
                stage.id
            )));
        }
        if self.stage_ids().any(|id| id == &stage.id) {
            return Err(RuntimeError::Definition(format!(
                "stage id '{}' is used twice",
                stage.id
            )));
        }

        self.downstream.push(stage);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn stage_ids(&self) -> impl Iterator<Item = &StageId> {
        std::iter::once(&self.origin.id).chain(self.downstream.iter().map(|s| &s.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use engine_core::{context::StageContext, error::StageError, stage::Target};
    use model::records::batch::Batch;

    struct Discard;

    #[async_trait]
    impl Target for Discard {
        async fn write(&self, _ctx: &StageContext, _batch: &Batch) -> Result<(), StageError> {
            Ok(())
        }
    }

    fn target(id: &str) -> StageDefinition {
        StageDefinition::new(id, Stage::Target(Box::new(Discard)), None)
    }

    #[test]
    fn origin_must_come_first() {
        let err = Pipeline::new(PipelineSettings::default(), target("out"));
        assert!(matches!(err, Err(RuntimeError::Definition(_))));
    }
}
