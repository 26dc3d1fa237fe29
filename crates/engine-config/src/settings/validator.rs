use crate::settings::{BatchStrategy, PipelineSettings, TableSourceSettings};
use model::execution::issue::ConfigIssue;
use std::collections::HashSet;
use tracing::{info, warn};

pub const GROUP_PIPELINE: &str = "PIPELINE";
pub const GROUP_TABLE: &str = "TABLE";
pub const GROUP_ADVANCED: &str = "ADVANCED";

/// Checks settings before any stage is created; collects every issue
/// instead of stopping at the first.
pub struct SettingsValidator<'a> {
    settings: &'a PipelineSettings,
}

impl<'a> SettingsValidator<'a> {
    pub fn new(settings: &'a PipelineSettings) -> Self {
        Self { settings }
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        self.validate_pipeline(&mut issues);
        validate_table_source(&self.settings.source, &mut issues);

        if issues.is_empty() {
            info!(pipeline = %self.settings.name, "Settings validation completed successfully");
        } else {
            for issue in &issues {
                warn!(pipeline = %self.settings.name, %issue, "Configuration issue");
            }
        }

        issues
    }

    fn validate_pipeline(&self, issues: &mut Vec<ConfigIssue>) {
        let s = self.settings;

        if s.max_batch_size == 0 {
            issues.push(ConfigIssue::for_config(
                GROUP_PIPELINE,
                "max_batch_size",
                "PIPELINE_01",
                "max_batch_size must be at least 1",
            ));
        }

        if s.error_sink_capacity == 0 {
            issues.push(ConfigIssue::for_config(
                GROUP_PIPELINE,
                "error_sink_capacity",
                "PIPELINE_02",
                "error_sink_capacity must be at least 1",
            ));
        }

        if s.event_sink_capacity == 0 {
            issues.push(ConfigIssue::for_config(
                GROUP_PIPELINE,
                "event_sink_capacity",
                "PIPELINE_03",
                "event_sink_capacity must be at least 1",
            ));
        }
    }
}

/// Static checks of the table source settings. Checks that need the
/// discovered partitions run when the stage initializes.
pub fn validate_table_source(s: &TableSourceSettings, issues: &mut Vec<ConfigIssue>) {
    if s.threads == 0 {
        issues.push(ConfigIssue::for_config(
            GROUP_TABLE,
            "threads",
            "TABLE_01",
            "threads must be at least 1",
        ));
    }

    if s.max_batch_size == 0 {
        issues.push(ConfigIssue::for_config(
            GROUP_TABLE,
            "max_batch_size",
            "TABLE_02",
            "max_batch_size must be at least 1",
        ));
    }

    if s.batches_per_assignment == 0 {
        issues.push(ConfigIssue::for_config(
            GROUP_TABLE,
            "batches_per_assignment",
            "TABLE_03",
            "batches_per_assignment must be at least 1",
        ));
    } else if s.batch_strategy == BatchStrategy::Drain && s.batches_per_assignment != 1 {
        warn!(
            batches_per_assignment = s.batches_per_assignment,
            "batches_per_assignment is ignored by the drain strategy"
        );
    }

    let mut seen = HashSet::new();
    for col in &s.offset_columns {
        if !seen.insert(col.to_ascii_lowercase()) {
            issues.push(ConfigIssue::for_config(
                GROUP_TABLE,
                "offset_columns",
                "TABLE_04",
                format!("offset column '{col}' is listed more than once"),
            ));
        }
    }

    if !s.offset_columns.is_empty() {
        for col in s.initial_offsets.keys() {
            if !seen.contains(&col.to_ascii_lowercase()) {
                issues.push(ConfigIssue::for_config(
                    GROUP_TABLE,
                    "initial_offsets",
                    "TABLE_05",
                    format!("initial offset given for '{col}', which is not an offset column"),
                ));
            }
        }
    }

    // one connection per worker plus one for the supervising task
    if s.threads >= s.pool_size {
        issues.push(ConfigIssue::for_config(
            GROUP_ADVANCED,
            "pool_size",
            "ADVANCED_01",
            format!(
                "pool_size {} must be greater than the number of threads {}",
                s.pool_size, s.threads
            ),
        ));
    }

    if s.queue_timeout_ms == 0 {
        issues.push(ConfigIssue::for_config(
            GROUP_ADVANCED,
            "queue_timeout_ms",
            "ADVANCED_02",
            "queue_timeout_ms must be at least 1",
        ));
    }
}
