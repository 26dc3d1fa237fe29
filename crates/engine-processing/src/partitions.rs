use connectors::catalog::PartitionDescriptor;
use engine_config::settings::{
    PartitionOrdering, TableSourceSettings, validator::GROUP_TABLE,
};
use model::{
    core::value::Value,
    execution::issue::ConfigIssue,
    partition::{context::{OffsetColumn, PartitionContext}, offset::PartitionOffset},
};
use std::sync::Arc;
use tracing::debug;

/// Turns discovered partitions into the contexts the source reads, reporting
/// every problem as an issue.
pub fn resolve_partitions(
    discovered: Vec<PartitionDescriptor>,
    settings: &TableSourceSettings,
    issues: &mut Vec<ConfigIssue>,
) -> Vec<Arc<PartitionContext>> {
    let selected = select(discovered, &settings.partitions, issues);
    if selected.is_empty() {
        issues.push(ConfigIssue::for_config(
            GROUP_TABLE,
            "partitions",
            "TABLE_07",
            "no partitions to read",
        ));
        return Vec::new();
    }

    let mut contexts: Vec<_> = selected
        .iter()
        .filter_map(|desc| {
            let columns = offset_columns(desc, settings, issues)?;
            let initial = initial_offset(desc, &columns, settings, issues)?;
            debug!(partition = %desc.name, columns = ?columns, "Resolved partition");
            Some(Arc::new(PartitionContext::new(
                desc.name.clone(),
                columns,
                initial,
            )))
        })
        .collect();

    if settings.ordering == PartitionOrdering::Alphabetical {
        contexts.sort_by(|a, b| a.name().cmp(b.name()));
    }
    contexts
}

fn select(
    discovered: Vec<PartitionDescriptor>,
    wanted: &[String],
    issues: &mut Vec<ConfigIssue>,
) -> Vec<PartitionDescriptor> {
    if wanted.is_empty() {
        return discovered;
    }

    for name in wanted {
        if !discovered.iter().any(|d| &d.name == name) {
            issues.push(ConfigIssue::for_config(
                GROUP_TABLE,
                "partitions",
                "TABLE_06",
                format!("partition '{name}' was not found"),
            ));
        }
    }

    discovered
        .into_iter()
        .filter(|d| wanted.contains(&d.name))
        .collect()
}

/// Configured columns win over key columns. `None` when the partition cannot
/// be read incrementally.
fn offset_columns(
    desc: &PartitionDescriptor,
    settings: &TableSourceSettings,
    issues: &mut Vec<ConfigIssue>,
) -> Option<Vec<OffsetColumn>> {
    let metas = if settings.offset_columns.is_empty() {
        let keys = desc.key_columns();
        if keys.is_empty() {
            issues.push(ConfigIssue::for_config(
                GROUP_TABLE,
                "offset_columns",
                "TABLE_08",
                format!(
                    "partition '{}' has no key columns; configure offset_columns",
                    desc.name
                ),
            ));
            return None;
        }
        keys
    } else {
        let mut metas = Vec::with_capacity(settings.offset_columns.len());
        for name in &settings.offset_columns {
            match desc.column(name) {
                Some(meta) => metas.push(meta),
                None => {
                    issues.push(ConfigIssue::for_config(
                        GROUP_TABLE,
                        "offset_columns",
                        "TABLE_09",
                        format!("partition '{}' has no column '{name}'", desc.name),
                    ));
                    return None;
                }
            }
        }
        metas
    };

    let mut columns = Vec::with_capacity(metas.len());
    for meta in metas {
        if !meta.data_type.is_offset_capable() {
            issues.push(ConfigIssue::for_config(
                GROUP_TABLE,
                "offset_columns",
                "TABLE_10",
                format!(
                    "column '{}' of partition '{}' has type {}, which cannot be used as an offset",
                    meta.name, desc.name, meta.data_type
                ),
            ));
            return None;
        }
        columns.push(OffsetColumn::new(meta.name.clone(), meta.data_type));
    }
    Some(columns)
}

/// `Some(None)` when no initial offsets are configured.
fn initial_offset(
    desc: &PartitionDescriptor,
    columns: &[OffsetColumn],
    settings: &TableSourceSettings,
    issues: &mut Vec<ConfigIssue>,
) -> Option<Option<PartitionOffset>> {
    if settings.initial_offsets.is_empty() {
        return Some(None);
    }

    let mut pairs = Vec::with_capacity(columns.len());
    for col in columns {
        let configured = settings
            .initial_offsets
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&col.name))
            .map(|(_, value)| value);

        let Some(raw) = configured else {
            issues.push(ConfigIssue::for_config(
                GROUP_TABLE,
                "initial_offsets",
                "TABLE_11",
                format!(
                    "partition '{}' needs an initial offset for column '{}'",
                    desc.name, col.name
                ),
            ));
            return None;
        };

        match Value::parse(col.data_type, raw).ok().and_then(|v| v.to_token()) {
            Some(token) => pairs.push((col.name.clone(), token)),
            None => {
                issues.push(ConfigIssue::for_config(
                    GROUP_TABLE,
                    "initial_offsets",
                    "TABLE_12",
                    format!(
                        "initial offset '{raw}' is not a valid {} for column '{}'",
                        col.data_type, col.name
                    ),
                ));
                return None;
            }
        }
    }

    Some(Some(PartitionOffset::new(pairs)))
}
