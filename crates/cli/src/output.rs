use crate::error::CliError;
use engine_runtime::runner::RunReport;
use model::{execution::error_record::ErrorRecord, offsets::OffsetMap};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub pipeline: &'a str,
    pub elapsed_ms: u128,
    pub records: u64,
    pub batches: u64,
    pub error_records: u64,
    pub discarded_records: u64,
    pub offsets_committed: u64,
    pub no_more_data_events: u64,
    pub offsets: &'a OffsetMap,
    pub errors: &'a [ErrorRecord],
}

impl<'a> From<&'a RunReport> for RunSummary<'a> {
    fn from(report: &'a RunReport) -> Self {
        RunSummary {
            pipeline: &report.pipeline,
            elapsed_ms: report.elapsed.as_millis(),
            records: report.metrics.records_processed,
            batches: report.metrics.batches_processed,
            error_records: report.metrics.error_records,
            discarded_records: report.metrics.discarded_records,
            offsets_committed: report.metrics.offsets_committed,
            no_more_data_events: report.metrics.no_more_data_events,
            offsets: &report.offsets,
            errors: &report.errors,
        }
    }
}

fn generate_report_json(report: &RunReport) -> Result<String, CliError> {
    Ok(serde_json::to_string_pretty(&RunSummary::from(report))?)
}

pub async fn write_report(report: &RunReport, path: &Path) -> Result<(), CliError> {
    let report_json = generate_report_json(report)?;
    tokio::fs::write(path, report_json).await?;
    Ok(())
}

pub fn print_report(report: &RunReport) -> Result<(), CliError> {
    let report_json = generate_report_json(report)?;
    println!("{report_json}");
    Ok(())
}

pub fn print_offsets_table(pipeline: &str, location: &str, offsets: Option<&OffsetMap>) {
    println!("Offsets of pipeline '{pipeline}' ({location}):");
    println!("-----------------------------");
    match offsets {
        None => println!("nothing stored yet"),
        Some(map) if map.is_empty() => println!("no offsets (reset)"),
        Some(map) => {
            let width = map.keys().map(String::len).max().unwrap_or(0).max(9);
            println!("{:<width$} Offset", "Partition");
            for (partition, offset) in map {
                println!("{partition:<width$} {offset}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::metrics::MetricsSnapshot;
    use std::time::Duration;

    #[test]
    fn summary_flattens_metrics() {
        let report = RunReport {
            pipeline: "orders".to_string(),
            metrics: MetricsSnapshot {
                records_processed: 8,
                batches_processed: 4,
                ..MetricsSnapshot::default()
            },
            errors: Vec::new(),
            events: Vec::new(),
            offsets: OffsetMap::from([("A".to_string(), "id=4".to_string())]),
            elapsed: Duration::from_millis(12),
        };

        let json: serde_json::Value =
            serde_json::from_str(&generate_report_json(&report).unwrap()).unwrap();

        assert_eq!(json["pipeline"], "orders");
        assert_eq!(json["records"], 8);
        assert_eq!(json["batches"], 4);
        assert_eq!(json["offsets"]["A"], "id=4");
    }
}
