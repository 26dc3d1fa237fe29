use crate::{
    factory::{create_csv_pipeline, open_offset_store},
    tests::support::{run_until_drained, settings},
};
use connectors::file::csv::settings::CsvSettings;
use engine_config::settings::OffsetStoreSettings;
use tracing_test::traced_test;

// Scenario: two CSV files read into one JSON-lines file, then run again.
// Expected Outcome:
// - the first run writes one line per CSV row.
// - the second run resumes from the stored offsets and writes nothing new.
#[traced_test]
#[tokio::test]
async fn copies_csv_files_to_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    tokio::fs::create_dir_all(&input).await.unwrap();
    tokio::fs::write(input.join("orders.csv"), "id,amount\n1,10.5\n2,3.0\n3,7.25\n")
        .await
        .unwrap();
    tokio::fs::write(input.join("users.csv"), "id,name\n1,ada\n2,grace\n")
        .await
        .unwrap();
    let output = dir.path().join("out").join("rows.jsonl");

    let mut settings = settings(2, 2);
    settings.target.path = Some(output.clone());

    for _ in 0..2 {
        let store = open_offset_store(&OffsetStoreSettings::default(), "csv", dir.path()).unwrap();
        let pipeline =
            create_csv_pipeline(settings.clone(), &input, CsvSettings::default()).unwrap();
        run_until_drained(pipeline, store).await.unwrap();
    }

    let written = tokio::fs::read_to_string(&output).await.unwrap();
    assert_eq!(written.lines().count(), 5);
    assert!(written.contains("grace"));
}
