use std::path::{Path, PathBuf};

use mrl_sync::{LinkerConfig, LinkerPipeline};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn fixture_config(out: &Path) -> LinkerConfig {
    let root = workspace_root();
    LinkerConfig {
        missions_location: root.join("fixtures/missions.csv").display().to_string(),
        resources_location: root.join("fixtures/resources.csv").display().to_string(),
        output_path: out.join("mission_resource_updates.sql"),
        reports_dir: out.join("reports"),
        workspace_root: root,
        ..LinkerConfig::from_vars(|_| None)
    }
}

#[tokio::test]
async fn fixture_datasets_link_expected_pairs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = fixture_config(dir.path());
    let pipeline = LinkerPipeline::new(config.clone()).expect("pipeline");

    let summary = pipeline.run_match().await.expect("run");
    assert_eq!(summary.missions, 5);
    assert_eq!(summary.resources, 4);
    assert_eq!(summary.matched, 4);
    assert_eq!(summary.unmatched, 1);

    let pairs: Vec<(String, Option<String>)> = summary
        .verdicts
        .iter()
        .map(|v| {
            (
                v.mission_id.clone(),
                v.matched.as_ref().map(|m| m.resource_id.clone()),
            )
        })
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("m-001".to_string(), Some("r-001".to_string())),
            ("m-002".to_string(), Some("r-002".to_string())),
            ("m-003".to_string(), None),
            ("m-004".to_string(), Some("r-003".to_string())),
            ("m-005".to_string(), Some("r-004".to_string())),
        ]
    );

    let sql = std::fs::read_to_string(&config.output_path).expect("sql");
    assert_eq!(sql.matches("UPDATE missions SET resource_id").count(), 4);
    assert!(sql.contains("-- Match 1: Customer Obsession -> Customer Obsession\n"));
    assert!(sql.contains("UPDATE missions SET resource_id = 'r-004' WHERE id = 'm-005';"));
}

#[tokio::test]
async fn repeated_runs_are_identical() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pipeline = LinkerPipeline::new(fixture_config(dir.path())).expect("pipeline");

    let first = pipeline.run_match().await.expect("first");
    let second = pipeline.run_match().await.expect("second");
    assert_eq!(first.verdicts, second.verdicts);
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn fixture_analysis_reports_links_and_suggestions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pipeline = LinkerPipeline::new(fixture_config(dir.path())).expect("pipeline");

    let analysis = pipeline.run_analysis().await.expect("analysis");
    assert_eq!(analysis.linked_missions, 1);
    assert_eq!(analysis.unlinked_missions, 4);
    assert_eq!(analysis.mission_types.get("Unknown"), Some(&1));
    assert_eq!(analysis.resource_types.get("guide"), Some(&2));
    assert_eq!(
        analysis.relationships[1].resource_title.as_deref(),
        Some("Customer Journey Mapping")
    );

    assert_eq!(
        analysis.sample_mission.as_ref().map(|r| r["title"].as_str()),
        Some("Customer Obsession")
    );

    let suggested: Vec<(&str, &str, u32)> = analysis
        .suggestions
        .iter()
        .map(|s| (s.mission_id.as_str(), s.resource_id.as_str(), s.points))
        .collect();
    assert_eq!(
        suggested,
        vec![("m-001", "r-001", 7), ("m-003", "r-001", 4), ("m-004", "r-001", 5)]
    );
}

#[tokio::test]
async fn raising_the_threshold_drops_weak_links() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = fixture_config(dir.path());
    config.threshold_override = Some(0.6);
    let summary = LinkerPipeline::new(config)
        .expect("pipeline")
        .run_match()
        .await
        .expect("run");
    assert_eq!(summary.matched, 2);
}
