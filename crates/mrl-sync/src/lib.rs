//! Linker pipeline: load datasets, analyze, match, emit SQL + run reports.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mrl_core::{
    missions_from_records, resources_from_records, MatchOutcome, MatchResult, Mission, Record,
    Resource, Verdict,
};
use mrl_match::{suggest_by_keywords, KeywordSuggestion, Matcher, ScoringConfig};
use mrl_sources::{source_for_location, DataSource, DatasetInput};
use mrl_storage::{HttpClientConfig, HttpFetcher, SnapshotStore};
use serde::Serialize;
use tokio::fs;
use tracing::info;
use uuid::Uuid;

pub const CRATE_NAME: &str = "mrl-sync";

pub const DEFAULT_MISSIONS_URL: &str =
    "https://hebbkx1anhila5yf.public.blob.vercel-storage.com/missions_rows-uy9YK8MfW6rD3DDFlwNYFpzk20qewH.csv";
pub const DEFAULT_RESOURCES_URL: &str =
    "https://hebbkx1anhila5yf.public.blob.vercel-storage.com/resources_rows-m7ltJZeTLvhY6NavZBwoj34E7zk0IY.csv";
pub const DEFAULT_OUTPUT_PATH: &str = "/tmp/mission_resource_updates.sql";

const RELATIONSHIP_PREVIEW: usize = 5;
const SUGGESTION_LIMIT: usize = 3;

#[derive(Debug, Clone)]
pub struct LinkerConfig {
    pub missions_location: String,
    pub resources_location: String,
    pub output_path: PathBuf,
    pub reports_dir: PathBuf,
    /// Keep each downloaded body under this directory, named by its sha256.
    pub snapshot_dir: Option<PathBuf>,
    pub scoring_rules: Option<PathBuf>,
    pub threshold_override: Option<f64>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub workspace_root: PathBuf,
}

impl LinkerConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            missions_location: var("MRL_MISSIONS_URL")
                .unwrap_or_else(|| DEFAULT_MISSIONS_URL.to_string()),
            resources_location: var("MRL_RESOURCES_URL")
                .unwrap_or_else(|| DEFAULT_RESOURCES_URL.to_string()),
            output_path: var("MRL_OUTPUT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PATH)),
            reports_dir: var("MRL_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./reports")),
            snapshot_dir: var("MRL_SNAPSHOT_DIR").map(PathBuf::from),
            scoring_rules: var("MRL_SCORING_RULES").map(PathBuf::from),
            threshold_override: None,
            user_agent: var("MRL_USER_AGENT").unwrap_or_else(|| "mrl-bot/0.1".to_string()),
            http_timeout_secs: var("MRL_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            workspace_root: PathBuf::from("."),
        }
    }

    /// Explicit rules path, else `rules/scoring.yaml` under the workspace root if present,
    /// else built-in defaults. A threshold override is applied last.
    pub fn load_scoring(&self) -> Result<ScoringConfig> {
        let default_rules = self.workspace_root.join("rules").join("scoring.yaml");
        let mut scoring = match &self.scoring_rules {
            Some(path) => ScoringConfig::from_path(path)
                .with_context(|| format!("loading scoring rules {}", path.display()))?,
            None if default_rules.exists() => ScoringConfig::from_path(&default_rules)
                .with_context(|| format!("loading scoring rules {}", default_rules.display()))?,
            None => ScoringConfig::default(),
        };
        if let Some(threshold) = self.threshold_override {
            scoring.threshold = threshold;
            scoring.validate().context("applying threshold override")?;
        }
        Ok(scoring)
    }
}

/// Destination for accepted matches.
#[async_trait]
pub trait MatchSink: Send + Sync {
    async fn write(&self, matches: &[MatchResult]) -> Result<()>;

    fn describe(&self) -> String;
}

/// Single-quoted SQL literal with embedded quotes doubled.
pub fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn update_statement(m: &MatchResult) -> String {
    format!(
        "UPDATE missions SET resource_id = {} WHERE id = {};",
        sql_quote(&m.resource_id),
        sql_quote(&m.mission_id)
    )
}

/// Newlines would end a `--` comment early.
fn comment_text(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

pub fn render_sql(matches: &[MatchResult]) -> String {
    let mut out = String::from(
        "-- Smart Mission-Resource Matching Updates\n-- Generated based on content similarity analysis\n\n",
    );
    for (i, m) in matches.iter().enumerate() {
        out.push_str(&format!(
            "-- Match {}: {} -> {}\n{}\n\n",
            i + 1,
            comment_text(&m.mission_title),
            comment_text(&m.resource_title),
            update_statement(m)
        ));
    }
    out
}

/// Console echo of the generated statements, one clipped title pair per statement.
pub fn render_update_preview(matches: &[MatchResult]) -> String {
    let mut lines = vec!["=== GENERATED SQL UPDATES ===".to_string()];
    for m in matches {
        lines.push(format!(
            "-- Match: {}... -> {}...",
            clip(&comment_text(&m.mission_title), 30),
            clip(&comment_text(&m.resource_title), 30)
        ));
        lines.push(update_statement(m));
    }
    lines.join("\n")
}

#[derive(Debug, Clone)]
pub struct SqlFileSink {
    path: PathBuf,
}

impl SqlFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MatchSink for SqlFileSink {
    async fn write(&self, matches: &[MatchResult]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(&self.path, render_sql(matches))
            .await
            .with_context(|| format!("writing {}", self.path.display()))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// First `max_chars` characters of `text`.
pub fn clip(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Debug, Clone)]
pub struct Datasets {
    pub missions: Vec<Mission>,
    pub resources: Vec<Resource>,
    pub inputs: Vec<DatasetInput>,
    /// First rows exactly as read, every column included.
    pub mission_sample: Option<Record>,
    pub resource_sample: Option<Record>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelationshipPreview {
    pub mission_title: String,
    pub resource_title: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetAnalysis {
    pub mission_count: usize,
    pub resource_count: usize,
    pub linked_missions: usize,
    pub unlinked_missions: usize,
    pub mission_types: BTreeMap<String, usize>,
    pub resource_types: BTreeMap<String, usize>,
    pub sample_mission: Option<Record>,
    pub sample_resource: Option<Record>,
    pub relationships: Vec<RelationshipPreview>,
    pub suggestions: Vec<KeywordSuggestion>,
}

impl DatasetAnalysis {
    pub fn build(data: &Datasets, suggestion_keywords: &[String]) -> Self {
        let missions = data.missions.as_slice();
        let resources = data.resources.as_slice();
        let mut mission_types: BTreeMap<String, usize> = BTreeMap::new();
        for m in missions {
            *mission_types.entry(m.type_label().to_string()).or_default() += 1;
        }
        let mut resource_types: BTreeMap<String, usize> = BTreeMap::new();
        for r in resources {
            *resource_types.entry(r.type_label().to_string()).or_default() += 1;
        }

        let by_id: HashMap<&str, &Resource> = resources.iter().map(|r| (r.id.as_str(), r)).collect();
        let relationships = missions
            .iter()
            .take(RELATIONSHIP_PREVIEW)
            .map(|m| RelationshipPreview {
                mission_title: m.title.clone(),
                resource_title: m
                    .resource_id
                    .as_deref()
                    .and_then(|id| by_id.get(id))
                    .map(|r| r.title.clone()),
            })
            .collect();

        let linked_missions = missions.iter().filter(|m| m.resource_id.is_some()).count();

        Self {
            mission_count: missions.len(),
            resource_count: resources.len(),
            linked_missions,
            unlinked_missions: missions.len() - linked_missions,
            mission_types,
            resource_types,
            sample_mission: data.mission_sample.clone(),
            sample_resource: data.resource_sample.clone(),
            relationships,
            suggestions: suggest_by_keywords(
                missions,
                resources,
                suggestion_keywords,
                SUGGESTION_LIMIT,
            ),
        }
    }

    pub fn render_text(&self) -> Result<String> {
        let mut lines = vec!["=== MISSIONS ANALYSIS ===".to_string()];
        lines.push(format!("Missions: {}", self.mission_count));
        if let Some(sample) = &self.sample_mission {
            lines.push("Sample mission:".to_string());
            lines.push(serde_json::to_string_pretty(sample).context("rendering sample mission")?);
        }
        lines.push(format!("Missions with null resource_id: {}", self.unlinked_missions));
        lines.push(format!("Missions with resource_id: {}", self.linked_missions));
        lines.push("Mission types:".to_string());
        lines.extend(self.mission_types.iter().map(|(k, v)| format!("  {k}: {v}")));

        lines.push(String::new());
        lines.push("=== RESOURCES ANALYSIS ===".to_string());
        lines.push(format!("Resources: {}", self.resource_count));
        if let Some(sample) = &self.sample_resource {
            lines.push("Sample resource:".to_string());
            lines.push(serde_json::to_string_pretty(sample).context("rendering sample resource")?);
        }
        lines.push("Resource types:".to_string());
        lines.extend(self.resource_types.iter().map(|(k, v)| format!("  {k}: {v}")));

        lines.push(String::new());
        lines.push("=== RELATIONSHIP ANALYSIS ===".to_string());
        for rel in &self.relationships {
            match &rel.resource_title {
                Some(title) => lines.push(format!(
                    "✓ Mission: '{}...' -> Resource: '{}...'",
                    clip(&rel.mission_title, 50),
                    clip(title, 50)
                )),
                None => lines.push(format!(
                    "✗ Mission: '{}...' -> No resource linked",
                    clip(&rel.mission_title, 50)
                )),
            }
        }

        lines.push(String::new());
        lines.push("=== SUGGESTED RESOURCE MAPPINGS ===".to_string());
        for s in &self.suggestions {
            lines.push(format!("Mission: '{}...'", clip(&s.mission_title, 40)));
            lines.push(format!(
                "  -> Suggested Resource: '{}...' (score: {})",
                clip(&s.resource_title, 40),
                s.points
            ));
            lines.push(format!("  -> Mission ID: {}", s.mission_id));
            lines.push(format!("  -> Resource ID: {}", s.resource_id));
        }

        Ok(lines.join("\n"))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub missions: usize,
    pub resources: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub sql_output: String,
    pub reports_dir: String,
    pub inputs: Vec<DatasetInput>,
    pub verdicts: Vec<Verdict>,
}

#[derive(Debug, Clone, Serialize)]
struct MatchRunRecord {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    missions_location: String,
    resources_location: String,
    sql_output: String,
}

pub struct LinkerPipeline {
    config: LinkerConfig,
    scoring: ScoringConfig,
    missions: Box<dyn DataSource>,
    resources: Box<dyn DataSource>,
    sink: Box<dyn MatchSink>,
}

impl LinkerPipeline {
    pub fn new(config: LinkerConfig) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
        })?;
        let snapshots = config.snapshot_dir.clone().map(SnapshotStore::new);
        let missions = source_for_location("missions", &config.missions_location, &http, snapshots.as_ref());
        let resources =
            source_for_location("resources", &config.resources_location, &http, snapshots.as_ref());
        let scoring = config.load_scoring()?;
        let sink = Box::new(SqlFileSink::new(config.output_path.clone()));
        Ok(Self {
            config,
            scoring,
            missions,
            resources,
            sink,
        })
    }

    pub fn with_sources(mut self, missions: Box<dyn DataSource>, resources: Box<dyn DataSource>) -> Self {
        self.missions = missions;
        self.resources = resources;
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn MatchSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn scoring(&self) -> &ScoringConfig {
        &self.scoring
    }

    pub async fn load_datasets(&self) -> Result<Datasets> {
        info!(source = self.missions.name(), "loading missions");
        let mission_rows = self.missions.load().await?;
        info!(source = self.resources.name(), "loading resources");
        let resource_rows = self.resources.load().await?;

        let missions = missions_from_records(&mission_rows.records).context("decoding missions")?;
        let resources =
            resources_from_records(&resource_rows.records).context("decoding resources")?;
        info!(missions = missions.len(), resources = resources.len(), "datasets loaded");
        Ok(Datasets {
            missions,
            resources,
            mission_sample: mission_rows.records.into_iter().next(),
            resource_sample: resource_rows.records.into_iter().next(),
            inputs: vec![mission_rows.input, resource_rows.input],
        })
    }

    pub async fn run_analysis(&self) -> Result<DatasetAnalysis> {
        let data = self.load_datasets().await?;
        Ok(DatasetAnalysis::build(&data, &self.scoring.suggestion_keywords))
    }

    pub async fn run_match(&self) -> Result<MatchRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let data = self.load_datasets().await?;

        let matcher = Matcher::new(self.scoring.clone());
        let verdicts = matcher.verdicts(&data.missions, &data.resources);
        let outcome = MatchOutcome::from_verdicts(&verdicts);
        info!(
            matched = outcome.matches.len(),
            unmatched = outcome.unmatched.len(),
            "matching finished"
        );

        self.sink.write(&outcome.matches).await?;
        let sql_output = self.sink.describe();
        info!(output = %sql_output, "sql updates written");

        let finished_at = Utc::now();
        let run = MatchRunRecord {
            run_id,
            started_at,
            finished_at,
            missions_location: self.config.missions_location.clone(),
            resources_location: self.config.resources_location.clone(),
            sql_output: sql_output.clone(),
        };
        let reports_dir = self.write_reports(&run, &data.inputs, &outcome).await?;

        Ok(MatchRunSummary {
            run_id,
            started_at,
            finished_at,
            missions: data.missions.len(),
            resources: data.resources.len(),
            matched: outcome.matches.len(),
            unmatched: outcome.unmatched.len(),
            sql_output,
            reports_dir: reports_dir.display().to_string(),
            inputs: data.inputs,
            verdicts,
        })
    }

    async fn write_reports(
        &self,
        run: &MatchRunRecord,
        inputs: &[DatasetInput],
        outcome: &MatchOutcome,
    ) -> Result<PathBuf> {
        let reports_dir = self.config.reports_dir.join(run.run_id.to_string());
        fs::create_dir_all(&reports_dir)
            .await
            .with_context(|| format!("creating {}", reports_dir.display()))?;

        let summary = format!(
            "# Mission/Resource Match Run\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Missions source: {}\n- Resources source: {}\n- Matched: {}\n- Unmatched: {}\n- SQL output: `{}`\n\n## Inputs\n{}\n\n## Matches\n{}\n",
            run.run_id,
            run.started_at,
            run.finished_at,
            run.missions_location,
            run.resources_location,
            outcome.matches.len(),
            outcome.unmatched.len(),
            run.sql_output,
            inputs
                .iter()
                .map(|i| format!(
                    "- {}: {} rows, sha256 `{}`",
                    i.dataset,
                    i.rows,
                    i.sha256.as_deref().unwrap_or("-")
                ))
                .collect::<Vec<_>>()
                .join("\n"),
            outcome
                .matches
                .iter()
                .map(|m| format!("- {} -> {} ({:.3})", m.mission_id, m.resource_id, m.score))
                .collect::<Vec<_>>()
                .join("\n")
        );
        fs::write(reports_dir.join("summary.md"), summary)
            .await
            .context("writing summary.md")?;

        let report_json = serde_json::to_vec_pretty(&serde_json::json!({
            "run": run,
            "inputs": inputs,
            "scoring": &self.scoring,
            "matches": &outcome.matches,
            "unmatched": &outcome.unmatched,
        }))
        .context("serializing match report")?;
        fs::write(reports_dir.join("match_report.json"), report_json)
            .await
            .context("writing match_report.json")?;

        Ok(reports_dir)
    }
}
