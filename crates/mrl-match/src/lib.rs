//! Fuzzy mission -> resource matching.

use std::path::{Path, PathBuf};

use mrl_core::{MatchOutcome, MatchResult, Mission, Resource, Verdict};
use serde::{Deserialize, Serialize};
use strsim::{jaro_winkler, normalized_levenshtein, sorensen_dice};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "mrl-match";

pub const DEFAULT_KEYWORDS: &[&str] = &[
    "customer",
    "obsess",
    "experience",
    "cx",
    "forrester",
    "behavior",
    "culture",
    "focus",
];

/// Vocabulary for the keyword-only suggestions in the dataset analysis.
pub const DEFAULT_SUGGESTION_KEYWORDS: &[&str] =
    &["customer", "obsess", "experience", "cx", "forrester"];

pub const DEFAULT_THRESHOLD: f64 = 0.2;

/// Slack for float error when comparing a threshold against the reachable maximum.
const THRESHOLD_EPSILON: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing scoring rules: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid scoring config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    Levenshtein,
    JaroWinkler,
    SorensenDice,
}

impl SimilarityMetric {
    /// Normalized similarity in `[0, 1]`. Two empty strings are identical.
    pub fn ratio(self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        let value = match self {
            Self::Levenshtein => normalized_levenshtein(a, b),
            Self::JaroWinkler => jaro_winkler(a, b),
            Self::SorensenDice => sorensen_dice(a, b),
        };
        value.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub title: f64,
    pub description: f64,
    pub combined: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            title: 0.4,
            description: 0.3,
            combined: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    pub keywords: Vec<String>,
    pub suggestion_keywords: Vec<String>,
    pub keyword_divisor: f64,
    pub keyword_cap: f64,
    pub threshold: f64,
    pub metric: SimilarityMetric,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            suggestion_keywords: DEFAULT_SUGGESTION_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            keyword_divisor: 10.0,
            keyword_cap: 0.1,
            threshold: DEFAULT_THRESHOLD,
            metric: SimilarityMetric::default(),
        }
    }
}

impl ScoringConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.weights;
        if [w.title, w.description, w.combined, self.keyword_cap]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return Err(ConfigError::Invalid(
                "weights and keyword_cap must be finite and non-negative".into(),
            ));
        }
        if !(self.keyword_divisor.is_finite() && self.keyword_divisor > 0.0) {
            return Err(ConfigError::Invalid("keyword_divisor must be positive".into()));
        }
        let max = self.max_score();
        if !(self.threshold >= 0.0 && self.threshold <= max + THRESHOLD_EPSILON) {
            return Err(ConfigError::Invalid(format!(
                "threshold {} outside [0, {:.3}], the highest score these weights can reach",
                self.threshold,
                max
            )));
        }
        if self
            .keywords
            .iter()
            .chain(&self.suggestion_keywords)
            .any(|k| k.trim().is_empty())
        {
            return Err(ConfigError::Invalid("keywords must not be blank".into()));
        }
        Ok(())
    }

    /// Highest total any pair can score: every similarity at 1.0 plus the full bonus.
    pub fn max_score(&self) -> f64 {
        let w = &self.weights;
        w.title + w.description + w.combined + self.keyword_cap
    }

    fn lowered_keywords(&self) -> Vec<String> {
        self.keywords.iter().map(|k| k.to_lowercase()).collect()
    }
}

/// Lower-cased title, description, and `"{title} {description}"` of one record.
#[derive(Debug, Clone)]
pub struct PreparedText {
    pub title: String,
    pub description: String,
    pub combined: String,
}

impl PreparedText {
    pub fn new(title: &str, description: &str) -> Self {
        Self {
            title: title.to_lowercase(),
            description: description.to_lowercase(),
            combined: format!("{title} {description}").to_lowercase(),
        }
    }

    pub fn mission(mission: &Mission) -> Self {
        Self::new(&mission.title, &mission.description)
    }

    pub fn resource(resource: &Resource) -> Self {
        Self::new(&resource.title, &resource.description)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub title_similarity: f64,
    pub description_similarity: f64,
    pub combined_similarity: f64,
    pub keyword_points: u32,
    pub keyword_bonus: f64,
    pub total: f64,
}

/// Keyword points between two lower-cased texts.
///
/// +2 for a keyword in both. +1 for a keyword only in `resource_text`, but when
/// `gate_on_mission` is set only if some keyword appears in `mission_text` at all.
pub fn keyword_points(
    mission_text: &str,
    resource_text: &str,
    keywords: &[String],
    gate_on_mission: bool,
) -> u32 {
    let mission_has_any = !gate_on_mission || keywords.iter().any(|k| mission_text.contains(k.as_str()));
    keywords
        .iter()
        .map(|k| {
            let in_resource = resource_text.contains(k.as_str());
            if in_resource && mission_text.contains(k.as_str()) {
                2
            } else if in_resource && mission_has_any {
                1
            } else {
                0
            }
        })
        .sum()
}

fn breakdown_prepared(
    mission: &PreparedText,
    resource: &PreparedText,
    keywords: &[String],
    config: &ScoringConfig,
) -> ScoreBreakdown {
    let metric = config.metric;
    let title_similarity = metric.ratio(&mission.title, &resource.title);
    let description_similarity = metric.ratio(&mission.description, &resource.description);
    let combined_similarity = metric.ratio(&mission.combined, &resource.combined);
    let points = keyword_points(&mission.combined, &resource.combined, keywords, true);
    let keyword_bonus = (f64::from(points) / config.keyword_divisor).min(config.keyword_cap);

    let w = &config.weights;
    let total = title_similarity * w.title
        + description_similarity * w.description
        + combined_similarity * w.combined
        + keyword_bonus;

    ScoreBreakdown {
        title_similarity,
        description_similarity,
        combined_similarity,
        keyword_points: points,
        keyword_bonus,
        total,
    }
}

/// Full component breakdown for one mission/resource pair.
pub fn score_breakdown(mission: &Mission, resource: &Resource, config: &ScoringConfig) -> ScoreBreakdown {
    breakdown_prepared(
        &PreparedText::mission(mission),
        &PreparedText::resource(resource),
        &config.lowered_keywords(),
        config,
    )
}

pub fn score(mission: &Mission, resource: &Resource, config: &ScoringConfig) -> f64 {
    score_breakdown(mission, resource, config).total
}

/// First strict maximum above `threshold`, as `(index, score)`.
pub fn select_best(scores: impl IntoIterator<Item = f64>, threshold: f64) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, score) in scores.into_iter().enumerate() {
        if best.map_or(true, |(_, b)| score > b) {
            best = Some((idx, score));
        }
    }
    best.filter(|(_, s)| *s > threshold)
}

pub struct Matcher {
    config: ScoringConfig,
    keywords: Vec<String>,
}

impl Matcher {
    pub fn new(config: ScoringConfig) -> Self {
        let keywords = config.lowered_keywords();
        Self { config, keywords }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// One verdict per mission, in mission order.
    pub fn verdicts(&self, missions: &[Mission], resources: &[Resource]) -> Vec<Verdict> {
        let prepared: Vec<PreparedText> = resources.iter().map(PreparedText::resource).collect();

        missions
            .iter()
            .map(|mission| {
                let mission_text = PreparedText::mission(mission);
                let scores = prepared
                    .iter()
                    .map(|r| breakdown_prepared(&mission_text, r, &self.keywords, &self.config).total);
                let matched = select_best(scores, self.config.threshold).map(|(idx, score)| {
                    let resource = &resources[idx];
                    MatchResult {
                        mission_id: mission.id.clone(),
                        mission_title: mission.title.clone(),
                        resource_id: resource.id.clone(),
                        resource_title: resource.title.clone(),
                        score,
                    }
                });
                debug!(
                    mission_id = %mission.id,
                    resource_id = matched.as_ref().map(|m| m.resource_id.as_str()).unwrap_or("-"),
                    "scored mission"
                );
                Verdict {
                    mission_id: mission.id.clone(),
                    mission_title: mission.title.clone(),
                    matched,
                }
            })
            .collect()
    }

    pub fn run(&self, missions: &[Mission], resources: &[Resource]) -> MatchOutcome {
        MatchOutcome::from_verdicts(&self.verdicts(missions, resources))
    }
}

/// Keyword-only pairing suggested for a mission without a linked resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordSuggestion {
    pub mission_id: String,
    pub mission_title: String,
    pub resource_id: String,
    pub resource_title: String,
    pub points: u32,
}

/// Suggest a resource for each of the first `limit` unlinked missions by keyword
/// overlap alone. Missions with no positive-scoring resource are skipped.
pub fn suggest_by_keywords(
    missions: &[Mission],
    resources: &[Resource],
    keywords: &[String],
    limit: usize,
) -> Vec<KeywordSuggestion> {
    let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
    let prepared: Vec<PreparedText> = resources.iter().map(PreparedText::resource).collect();

    missions
        .iter()
        .filter(|m| m.resource_id.is_none())
        .take(limit)
        .filter_map(|mission| {
            let text = PreparedText::mission(mission);
            let mut best: Option<(usize, u32)> = None;
            for (idx, r) in prepared.iter().enumerate() {
                let points = keyword_points(&text.combined, &r.combined, &keywords, false);
                if points > best.map_or(0, |(_, p)| p) {
                    best = Some((idx, points));
                }
            }
            best.map(|(idx, points)| KeywordSuggestion {
                mission_id: mission.id.clone(),
                mission_title: mission.title.clone(),
                resource_id: resources[idx].id.clone(),
                resource_title: resources[idx].title.clone(),
                points,
            })
        })
        .collect()
}
