//! Domain types shared by the document and vector sides of the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed output dimensionality of the embedding model.
pub const EMBEDDING_DIM: usize = 384;

pub type Uid = String;
pub type ProjectId = String;

/// Shallow field map merged into a stored document. Keys absent from the
/// map are left untouched by a merge.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// One project as it arrives in a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSubmission {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub requirements: Vec<String>,
}

/// Raw onboarding submission.
///
/// Optional sections follow "absent means don't touch": they merge into any
/// existing profile and are never cleared by omission. Projects are keyed by
/// a caller-chosen id; an ordered map keeps repeated aggregation of the same
/// submission summing in the same order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub skills: Option<Vec<String>>,
    #[serde(default)]
    pub preferences: Option<Vec<String>>,
    #[serde(default)]
    pub projects: Option<BTreeMap<ProjectId, ProjectSubmission>>,
}

/// Stored user document (`users/{uid}`). The document id is the externally
/// issued uid and never changes once assigned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub onboarded: bool,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub preferences: Vec<String>,
    #[serde(default)]
    pub projects: BTreeMap<ProjectId, ProjectRecord>,
}

/// Stored project document (`projects/{project_id}`). Created or merged
/// whenever a submission references the id; never deleted by the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectRecord {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub owner_uid: Uid,
}

impl ProjectRecord {
    pub fn from_submission(submission: &ProjectSubmission, owner_uid: &str) -> Self {
        Self {
            title: submission.title.clone(),
            description: submission.description.clone(),
            tech_stack: submission.tech_stack.clone(),
            requirements: submission.requirements.clone(),
            owner_uid: owner_uid.to_string(),
        }
    }
}

/// Final outcome of one onboarding request. `vectors_indexed` is false when
/// the vector phase failed or was skipped after documents were committed.
#[derive(Debug, Clone, Serialize)]
pub struct OnboardOutcome {
    pub message: String,
    pub uid: Uid,
    pub vectors_indexed: bool,
}

/// Canonical key for shared catalog entries: trimmed, lower-cased.
/// The raw form is preserved in the entry's `name` field and in vector
/// payloads; only the key is normalized.
pub fn catalog_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Shallow merge: every entry of `from` replaces the same key in `into`;
/// keys absent from `from` are left untouched.
pub fn merge_fields(into: &mut Fields, from: &Fields) {
    for (key, value) in from {
        into.insert(key.clone(), value.clone());
    }
}

/// Serialize a record into a shallow field map.
pub fn to_fields<T: Serialize>(value: &T) -> Fields {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => Fields::new(),
    }
}

/// Ephemeral ordered (text, weight) sequence fed to the aggregator.
///
/// Blank texts are dropped at insertion so the embedder never sees them.
/// Never persisted.
#[derive(Debug, Clone, Default)]
pub struct WeightedTextGroup {
    entries: Vec<(String, f32)>,
}

impl WeightedTextGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one text with its importance weight. Whitespace-only texts are
    /// skipped; weights must be positive.
    pub fn push(&mut self, text: &str, weight: f32) {
        debug_assert!(weight > 0.0, "weights must be positive");
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        self.entries.push((trimmed.to_string(), weight));
    }

    /// Add every text of a category under one shared weight.
    pub fn push_all<'a, I>(&mut self, texts: I, weight: f32)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for text in texts {
            self.push(text, weight);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn texts(&self) -> Vec<String> {
        self.entries.iter().map(|(text, _)| text.clone()).collect()
    }

    pub fn weights(&self) -> Vec<f32> {
        self.entries.iter().map(|(_, weight)| *weight).collect()
    }
}
