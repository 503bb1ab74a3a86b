//! Onboarding pipeline: validate a submission, persist normalized
//! documents, then derive and upsert entity vectors.
//!
//! Document persistence decides the request outcome. The vector phase is
//! strictly downstream and best-effort: its failures degrade the outcome to
//! `vectors_indexed = false` but never undo committed documents, because
//! vectors are a rebuildable projection (see `rebuild_vectors`).

pub mod aggregate;

use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::{info, warn};

use profiledb_core::error::{Error, Result};
use profiledb_core::patch::ProfilePatch;
use profiledb_core::traits::{
    AuthDecision, DistanceMetric, DocumentStore, Embedder, IdentityVerifier, VectorIndex,
};
use profiledb_core::types::{
    catalog_key, to_fields, Fields, OnboardOutcome, OnboardingRequest, ProjectRecord, UserProfile,
    WeightedTextGroup, EMBEDDING_DIM,
};

pub const USERS_COLLECTION: &str = "users";
pub const PROJECTS_COLLECTION: &str = "projects";
pub const SKILLS_COLLECTION: &str = "skills";
pub const PREFERENCES_COLLECTION: &str = "preferences";

/// Per-category importance weights for the user vector.
pub const WEIGHT_USER_SKILLS: f32 = 0.6;
pub const WEIGHT_USER_PREFERENCES: f32 = 0.3;
pub const WEIGHT_USER_PROJECT_TITLES: f32 = 0.1;

/// Per-category importance weights for a project vector.
pub const WEIGHT_PROJECT_TECH_STACK: f32 = 0.7;
pub const WEIGHT_PROJECT_REQUIREMENTS: f32 = 0.3;

/// Progress marker for one request, used in structured logs. Reaching
/// `DocumentsCommitted` is what makes a request successful; the vector
/// stages only decide `vectors_indexed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Validated,
    DocumentsCommitted,
    VectorsUpserted,
    Complete,
}

/// Counts from one `rebuild_vectors` run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RebuildReport {
    pub users: usize,
    pub projects: usize,
    pub skipped: usize,
}

pub struct OnboardingOrchestrator<DS, VI>
where
    DS: DocumentStore,
    VI: VectorIndex,
{
    docs: DS,
    index: VI,
    embedder: Box<dyn Embedder>,
    verifier: Box<dyn IdentityVerifier>,
}

impl<DS, VI> OnboardingOrchestrator<DS, VI>
where
    DS: DocumentStore,
    VI: VectorIndex,
{
    pub fn new(
        docs: DS,
        index: VI,
        embedder: Box<dyn Embedder>,
        verifier: Box<dyn IdentityVerifier>,
    ) -> Self {
        Self {
            docs,
            index,
            embedder,
            verifier,
        }
    }

    pub fn document_store(&self) -> &DS {
        &self.docs
    }

    pub fn vector_index(&self) -> &VI {
        &self.index
    }

    /// Create the vector collections if absent. Run once at startup.
    pub async fn ensure_collections(&self) -> Result<()> {
        self.index
            .ensure_collection(USERS_COLLECTION, EMBEDDING_DIM, DistanceMetric::Cosine)
            .await?;
        self.index
            .ensure_collection(PROJECTS_COLLECTION, EMBEDDING_DIM, DistanceMetric::Cosine)
            .await
    }

    /// Run one submission through the full pipeline.
    pub async fn onboard(
        &self,
        session: Option<&str>,
        request: &OnboardingRequest,
    ) -> Result<OnboardOutcome> {
        info!(stage = ?PipelineStage::Received, "submission received");
        let uid = self.resolve_identity(session).await?;
        validate(request)?;
        info!(%uid, stage = ?PipelineStage::Validated, "submission validated");

        self.commit_documents(&uid, request).await?;
        info!(%uid, stage = ?PipelineStage::DocumentsCommitted, "documents committed");

        let vectors_indexed = match self.upsert_vectors(&uid, request).await {
            Ok(()) => {
                info!(%uid, stage = ?PipelineStage::VectorsUpserted, "vectors upserted");
                true
            }
            Err(e) => {
                warn!(%uid, error = %e, "vector phase failed; documents remain committed");
                false
            }
        };

        info!(%uid, stage = ?PipelineStage::Complete, vectors_indexed, "onboarding complete");
        Ok(OnboardOutcome {
            message: "onboarding complete".to_string(),
            uid,
            vectors_indexed,
        })
    }

    /// Read back a stored profile; `None` when the user never onboarded.
    pub async fn fetch_profile(&self, uid: &str) -> Result<Option<UserProfile>> {
        let Some(fields) = self.docs.get(USERS_COLLECTION, uid).await? else {
            return Ok(None);
        };
        serde_json::from_value(Value::Object(fields))
            .map(Some)
            .map_err(|e| Error::StoreUnavailable(format!("corrupt user document {uid}: {e}")))
    }

    /// Recompute and re-upsert every entity vector from the stored
    /// documents. This is the recovery path after `vectors_indexed = false`
    /// outcomes or an index wipe.
    pub async fn rebuild_vectors(&self) -> Result<RebuildReport> {
        self.ensure_collections().await?;
        let mut report = RebuildReport::default();

        for (uid, fields) in self.docs.scan(USERS_COLLECTION).await? {
            let profile: UserProfile = match serde_json::from_value(Value::Object(fields)) {
                Ok(profile) => profile,
                Err(e) => {
                    warn!(%uid, error = %e, "skipping corrupt user document");
                    report.skipped += 1;
                    continue;
                }
            };
            let group = user_text_group(
                profile.skills.iter().map(String::as_str),
                profile.preferences.iter().map(String::as_str),
                profile.projects.values().map(|p| p.title.as_str()),
            );
            let Some(vector) = aggregate::aggregate(self.embedder.as_ref(), &group)? else {
                report.skipped += 1;
                continue;
            };
            let project_ids: Vec<&str> = profile.projects.keys().map(String::as_str).collect();
            let payload = json!({
                "name": profile.name,
                "email": profile.email,
                "skills": profile.skills,
                "preferences": profile.preferences,
                "project_ids": project_ids,
            });
            self.index
                .upsert(USERS_COLLECTION, &uid, &vector, &payload)
                .await?;
            report.users += 1;
        }

        for (id, fields) in self.docs.scan(PROJECTS_COLLECTION).await? {
            let record: ProjectRecord = match serde_json::from_value(Value::Object(fields)) {
                Ok(record) => record,
                Err(e) => {
                    warn!(project_id = %id, error = %e, "skipping corrupt project document");
                    report.skipped += 1;
                    continue;
                }
            };
            let group = project_text_group(
                record.tech_stack.iter().map(String::as_str),
                record.requirements.iter().map(String::as_str),
            );
            let Some(vector) = aggregate::aggregate(self.embedder.as_ref(), &group)? else {
                report.skipped += 1;
                continue;
            };
            let payload = json!({
                "title": record.title,
                "description": record.description,
                "tech_stack": record.tech_stack,
                "requirements": record.requirements,
            });
            self.index
                .upsert(PROJECTS_COLLECTION, &id, &vector, &payload)
                .await?;
            report.projects += 1;
        }

        Ok(report)
    }

    async fn resolve_identity(&self, session: Option<&str>) -> Result<String> {
        let token =
            session.ok_or_else(|| Error::Unauthenticated("missing session token".to_string()))?;
        match self.verifier.verify_session(token).await? {
            AuthDecision::Verified { uid } => Ok(uid),
            AuthDecision::Denied { reason } => Err(Error::Unauthenticated(reason)),
        }
    }

    /// Write the user profile and every catalog/project document, one
    /// atomic batch per category. Any failure aborts the request before
    /// vector work starts.
    async fn commit_documents(&self, uid: &str, request: &OnboardingRequest) -> Result<()> {
        let projects = request.projects.as_ref().map(|projects| {
            projects
                .iter()
                .map(|(id, submission)| {
                    (id.clone(), ProjectRecord::from_submission(submission, uid))
                })
                .collect::<BTreeMap<_, _>>()
        });
        let patch = ProfilePatch {
            name: Some(request.name.clone()),
            email: Some(request.email.clone()),
            onboarded: Some(true),
            photo_url: request.photo_url.clone(),
            skills: request.skills.clone(),
            preferences: request.preferences.clone(),
            projects: projects.clone(),
        };
        let mut user_batch = self.docs.batch();
        user_batch.set_merge(USERS_COLLECTION, uid, patch.into_fields());
        self.docs.commit_batch(user_batch).await?;

        for (collection, names) in [
            (SKILLS_COLLECTION, request.skills.as_deref()),
            (PREFERENCES_COLLECTION, request.preferences.as_deref()),
        ] {
            let Some(names) = names else { continue };
            let mut batch = self.docs.batch();
            for raw in names {
                let key = catalog_key(raw);
                if key.is_empty() {
                    continue;
                }
                let mut fields = Fields::new();
                fields.insert("name".to_string(), json!(raw));
                batch.set_merge(collection, &key, fields);
            }
            if !batch.is_empty() {
                self.docs.commit_batch(batch).await?;
            }
        }

        if let Some(projects) = projects {
            let mut batch = self.docs.batch();
            for (id, record) in &projects {
                batch.set_merge(PROJECTS_COLLECTION, id, to_fields(record));
            }
            if !batch.is_empty() {
                self.docs.commit_batch(batch).await?;
            }
        }
        Ok(())
    }

    /// Derive and upsert the user and project vectors. Entities whose text
    /// group is empty are skipped without an upsert.
    async fn upsert_vectors(&self, uid: &str, request: &OnboardingRequest) -> Result<()> {
        let skills = request.skills.as_deref().unwrap_or_default();
        let preferences = request.preferences.as_deref().unwrap_or_default();

        let group = user_text_group(
            skills.iter().map(String::as_str),
            preferences.iter().map(String::as_str),
            request
                .projects
                .iter()
                .flat_map(|projects| projects.values().map(|p| p.title.as_str())),
        );
        if let Some(vector) = aggregate::aggregate(self.embedder.as_ref(), &group)? {
            let project_ids: Vec<&String> = request
                .projects
                .iter()
                .flat_map(|projects| projects.keys())
                .collect();
            let payload = json!({
                "name": request.name,
                "email": request.email,
                "skills": skills,
                "preferences": preferences,
                "project_ids": project_ids,
            });
            self.index
                .upsert(USERS_COLLECTION, uid, &vector, &payload)
                .await?;
        }

        if let Some(projects) = &request.projects {
            for (id, project) in projects {
                let group = project_text_group(
                    project.tech_stack.iter().map(String::as_str),
                    project.requirements.iter().map(String::as_str),
                );
                let Some(vector) = aggregate::aggregate(self.embedder.as_ref(), &group)? else {
                    continue;
                };
                let payload = json!({
                    "title": project.title,
                    "description": project.description,
                    "tech_stack": project.tech_stack,
                    "requirements": project.requirements,
                });
                self.index
                    .upsert(PROJECTS_COLLECTION, id, &vector, &payload)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Weighted text group for a user vector: skills, preferences, then the
/// titles of the submitted projects.
pub fn user_text_group<'a>(
    skills: impl IntoIterator<Item = &'a str>,
    preferences: impl IntoIterator<Item = &'a str>,
    project_titles: impl IntoIterator<Item = &'a str>,
) -> WeightedTextGroup {
    let mut group = WeightedTextGroup::new();
    group.push_all(skills, WEIGHT_USER_SKILLS);
    group.push_all(preferences, WEIGHT_USER_PREFERENCES);
    group.push_all(project_titles, WEIGHT_USER_PROJECT_TITLES);
    group
}

/// Weighted text group for a project vector: tech stack, then requirements.
pub fn project_text_group<'a>(
    tech_stack: impl IntoIterator<Item = &'a str>,
    requirements: impl IntoIterator<Item = &'a str>,
) -> WeightedTextGroup {
    let mut group = WeightedTextGroup::new();
    group.push_all(tech_stack, WEIGHT_PROJECT_TECH_STACK);
    group.push_all(requirements, WEIGHT_PROJECT_REQUIREMENTS);
    group
}

fn validate(request: &OnboardingRequest) -> Result<()> {
    if request.name.trim().is_empty() {
        return Err(Error::InvalidInput("name must not be empty".to_string()));
    }
    let email = request.email.trim();
    if email.is_empty() {
        return Err(Error::InvalidInput("email must not be empty".to_string()));
    }
    if !email.contains('@') {
        return Err(Error::InvalidInput(format!("implausible email: {email}")));
    }
    if let Some(projects) = &request.projects {
        for (id, project) in projects {
            if id.trim().is_empty() {
                return Err(Error::InvalidInput(
                    "project id must not be empty".to_string(),
                ));
            }
            if project.title.trim().is_empty() {
                return Err(Error::InvalidInput(format!(
                    "project '{id}' must have a title"
                )));
            }
        }
    }
    Ok(())
}
