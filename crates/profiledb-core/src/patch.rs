//! Explicit partial-update record for the user profile document.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::types::{to_fields, Fields, ProjectId, ProjectRecord};

/// Field-presence patch merged into `users/{uid}`.
///
/// `None` means "leave the stored value alone": the field is omitted from
/// the produced merge map entirely, which is exactly what the store's
/// shallow merge needs to not touch it. There is no way to clear a field
/// through a patch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onboarded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projects: Option<BTreeMap<ProjectId, ProjectRecord>>,
}

impl ProfilePatch {
    pub fn into_fields(self) -> Fields {
        to_fields(&self)
    }
}
