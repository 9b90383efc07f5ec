//! Manual point adjustments keyed by member email.
//!
//! Admins record these outside the sign-in sheet; the engine only reads
//! them. The document is a JSON object mapping email to
//! `{"adjustment": <signed int>, "reason": "..."}`.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::error::EngineResult;
use crate::models::ManualOverride;

pub type ManualOverrides = HashMap<String, ManualOverride>;

pub fn load_overrides(path: &Path) -> EngineResult<ManualOverrides> {
    let text = std::fs::read_to_string(path)?;
    parse_overrides(&text)
}

pub fn parse_overrides(text: &str) -> EngineResult<ManualOverrides> {
    let raw: HashMap<String, ManualOverride> = serde_json::from_str(text)?;
    let overrides: ManualOverrides = raw
        .into_iter()
        .map(|(email, entry)| (email.trim().to_lowercase(), entry))
        .collect();
    debug!(count = overrides.len(), "loaded manual overrides");
    Ok(overrides)
}
