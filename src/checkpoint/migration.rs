//! Forward-only schema migration for checkpoint documents.
//!
//! Migrations operate on raw `serde_json::Value` so old documents never have
//! to deserialize into the current `Session` shape. Each step upgrades exactly
//! one version and is guarded by field presence, so running it twice is a
//! no-op.

use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::CURRENT_VERSION;

/// One step: upgrade a document from version `n` to `n + 1`.
pub type MigrationStep = fn(&mut Value) -> Result<(), String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub from: u32,
    pub to: u32,
    /// Target version reached (or document was already current).
    pub complete: bool,
    /// Document is newer than this build understands.
    pub ahead: bool,
}

pub struct MigrationEngine {
    target: u32,
    steps: BTreeMap<u32, MigrationStep>,
}

impl Default for MigrationEngine {
    fn default() -> Self {
        let mut engine = Self::new(CURRENT_VERSION);
        engine.register(1, v1_to_v2);
        engine.register(2, v2_to_v3);
        engine
    }
}

/// Schema version of a raw document. Documents without one are version 1;
/// versions past `u32::MAX` read as `u32::MAX` so they stay ahead.
pub fn document_version(doc: &Value) -> u32 {
    doc.get("version")
        .and_then(Value::as_u64)
        .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
        .unwrap_or(1)
}

impl MigrationEngine {
    pub fn new(target: u32) -> Self {
        Self {
            target,
            steps: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, from: u32, step: MigrationStep) {
        self.steps.insert(from, step);
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    /// Walk `doc` forward one registered step at a time.
    ///
    /// A missing or failing step stops the walk and pins `version` at the last
    /// value that migrated cleanly. Documents ahead of `target` are left alone.
    pub fn migrate(&self, doc: &mut Value) -> MigrationOutcome {
        let from = document_version(doc);
        if from > self.target {
            warn!(
                version = from,
                supported = self.target,
                "Checkpoint is newer than this shepherd build; loading without migration"
            );
            return MigrationOutcome {
                from,
                to: from,
                complete: false,
                ahead: true,
            };
        }

        let mut version = from;
        while version < self.target {
            let Some(step) = self.steps.get(&version) else {
                warn!(version, target = self.target, "No migration step registered");
                break;
            };
            let mut candidate = doc.clone();
            match step(&mut candidate) {
                Ok(()) => {
                    *doc = candidate;
                    version += 1;
                    debug!(version, "Applied checkpoint migration step");
                }
                Err(reason) => {
                    warn!(version, %reason, "Checkpoint migration step failed");
                    break;
                }
            }
        }

        if let Some(obj) = doc.as_object_mut() {
            obj.insert("version".to_string(), json!(version));
        }

        MigrationOutcome {
            from,
            to: version,
            complete: version == self.target,
            ahead: false,
        }
    }
}

fn phases_object(doc: &mut Value) -> Result<Option<&mut Map<String, Value>>, String> {
    match doc.get_mut("phases") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err("`phases` is not an object".to_string()),
    }
}

/// v1 → v2: tag phase states, rename `processed_comment_ids`, add `skipped_review_streak`.
fn v1_to_v2(doc: &mut Value) -> Result<(), String> {
    if let Some(phases) = phases_object(doc)? {
        for (name, state) in phases.iter_mut() {
            let Some(obj) = state.as_object_mut() else {
                return Err(format!("phase state `{}` is not an object", name));
            };
            obj.entry("phase").or_insert_with(|| json!(name));
            if name == "review_fix"
                && let Some(ids) = obj.remove("processed_comment_ids")
            {
                obj.entry("acknowledged").or_insert(ids);
            }
            if name == "local" {
                obj.entry("skipped_review_streak").or_insert(json!(0));
            }
        }
    }
    Ok(())
}

/// v2 → v3: add `selected_phases` (derived from the phase map) and `errors`.
fn v2_to_v3(doc: &mut Value) -> Result<(), String> {
    let derived: Vec<Value> = match phases_object(doc)? {
        Some(phases) => ["local", "pr", "review_fix"]
            .iter()
            .filter(|p| phases.contains_key(**p))
            .map(|p| json!(p))
            .collect(),
        None => Vec::new(),
    };
    let obj = doc
        .as_object_mut()
        .ok_or_else(|| "checkpoint is not an object".to_string())?;
    obj.entry("selected_phases")
        .or_insert_with(|| Value::Array(derived));
    obj.entry("errors").or_insert_with(|| json!([]));
    Ok(())
}
