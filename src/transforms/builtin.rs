//! Steps shipped with the binary, one group per release line.
//!
//! Ids are persisted in the checkpoint ledger: never rename one.

use super::{CreateIndexStep, PutMappingStep, ScriptUpdateStep, reindex_steps};
use crate::core::Result;
use crate::step::MigrationStep;
use serde_json::{Value, json};
use std::sync::Arc;

const DEFAULT_SCOPE_SCRIPT: &str = r#"
// sessions created before scopes existed belong to the system scope
if (ctx._source.scope == null) {
    ctx._source.scope = params.set.scope;
}
"#;

const PROFILE_REINDEX_SCRIPT: &str = r#"
/* systemProperties.mergedWith moved to the top level */
if (ctx._source.systemProperties != null && ctx._source.systemProperties.mergedWith != null) {
    ctx._source.mergedWith = ctx._source.systemProperties.remove('mergedWith');
}
"#;

const DEFAULT_TENANT_SCRIPT: &str = r#"
// documents written before multi-tenancy belong to the system tenant
ctx._source.tenantId = params.set.tenantId;
"#;

fn profile_alias_mappings() -> Value {
    json!({
        "dynamic_templates": [
            { "all": { "match": "*", "match_mapping_type": "string", "mapping": { "type": "keyword" } } }
        ],
        "properties": {
            "itemId": { "type": "keyword" },
            "profileID": { "type": "keyword" },
            "clientID": { "type": "keyword" },
            "creationTime": { "type": "date" },
            "modifiedTime": { "type": "date" }
        }
    })
}

fn profile_mappings() -> Value {
    json!({
        "dynamic_templates": [
            { "all": { "match": "*", "match_mapping_type": "string", "mapping": { "type": "keyword" } } }
        ],
        "properties": {
            "itemId": { "type": "keyword" },
            "mergedWith": { "type": "keyword" },
            "properties": {
                "properties": {
                    "firstVisit": { "type": "date" },
                    "lastVisit": { "type": "date" },
                    "previousVisit": { "type": "date" },
                    "nbOfVisits": { "type": "long" }
                }
            },
            "systemProperties": {
                "properties": {
                    "lastUpdated": { "type": "date" }
                }
            }
        }
    })
}

fn missing(field: &str) -> Value {
    json!({ "bool": { "must_not": { "exists": { "field": field } } } })
}

pub fn builtin_steps() -> Result<Vec<Arc<dyn MigrationStep>>> {
    let mut steps: Vec<Arc<dyn MigrationStep>> = Vec::new();

    steps.push(Arc::new(
        CreateIndexStep::new(
            "2.0.0-create-profilealias-index",
            "2.0.0",
            "profilealias",
            profile_alias_mappings(),
        )?
        .with_sequence(0),
    ));
    steps.push(Arc::new(
        ScriptUpdateStep::new(
            "2.0.0-session-default-scope",
            "2.0.0",
            "session",
            missing("scope"),
            DEFAULT_SCOPE_SCRIPT,
        )?
        .with_sequence(1)
        .with_params(json!({ "set": { "scope": "systemscope" } })),
    ));

    steps.extend(reindex_steps(
        "2.0.0-reindex-profile",
        "2.0.0",
        10,
        "profile",
        profile_mappings(),
        Some(PROFILE_REINDEX_SCRIPT),
        false,
    )?);

    steps.push(Arc::new(PutMappingStep::new(
        "2.2.0-event-flattened-properties",
        "2.2.0",
        "event",
        json!({ "properties": { "flattenedProperties": { "type": "flattened" } } }),
    )?));

    steps.push(Arc::new(
        ScriptUpdateStep::new(
            "3.0.0-profile-default-tenant",
            "3.0.0",
            "profile",
            missing("tenantId"),
            DEFAULT_TENANT_SCRIPT,
        )?
        .with_params(json!({ "set": { "tenantId": "system" } })),
    ));

    Ok(steps)
}
