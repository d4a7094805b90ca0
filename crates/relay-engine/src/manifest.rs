//! Tool manifests and argument validation.
//!
//! A manifest is validated when built: tool names must be unique and every
//! `inputSchema` must compile. The global manifest is injected at start; a
//! browser may register a session-specific one under `manifest:{code}`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use relay_core::{FieldError, RelayError, SessionCode, ToolDefinition};
use relay_store::{SharedStore, StoreExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

/// API version served by the manifest endpoints.
pub const API_VERSION: &str = "1.0.0";

/// Every API version a client may request via `Accept-Version`.
pub const SUPPORTED_API_VERSIONS: &[&str] = &[API_VERSION];

/// Version of the built-in tool catalog.
pub const TOOL_MANIFEST_VERSION: &str = "1.0.0";

/// Store key for a session-specific manifest.
pub fn manifest_key(code: &SessionCode) -> String {
    format!("manifest:{code}")
}

/// Serialized manifest body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDocument {
    /// API version of the response.
    pub api_version: String,
    /// Version of the tool catalog.
    pub tool_manifest_version: String,
    /// Tool definitions.
    pub tools: Vec<ToolDefinition>,
}

/// Immutable tool lookup table with compiled argument validators.
pub struct ToolManifest {
    version: String,
    tools: Vec<ToolDefinition>,
    validators: HashMap<String, jsonschema::Validator>,
}

impl std::fmt::Debug for ToolManifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolManifest")
            .field("version", &self.version)
            .field("tools", &self.tools.iter().map(|t| &t.name).collect::<Vec<_>>())
            .finish()
    }
}

impl ToolManifest {
    /// Build and validate a manifest.
    pub fn new(version: impl Into<String>, tools: Vec<ToolDefinition>) -> Result<Self, RelayError> {
        let mut errors = Vec::new();
        let mut validators = HashMap::with_capacity(tools.len());

        for (idx, tool) in tools.iter().enumerate() {
            if tool.name.trim().is_empty() {
                errors.push(FieldError {
                    field: format!("tools[{idx}].name"),
                    message: "must not be empty".into(),
                });
                continue;
            }
            if validators.contains_key(&tool.name) {
                errors.push(FieldError {
                    field: format!("tools[{idx}].name"),
                    message: format!("duplicate tool name '{}'", tool.name),
                });
                continue;
            }
            match jsonschema::options().build(&tool.input_schema) {
                Ok(validator) => {
                    let _ = validators.insert(tool.name.clone(), validator);
                }
                Err(e) => errors.push(FieldError {
                    field: format!("tools[{idx}].inputSchema"),
                    message: format!("invalid schema for '{}': {e}", tool.name),
                }),
            }
        }

        if !errors.is_empty() {
            return Err(RelayError::invalid_fields(errors));
        }
        Ok(Self { version: version.into(), tools, validators })
    }

    /// Catalog version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Tool definitions in registration order.
    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Look up one tool.
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Reject unknown tools and arguments that violate the tool's schema.
    /// Every violation is reported.
    pub fn validate_arguments(&self, name: &str, arguments: &Value) -> Result<(), RelayError> {
        let Some(validator) = self.validators.get(name) else {
            return Err(RelayError::invalid_field("name", format!("unknown tool '{name}'")));
        };
        let errors: Vec<FieldError> = validator
            .iter_errors(arguments)
            .map(|e| {
                let path = e.instance_path.to_string();
                FieldError {
                    field: format!("arguments{path}"),
                    message: e.to_string(),
                }
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RelayError::invalid_fields(errors))
        }
    }

    /// Wire body for `apiVersion`.
    pub fn document(&self, api_version: &str) -> ManifestDocument {
        ManifestDocument {
            api_version: api_version.to_owned(),
            tool_manifest_version: self.version.clone(),
            tools: self.tools.clone(),
        }
    }
}

/// Whether a client-requested API version is served.
pub fn negotiate_api_version(requested: Option<&str>) -> Result<&'static str, String> {
    match requested.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(API_VERSION),
        Some(v) => SUPPORTED_API_VERSIONS
            .iter()
            .copied()
            .find(|s| *s == v)
            .ok_or_else(|| v.to_owned()),
    }
}

/// Global manifest plus session-specific overrides held in the store.
#[derive(Clone)]
pub struct ManifestRegistry {
    global: Arc<ToolManifest>,
    store: SharedStore,
}

impl ManifestRegistry {
    /// Registry with `global` as the fallback manifest.
    pub fn new(global: ToolManifest, store: SharedStore) -> Self {
        Self { global: Arc::new(global), store }
    }

    /// The global manifest.
    pub fn global(&self) -> Arc<ToolManifest> {
        Arc::clone(&self.global)
    }

    /// Register a session-specific manifest for `ttl`.
    #[instrument(skip(self, doc), fields(session_code = %code))]
    pub async fn register(
        &self,
        code: &SessionCode,
        doc: &ManifestDocument,
        ttl: Duration,
    ) -> Result<Arc<ToolManifest>, RelayError> {
        let manifest = ToolManifest::new(doc.tool_manifest_version.clone(), doc.tools.clone())?;
        self.store.set_as(&manifest_key(code), doc, ttl).await?;
        debug!(tools = manifest.tools().len(), "session manifest registered");
        Ok(Arc::new(manifest))
    }

    /// Manifest in force for a session.
    pub async fn for_session(&self, code: &SessionCode) -> Result<Arc<ToolManifest>, RelayError> {
        match self.store.get_as::<ManifestDocument>(&manifest_key(code)).await? {
            Some(doc) => Ok(Arc::new(ToolManifest::new(doc.tool_manifest_version, doc.tools)?)),
            None => Ok(self.global()),
        }
    }
}

/// Built-in catalog for the data-analysis plugin.
pub fn default_catalog() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "echo".into(),
            description: "Return the given text unchanged. Useful to check the browser link.".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "create_dataset".into(),
            description: "Create a dataset in the open document, optionally with initial rows.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "minLength": 1 },
                    "title": { "type": "string" },
                    "attributes": {
                        "type": "array",
                        "minItems": 1,
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": { "type": "string", "minLength": 1 },
                                "type": { "enum": ["numeric", "categorical", "date", "boundary", "color"] },
                                "unit": { "type": "string" },
                                "description": { "type": "string" }
                            },
                            "required": ["name"]
                        }
                    },
                    "records": { "type": "array", "items": { "type": "object" } }
                },
                "required": ["name", "attributes"]
            }),
        },
        ToolDefinition {
            name: "list_datasets".into(),
            description: "List the datasets in the open document.".into(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
    ]
}

/// The built-in catalog as a manifest.
pub fn default_manifest() -> Result<ToolManifest, RelayError> {
    ToolManifest::new(TOOL_MANIFEST_VERSION, default_catalog())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use relay_store::MemoryStore;

    fn tool(name: &str, schema: Value) -> ToolDefinition {
        ToolDefinition { name: name.into(), description: String::new(), input_schema: schema }
    }

    #[test]
    fn default_catalog_is_valid() {
        let m = default_manifest().unwrap();
        assert_eq!(m.tools().len(), 3);
        assert!(m.get("create_dataset").is_some());
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = ToolManifest::new(
            "1",
            vec![tool("a", json!({"type": "object"})), tool("a", json!({"type": "object"}))],
        )
        .unwrap_err();
        assert_eq!(err.field_errors()[0].field, "tools[1].name");
    }

    #[test]
    fn invalid_schema_rejected() {
        let err = ToolManifest::new("1", vec![tool("bad", json!({"type": 12}))]).unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(err.field_errors()[0].field, "tools[0].inputSchema");
    }

    #[test]
    fn unknown_tool_is_validation_error() {
        let m = default_manifest().unwrap();
        let err = m.validate_arguments("delete_everything", &json!({})).unwrap_err();
        assert_eq!(err.field_errors()[0].field, "name");
    }

    #[test]
    fn schema_violations_listed() {
        let m = default_manifest().unwrap();
        assert!(m.validate_arguments("echo", &json!({"text": "hi"})).is_ok());
        let err = m.validate_arguments("echo", &json!({"text": 5, "extra": true})).unwrap_err();
        assert!(err.field_errors().len() >= 2, "{err:?}");
        assert!(err.field_errors().iter().any(|f| f.field == "arguments/text"));
    }

    #[test]
    fn api_version_negotiation() {
        assert_eq!(negotiate_api_version(None), Ok("1.0.0"));
        assert_eq!(negotiate_api_version(Some("1.0.0")), Ok("1.0.0"));
        assert_eq!(negotiate_api_version(Some(" ")), Ok("1.0.0"));
        assert_eq!(negotiate_api_version(Some("2.0.0")), Err("2.0.0".to_string()));
    }

    #[test]
    fn document_shape() {
        let v = serde_json::to_value(default_manifest().unwrap().document(API_VERSION)).unwrap();
        assert_eq!(v["apiVersion"], "1.0.0");
        assert_eq!(v["toolManifestVersion"], TOOL_MANIFEST_VERSION);
        assert!(v["tools"][0]["inputSchema"].is_object());
    }

    #[tokio::test(start_paused = true)]
    async fn session_manifest_overrides_global() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let registry = ManifestRegistry::new(default_manifest().unwrap(), store);
        let code = SessionCode::parse("ABCDEFGH").unwrap();
        assert_eq!(registry.for_session(&code).await.unwrap().tools().len(), 3);

        let doc = ManifestDocument {
            api_version: API_VERSION.into(),
            tool_manifest_version: "custom-1".into(),
            tools: vec![tool("plot", json!({"type": "object"}))],
        };
        let _ = registry.register(&code, &doc, Duration::from_secs(60)).await.unwrap();
        let m = registry.for_session(&code).await.unwrap();
        assert_eq!(m.version(), "custom-1");
        assert!(m.get("plot").is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(registry.for_session(&code).await.unwrap().version(), TOOL_MANIFEST_VERSION);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_session_manifest_not_stored() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let registry = ManifestRegistry::new(default_manifest().unwrap(), store);
        let code = SessionCode::parse("ABCDEFGH").unwrap();
        let doc = ManifestDocument {
            api_version: API_VERSION.into(),
            tool_manifest_version: "x".into(),
            tools: vec![tool("a", json!({})), tool("a", json!({}))],
        };
        assert_matches!(
            registry.register(&code, &doc, Duration::from_secs(60)).await,
            Err(RelayError::Validation { .. })
        );
        assert_eq!(registry.for_session(&code).await.unwrap().version(), TOOL_MANIFEST_VERSION);
    }
}
