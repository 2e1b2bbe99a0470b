//! Parameter resolution.
//!
//! Merges explicit caller parameters, an optional parameter file and
//! generated defaults into [`PlanMetadata`]. Precedence is explicit, then
//! file, then generated. Resolution itself performs no I/O.

use std::collections::BTreeMap;
use std::path::Path;

use lifecycle_types::{PlanIntent, PlanMetadata};
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};

/// Length of a generated resource token.
pub const TOKEN_LENGTH: usize = 13;

const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const MAX_ENVIRONMENT_NAME: usize = 64;

// Well-known parameter file names.
const ENVIRONMENT_NAME: &str = "environmentName";
const LOCATION: &str = "location";
const RESOURCE_GROUP: &str = "resourceGroupName";
const RESOURCE_TOKEN: &str = "resourceToken";

/// Parameters supplied directly by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExplicitParameters {
    pub environment_name: Option<String>,
    pub location: Option<String>,
    pub resource_group: Option<String>,
    pub resource_token: Option<String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ParameterDocument {
    #[serde(default)]
    parameters: BTreeMap<String, ParameterEntry>,
}

#[derive(Debug, Deserialize)]
struct ParameterEntry {
    #[serde(default)]
    value: serde_json::Value,
}

/// Values read from a parameter file with a flat `parameters.<name>.value` shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterFile {
    values: BTreeMap<String, serde_json::Value>,
}

impl ParameterFile {
    /// Parse a JSON parameter document.
    pub fn parse(contents: &str) -> Result<Self> {
        let document: ParameterDocument = serde_json::from_str(contents)?;
        let values = document
            .parameters
            .into_iter()
            .filter(|(_, entry)| !is_unset(&entry.value))
            .map(|(name, entry)| (name, entry.value))
            .collect();
        Ok(Self { values })
    }

    /// Read and parse `path`.
    pub async fn read(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        Self::parse(&contents)
    }

    /// Read `path`, falling back to an empty file on any error.
    pub async fn load_or_empty(path: &Path) -> Self {
        match Self::read(path).await {
            Ok(file) => {
                debug!(path = %path.display(), parameters = file.values.len(), "Loaded parameter file");
                file
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Parameter file unusable; continuing with explicit parameters and defaults"
                );
                Self::default()
            }
        }
    }

    pub fn from_values(values: BTreeMap<String, serde_json::Value>) -> Self {
        Self { values }
    }

    /// Record of resolved metadata, so later runs reuse the same names.
    pub fn from_metadata(metadata: &PlanMetadata) -> Self {
        let mut values = metadata.parameters.clone();
        for (name, value) in [
            (ENVIRONMENT_NAME, &metadata.environment_name),
            (LOCATION, &metadata.location),
            (RESOURCE_GROUP, &metadata.resource_group),
            (RESOURCE_TOKEN, &metadata.resource_token),
        ] {
            values.insert(name.to_string(), serde_json::Value::String(value.clone()));
        }
        Self { values }
    }

    /// Values of `self`, with gaps filled from `fallback`.
    pub fn or(mut self, fallback: ParameterFile) -> Self {
        for (name, value) in fallback.values {
            self.values.entry(name).or_insert(value);
        }
        self
    }

    /// Environment name, when the file names one.
    pub fn environment_name(&self) -> Option<String> {
        self.get_str(ENVIRONMENT_NAME)
    }

    /// Render back to the `parameters.<name>.value` shape.
    pub fn to_document(&self) -> serde_json::Value {
        let parameters: serde_json::Map<String, serde_json::Value> = self
            .values
            .iter()
            .map(|(name, value)| (name.clone(), serde_json::json!({ "value": value })))
            .collect();
        serde_json::json!({ "parameters": parameters })
    }

    /// Write the document to `path`, creating parent directories.
    pub async fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let contents = serde_json::to_string_pretty(&self.to_document())?;
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    /// String value of a parameter, if present and non-empty.
    pub fn get_str(&self, name: &str) -> Option<String> {
        match self.values.get(name)? {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// Unsubstituted `${VAR}` placeholders and nulls count as not supplied.
fn is_unset(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.starts_with("${") && s.ends_with('}'),
        _ => false,
    }
}

/// Resolves plan metadata from the three parameter sources.
#[derive(Debug, Clone, Default)]
pub struct ParameterResolver {
    explicit: ExplicitParameters,
    file: ParameterFile,
}

impl ParameterResolver {
    pub fn new(explicit: ExplicitParameters) -> Self {
        Self {
            explicit,
            file: ParameterFile::default(),
        }
    }

    pub fn with_file(mut self, file: ParameterFile) -> Self {
        self.file = file;
        self
    }

    /// Resolve using the thread-local generator for the token.
    pub fn resolve(&self, intent: PlanIntent) -> Result<PlanMetadata> {
        self.resolve_with_rng(intent, &mut rand::thread_rng())
    }

    /// Resolve with an explicit random source.
    pub fn resolve_with_rng<R: Rng + ?Sized>(
        &self,
        intent: PlanIntent,
        rng: &mut R,
    ) -> Result<PlanMetadata> {
        let environment_name = self
            .pick(&self.explicit.environment_name, ENVIRONMENT_NAME)
            .ok_or_else(|| {
                OrchestratorError::Configuration(
                    "environment name is required (--environment-name or parameter file)".into(),
                )
            })?;
        validate_environment_name(&environment_name)?;

        let location = self.pick(&self.explicit.location, LOCATION).ok_or_else(|| {
            OrchestratorError::Configuration(
                "location is required (--location or parameter file)".into(),
            )
        })?;

        let resource_group = self
            .pick(&self.explicit.resource_group, RESOURCE_GROUP)
            .unwrap_or_else(|| format!("rg-{}", environment_name));

        let resource_token = self
            .pick(&self.explicit.resource_token, RESOURCE_TOKEN)
            .unwrap_or_else(|| generate_token(rng, TOKEN_LENGTH));

        let mut metadata = PlanMetadata::new(
            environment_name.clone(),
            location,
            resource_group,
            resource_token,
            intent,
        );
        metadata
            .tags
            .insert("environment".to_string(), environment_name);
        metadata.tags.extend(self.explicit.tags.clone());

        for (name, value) in &self.file.values {
            if ![ENVIRONMENT_NAME, LOCATION, RESOURCE_GROUP, RESOURCE_TOKEN].contains(&name.as_str())
            {
                metadata.parameters.insert(name.clone(), value.clone());
            }
        }

        debug!(
            environment = %metadata.environment_name,
            location = %metadata.location,
            resource_group = %metadata.resource_group,
            "Resolved plan metadata"
        );
        Ok(metadata)
    }

    fn pick(&self, explicit: &Option<String>, file_key: &str) -> Option<String> {
        explicit
            .as_ref()
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .or_else(|| self.file.get_str(file_key))
    }
}

/// Random lowercase alphanumeric token.
pub fn generate_token<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

fn validate_environment_name(name: &str) -> Result<()> {
    if name.len() > MAX_ENVIRONMENT_NAME {
        return Err(OrchestratorError::Configuration(format!(
            "environment name must be at most {} characters",
            MAX_ENVIRONMENT_NAME
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(OrchestratorError::Configuration(format!(
            "environment name '{}' may only contain lowercase letters, digits and '-'",
            name
        )));
    }
    Ok(())
}
