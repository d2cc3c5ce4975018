use crate::api::{AspectRatio, GenerationParams, OutputFormat, Resolution};
use crate::error::ValidationError;
use crate::store::{
    load_json, save_json, KeyValueStore, QuotaExceeded, SaveError, CREDENTIAL_KEY, PREFS_KEY,
};
use serde::{Deserialize, Serialize};

/// Last used form values, restored as defaults on the next run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationPrefs {
    pub count: u8,
    pub aspect_ratio: AspectRatio,
    pub resolution: Resolution,
    pub output_format: OutputFormat,
    pub prompt: String,
}

impl Default for GenerationPrefs {
    fn default() -> Self {
        Self {
            count: 1,
            aspect_ratio: AspectRatio::default(),
            resolution: Resolution::default(),
            output_format: OutputFormat::default(),
            prompt: String::new(),
        }
    }
}

impl GenerationPrefs {
    pub fn load<S: KeyValueStore + ?Sized>(store: &S) -> Self {
        load_json(store, PREFS_KEY).unwrap_or_default()
    }

    pub fn save<S: KeyValueStore + ?Sized>(&self, store: &mut S) -> Result<(), SaveError> {
        save_json(store, PREFS_KEY, self)
    }

    pub fn to_params(&self) -> GenerationParams {
        GenerationParams {
            prompt: self.prompt.trim().to_string(),
            count: self.count,
            aspect_ratio: self.aspect_ratio,
            resolution: self.resolution,
            output_format: self.output_format,
            image_urls: Vec::new(),
        }
    }
}

/// Trimmed credential, rejected when empty or not pure ASCII (it is sent in
/// an HTTP header).
pub fn validate_credential(raw: &str) -> Result<String, ValidationError> {
    let key = raw.trim();
    if key.is_empty() {
        return Err(ValidationError::MissingCredential);
    }
    if !key.is_ascii() {
        return Err(ValidationError::NonAsciiCredential);
    }
    Ok(key.to_string())
}

pub fn load_credential<S: KeyValueStore + ?Sized>(store: &S) -> Option<String> {
    store
        .get(CREDENTIAL_KEY)
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    Invalid(ValidationError),
    NotSaved(QuotaExceeded),
}

impl std::fmt::Display for CredentialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialError::Invalid(err) => write!(f, "{err}"),
            CredentialError::NotSaved(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CredentialError {}

/// The credential is stored as a raw string, not JSON, matching how it is
/// read back by [`load_credential`].
pub fn save_credential<S: KeyValueStore + ?Sized>(
    store: &mut S,
    raw: &str,
) -> Result<String, CredentialError> {
    let key = validate_credential(raw).map_err(CredentialError::Invalid)?;
    store
        .set(CREDENTIAL_KEY, &key)
        .map_err(CredentialError::NotSaved)?;
    Ok(key)
}

pub fn delete_credential<S: KeyValueStore + ?Sized>(store: &mut S) {
    store.remove(CREDENTIAL_KEY);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn credential_validation() {
        assert_eq!(validate_credential("  abc:123 "), Ok("abc:123".into()));
        assert_eq!(validate_credential("   "), Err(ValidationError::MissingCredential));
        assert_eq!(
            validate_credential("キー"),
            Err(ValidationError::NonAsciiCredential)
        );
    }

    #[test]
    fn credential_save_load_delete() {
        let mut store = MemoryStore::new();
        assert_eq!(load_credential(&store), None);
        save_credential(&mut store, " key-1 ").unwrap();
        assert_eq!(load_credential(&store).as_deref(), Some("key-1"));
        delete_credential(&mut store);
        assert_eq!(load_credential(&store), None);
    }

    #[test]
    fn prefs_tolerate_partial_documents() {
        let mut store = MemoryStore::new();
        store.set(PREFS_KEY, r#"{"count":3,"aspect_ratio":"16:9"}"#).unwrap();
        let prefs = GenerationPrefs::load(&store);
        assert_eq!(prefs.count, 3);
        assert_eq!(prefs.aspect_ratio, AspectRatio::Widescreen);
        assert_eq!(prefs.output_format, OutputFormat::Jpeg);
        assert_eq!(prefs.to_params().count, 3);
    }
}
