use std::collections::HashMap;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::MigrationError;
use crate::store::ChecksumMode;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    S3,
    Azure,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Settings {
    pub region: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub disable_ssl: bool,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    #[serde(default)]
    pub use_multipart_uploads: bool,
    #[serde(default = "default_checksum_mode")]
    pub checksum_mode: ChecksumModeSetting,
}

fn default_checksum_mode() -> ChecksumModeSetting {
    ChecksumModeSetting::StreamHash
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumModeSetting {
    SinglePartEtag,
    StreamHash,
}

impl From<ChecksumModeSetting> for ChecksumMode {
    fn from(value: ChecksumModeSetting) -> Self {
        match value {
            ChecksumModeSetting::SinglePartEtag => ChecksumMode::SinglePartEtag,
            ChecksumModeSetting::StreamHash => ChecksumMode::StreamHash,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AzureSettings {
    pub account: String,
    pub account_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub blobstore_path: String,

    #[serde(default = "default_concurrent_uploads")]
    pub concurrent_uploads: usize,

    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub bucket_names: HashMap<String, String>,

    pub destination: DestinationKind,
    pub s3: Option<S3Settings>,
    pub azure: Option<AzureSettings>,
}

fn default_concurrent_uploads() -> usize {
    20
}

impl Settings {
    pub fn load(config_path: &str) -> Result<Self, MigrationError> {
        let built = Config::builder()
            .add_source(File::with_name(config_path).required(false))
            .add_source(Environment::with_prefix("MIGRATOR").separator("__"))
            .build()
            .map_err(|e| MigrationError::Configuration(e.to_string()))?;

        let settings: Settings = built.try_deserialize().map_err(|e| MigrationError::Configuration(e.to_string()))?;
        settings.validate()
    }

    pub fn validate(self) -> Result<Self, MigrationError> {
        if self.concurrent_uploads == 0 {
            return Err(MigrationError::Configuration("concurrent_uploads must be at least 1".into()));
        }
        for bucket in &self.exclude {
            if !crate::blob::LOGICAL_BUCKETS.contains(&bucket.as_str()) {
                return Err(MigrationError::Configuration(format!("unknown logical bucket in exclude list: {bucket}")));
            }
        }
        match self.destination {
            DestinationKind::S3 if self.s3.is_none() => {
                return Err(MigrationError::Configuration("destination = s3 requires an [s3] section".into()))
            }
            DestinationKind::Azure if self.azure.is_none() => {
                return Err(MigrationError::Configuration("destination = azure requires an [azure] section".into()))
            }
            _ => {}
        }
        Ok(self)
    }
}
