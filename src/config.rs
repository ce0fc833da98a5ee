// Copyright 2022 Paolo Galeone <nessuno@nerdz.eu>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::string::String;
use url::Url;

use std::fmt;

use tokio::fs;

use crate::batch::BatchConfig;
use crate::iterator::OpenErrorPolicy;

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_PART_SIZE: usize = 10 * 1024 * 1024;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialsMode {
    /// The default AWS provider chain: environment, profile, instance role.
    #[default]
    Chain,
    Static,
    Profile,
    Instance,
    Environment,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AwsConfig {
    pub region: Option<String>,
    #[serde(default)]
    pub credentials: CredentialsMode,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub profile: Option<String>,
    pub endpoint: Option<Url>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LocalhostConfig {
    pub path: String,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_part_size() -> usize {
    DEFAULT_PART_SIZE
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadConfig {
    pub base_dir: String,
    pub r#where: String,
    #[serde(default)]
    pub destination_prefix: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub stop_on_first_error: bool,
    #[serde(default = "default_part_size")]
    pub part_size_hint_bytes: usize,
    #[serde(default)]
    pub on_open_error: OpenErrorPolicy,
    #[serde(default)]
    pub verify: bool,
}

#[derive(Serialize, Deserialize)]
pub struct Config {
    // remotes
    pub aws: Option<HashMap<String, AwsConfig>>,
    pub localhost: Option<HashMap<String, LocalhostConfig>>,
    // what goes where
    #[serde(default)]
    pub upload: HashMap<String, UploadConfig>,
}

#[derive(Debug)]
pub enum Error {
    Open(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl std::error::Error for Error {}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Open(error) => write!(f, "Could not open/read config: {}", error),
            Error::Parse(error) => write!(f, "Failed to parse config: {}", error),
            Error::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Open(error)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Parse(error)
    }
}

impl UploadConfig {
    pub fn validate(&self, name: &str) -> Result<(), Error> {
        if self.concurrency < 1 {
            return Err(Error::Invalid(format!(
                "upload {}: concurrency must be at least 1",
                name
            )));
        }
        if self.part_size_hint_bytes == 0 {
            return Err(Error::Invalid(format!(
                "upload {}: part_size_hint_bytes must be positive",
                name
            )));
        }
        if self.base_dir.trim().is_empty() {
            return Err(Error::Invalid(format!("upload {}: empty base_dir", name)));
        }
        let remote = match self.r#where.split_once('.') {
            Some(("aws", remote)) | Some(("localhost", remote)) => remote,
            _ => "",
        };
        if remote.is_empty() {
            return Err(Error::Invalid(format!(
                "upload {}: where = \"{}\" must be aws.<bucket> or localhost.<name>",
                name, self.r#where
            )));
        }
        Ok(())
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            base_dir: PathBuf::from(shellexpand::tilde(&self.base_dir).as_ref()),
            destination_prefix: self.destination_prefix.clone(),
            concurrency: self.concurrency,
            stop_on_first_error: self.stop_on_first_error,
            part_size_hint_bytes: self.part_size_hint_bytes,
            on_open_error: self.on_open_error,
        }
    }
}

impl Config {
    pub async fn new(path: &Path) -> Result<Config, Error> {
        let txt = fs::read_to_string(path).await?;
        Config::parse(&txt)
    }

    pub fn parse(txt: &str) -> Result<Config, Error> {
        let config: Config = toml::from_str(txt)?;
        for (name, upload) in &config.upload {
            upload.validate(name)?;
            if !config.has_remote(&upload.r#where) {
                return Err(Error::Invalid(format!(
                    "upload {}: {} is not a configured remote",
                    name, upload.r#where
                )));
            }
        }
        Ok(config)
    }

    /// Whether `target` (`aws.<bucket>` or `localhost.<name>`) names a
    /// section of this configuration.
    pub fn has_remote(&self, target: &str) -> bool {
        match target.split_once('.') {
            Some(("aws", bucket)) => self
                .aws
                .as_ref()
                .map_or(false, |aws| aws.contains_key(bucket)),
            Some(("localhost", name)) => self
                .localhost
                .as_ref()
                .map_or(false, |localhost| localhost.contains_key(name)),
            _ => false,
        }
    }
}
