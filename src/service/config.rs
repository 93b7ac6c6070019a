// Copyright 2025 jonefeewang@gmail.com
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

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

const ENV_PREFIX: &str = "STONEMQ_CONSUMER";

fn default_true() -> bool {
    true
}
fn default_retry_wait_seconds() -> u64 {
    1
}
fn default_session_timeout_ms() -> u64 {
    10_000
}
fn default_partitions() -> i32 {
    3
}
fn default_seed_messages() -> usize {
    10
}

/// Options of one consumer group member.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ConsumerConfig {
    #[serde(default)]
    pub brokers: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub group: String,
    /// rejoin the group after a coordinator error instead of returning it
    #[serde(default = "default_true")]
    pub retry_on_disconnect: bool,
    #[serde(default = "default_retry_wait_seconds")]
    pub retry_wait_seconds: u64,
    /// appended to the group name to build the metrics prefix
    #[serde(default)]
    pub metrics_prefix_suffix: String,
    /// join the group during init, holding deliveries back until run
    #[serde(default)]
    pub pre_claim_partitions: bool,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
}

impl ConsumerConfig {
    pub fn new(brokers: Vec<String>, topics: Vec<String>, group: impl Into<String>) -> Self {
        Self {
            brokers,
            topics,
            group: group.into(),
            retry_on_disconnect: true,
            retry_wait_seconds: default_retry_wait_seconds(),
            metrics_prefix_suffix: String::new(),
            pre_claim_partitions: false,
            client_id: None,
            session_timeout_ms: default_session_timeout_ms(),
        }
    }

    /// Loads the config from a file, format picked by extension. Environment
    /// variables prefixed with `STONEMQ_CONSUMER_` override file values.
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(Self::env_source(ENV_PREFIX))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Loads the config from environment variables only, e.g.
    /// `<PREFIX>_BROKERS=a:9092,b:9092`.
    pub fn from_env(prefix: &str) -> AppResult<Self> {
        let config = config::Config::builder()
            .add_source(Self::env_source(prefix))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    fn env_source(prefix: &str) -> config::Environment {
        config::Environment::with_prefix(prefix)
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("brokers")
            .with_list_parse_key("topics")
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.brokers.iter().all(|b| b.trim().is_empty()) {
            return Err(AppError::Config("brokers must be set".into()));
        }
        if self.topics.iter().all(|t| t.trim().is_empty()) {
            return Err(AppError::Config("topics must be set".into()));
        }
        if self.group.trim().is_empty() {
            return Err(AppError::Config("group must be set".into()));
        }
        Ok(())
    }

    /// Namespace the consumer's instrumentation is registered under.
    pub fn metrics_prefix(&self) -> String {
        if self.metrics_prefix_suffix.is_empty() {
            self.group.clone()
        } else {
            format!("{}_{}", self.group, self.metrics_prefix_suffix)
        }
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_secs(self.retry_wait_seconds)
    }
}

/// Settings of the in-process cluster the demo binary consumes from.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    #[serde(default = "default_partitions")]
    pub partitions: i32,
    #[serde(default = "default_seed_messages")]
    pub seed_messages: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            seed_messages: default_seed_messages(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
}

impl AppConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<AppConfig> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("STONEMQ")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("consumer.brokers")
                    .with_list_parse_key("consumer.topics"),
            )
            .build()?;
        let app_config: AppConfig = config.try_deserialize()?;
        app_config.consumer.validate()?;
        Ok(app_config)
    }
}
