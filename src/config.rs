use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};

use crate::{Error, InternalResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SystemConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorConfig {
    /// Verify the configuration after every microstep.
    #[serde(default = "default_true")]
    pub check_legal_configuration: bool,

    /// Upper bound on microsteps within one macrostep.
    #[serde(default = "default_max_microsteps")]
    pub max_microsteps: usize,

    /// Datamodel used when a chart does not name one.
    #[serde(default = "default_datamodel")]
    pub default_datamodel: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            check_legal_configuration: default_true(),
            max_microsteps: default_max_microsteps(),
            default_datamodel: default_datamodel(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatcherConfig {
    #[serde(default = "default_max_delay", with = "duration_ms")]
    pub max_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_delay: default_max_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default = "default_shutdown_timeout", with = "duration_ms")]
    pub shutdown_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> InternalResult<T> {
    let file = File::open(path)
        .map_err(|e| Error::Internal(format!("Failed to open config file: {}", e)))?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| Error::Internal(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> InternalResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| Error::Internal(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

fn default_true() -> bool {
    true
}
fn default_max_microsteps() -> usize {
    1000
}
fn default_datamodel() -> String {
    crate::evaluator::minimal::DATAMODEL_NAME.to_string()
}
fn default_max_delay() -> Duration {
    Duration::from_secs(3600)
}
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl SystemConfig {
    pub fn from_file(path: &str) -> InternalResult<Self> {
        from_file(path)
    }
}
