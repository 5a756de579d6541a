//! Experiment tracking
//!
//! [`FileStore`] writes the on-disk layout of an MLflow file tracking store,
//! so runs can be browsed with the usual MLflow tooling:
//!
//! ```text
//! <root>/<experiment_id>/meta.yaml
//! <root>/<experiment_id>/<run_id>/meta.yaml
//! <root>/<experiment_id>/<run_id>/params/<key>
//! <root>/<experiment_id>/<run_id>/metrics/<key>     "<ms> <value> <step>" per line
//! <root>/<experiment_id>/<run_id>/tags/<key>
//! <root>/<experiment_id>/<run_id>/artifacts/<file>
//! ```
//!
//! [`ActiveRun`] owns a started run and ends it FAILED when dropped without
//! [`ActiveRun::finish`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TrackingConfig;
use crate::errors::TrackingError;

/// Id MLflow reserves for the experiment named "Default"
const DEFAULT_EXPERIMENT_ID: &str = "0";
const DEFAULT_EXPERIMENT_NAME: &str = "Default";
const RUN_NAME_TAG: &str = "mlflow.runName";
/// MLflow rejects longer param values
const MAX_PARAM_VALUE_LEN: usize = 6000;
/// `SourceType.LOCAL`
const SOURCE_TYPE_LOCAL: u8 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

impl RunStatus {
    /// MLflow's numeric `RunStatus`
    fn code(self) -> u8 {
        match self {
            Self::Running => 1,
            Self::Finished => 3,
            Self::Failed => 4,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Running),
            3 => Some(Self::Finished),
            4 => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Backend receiving run data
pub trait TrackingStore {
    /// Start a run and return its id
    fn start_run(&mut self, experiment: &str, run_name: &str) -> Result<String, TrackingError>;
    fn log_param(&mut self, run_id: &str, key: &str, value: &str) -> Result<(), TrackingError>;
    fn log_metric(&mut self, run_id: &str, key: &str, value: f64, step: u64) -> Result<(), TrackingError>;
    /// Copy a file into the run's artifacts
    fn log_artifact(&mut self, run_id: &str, path: &Path) -> Result<(), TrackingError>;
    fn end_run(&mut self, run_id: &str, status: RunStatus) -> Result<(), TrackingError>;
}

/// Store used when tracking is disabled
#[derive(Debug, Default)]
pub struct NoopStore;

impl TrackingStore for NoopStore {
    fn start_run(&mut self, _experiment: &str, _run_name: &str) -> Result<String, TrackingError> {
        Ok(Uuid::new_v4().simple().to_string())
    }

    fn log_param(&mut self, _run_id: &str, _key: &str, _value: &str) -> Result<(), TrackingError> {
        Ok(())
    }

    fn log_metric(&mut self, _run_id: &str, _key: &str, _value: f64, _step: u64) -> Result<(), TrackingError> {
        Ok(())
    }

    fn log_artifact(&mut self, _run_id: &str, _path: &Path) -> Result<(), TrackingError> {
        Ok(())
    }

    fn end_run(&mut self, _run_id: &str, _status: RunStatus) -> Result<(), TrackingError> {
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ExperimentMeta {
    artifact_location: String,
    creation_time: i64,
    experiment_id: String,
    last_update_time: i64,
    lifecycle_stage: String,
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RunMeta {
    artifact_uri: String,
    end_time: Option<i64>,
    entry_point_name: String,
    experiment_id: String,
    lifecycle_stage: String,
    run_id: String,
    run_name: String,
    run_uuid: String,
    source_name: String,
    source_type: u8,
    source_version: String,
    start_time: i64,
    status: u8,
    tags: Vec<String>,
    user_id: String,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Keys become file names, so they must stay inside the run directory.
fn check_key(key: &str) -> Result<(), TrackingError> {
    let valid = !key.is_empty()
        && !key.starts_with('/')
        && !key.split('/').any(|part| part == ".." || part.is_empty())
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ' ' | '/'));
    if valid {
        Ok(())
    } else {
        Err(TrackingError::InvalidKey(key.to_string()))
    }
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<(), TrackingError> {
    fs::write(path, serde_yaml::to_string(value)?)?;
    Ok(())
}

fn read_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, TrackingError> {
    Ok(serde_yaml::from_str(&fs::read_to_string(path)?)?)
}

/// MLflow-compatible file store rooted at a local directory
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Accepts a plain path or a `file:` URI
    pub fn new(uri: &str) -> Self {
        let path = uri
            .strip_prefix("file://")
            .or_else(|| uri.strip_prefix("file:"))
            .unwrap_or(uri);
        Self {
            root: PathBuf::from(path),
        }
    }

    /// Directory of an existing run, searched across experiments
    pub fn run_dir(&self, run_id: &str) -> Result<PathBuf, TrackingError> {
        check_key(run_id)?;
        for entry in fs::read_dir(&self.root)? {
            let candidate = entry?.path().join(run_id);
            if candidate.join("meta.yaml").is_file() {
                return Ok(candidate);
            }
        }
        Err(TrackingError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("run {run_id} not found under {}", self.root.display()),
        )))
    }

    /// Status recorded in a run's `meta.yaml`
    pub fn run_status(&self, run_id: &str) -> Result<Option<RunStatus>, TrackingError> {
        let meta: RunMeta = read_yaml(&self.run_dir(run_id)?.join("meta.yaml"))?;
        Ok(RunStatus::from_code(meta.status))
    }

    fn experiment_id(&self, name: &str) -> Result<String, TrackingError> {
        fs::create_dir_all(&self.root)?;

        let mut next_id = 1u64;
        for entry in fs::read_dir(&self.root)? {
            let dir = entry?.path();
            let meta_path = dir.join("meta.yaml");
            if !meta_path.is_file() {
                continue;
            }
            let meta: ExperimentMeta = read_yaml(&meta_path)?;
            if meta.name == name && meta.lifecycle_stage == "active" {
                return Ok(meta.experiment_id);
            }
            if let Ok(id) = meta.experiment_id.parse::<u64>() {
                next_id = next_id.max(id + 1);
            }
        }

        let id = if name == DEFAULT_EXPERIMENT_NAME && !self.root.join(DEFAULT_EXPERIMENT_ID).exists() {
            DEFAULT_EXPERIMENT_ID.to_string()
        } else {
            next_id.to_string()
        };

        let dir = self.root.join(&id);
        fs::create_dir_all(&dir)?;
        let now = now_millis();
        write_yaml(
            &dir.join("meta.yaml"),
            &ExperimentMeta {
                artifact_location: dir.to_string_lossy().into_owned(),
                creation_time: now,
                experiment_id: id.clone(),
                last_update_time: now,
                lifecycle_stage: "active".to_string(),
                name: name.to_string(),
            },
        )?;
        info!("Created tracking experiment {:?} (id {})", name, id);
        Ok(id)
    }
}

impl TrackingStore for FileStore {
    fn start_run(&mut self, experiment: &str, run_name: &str) -> Result<String, TrackingError> {
        let experiment_id = self.experiment_id(experiment)?;
        let run_id = Uuid::new_v4().simple().to_string();
        let run_dir = self.root.join(&experiment_id).join(&run_id);

        for sub in ["params", "metrics", "tags", "artifacts"] {
            fs::create_dir_all(run_dir.join(sub))?;
        }

        write_yaml(
            &run_dir.join("meta.yaml"),
            &RunMeta {
                artifact_uri: run_dir.join("artifacts").to_string_lossy().into_owned(),
                end_time: None,
                entry_point_name: String::new(),
                experiment_id,
                lifecycle_stage: "active".to_string(),
                run_id: run_id.clone(),
                run_name: run_name.to_string(),
                run_uuid: run_id.clone(),
                source_name: String::new(),
                source_type: SOURCE_TYPE_LOCAL,
                source_version: String::new(),
                start_time: now_millis(),
                status: RunStatus::Running.code(),
                tags: Vec::new(),
                user_id: std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
            },
        )?;
        fs::write(run_dir.join("tags").join(RUN_NAME_TAG), run_name)?;

        Ok(run_id)
    }

    fn log_param(&mut self, run_id: &str, key: &str, value: &str) -> Result<(), TrackingError> {
        check_key(key)?;
        let path = self.run_dir(run_id)?.join("params").join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let value: String = value.chars().take(MAX_PARAM_VALUE_LEN).collect();
        fs::write(path, value)?;
        Ok(())
    }

    fn log_metric(&mut self, run_id: &str, key: &str, value: f64, step: u64) -> Result<(), TrackingError> {
        check_key(key)?;
        let path = self.run_dir(run_id)?.join("metrics").join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{} {} {}", now_millis(), value, step)?;
        Ok(())
    }

    fn log_artifact(&mut self, run_id: &str, path: &Path) -> Result<(), TrackingError> {
        let Some(name) = path.file_name() else {
            return Err(TrackingError::InvalidKey(path.display().to_string()));
        };
        let target = self.run_dir(run_id)?.join("artifacts").join(name);
        fs::copy(path, target)?;
        Ok(())
    }

    fn end_run(&mut self, run_id: &str, status: RunStatus) -> Result<(), TrackingError> {
        let meta_path = self.run_dir(run_id)?.join("meta.yaml");
        let mut meta: RunMeta = read_yaml(&meta_path)?;
        meta.status = status.code();
        meta.end_time = Some(now_millis());
        write_yaml(&meta_path, &meta)
    }
}

/// Store for the configured backend. Only local file stores are supported;
/// anything else is reported and tracking is skipped.
pub fn open_store(config: &TrackingConfig) -> Box<dyn TrackingStore> {
    if !config.enabled {
        debug!("Experiment tracking disabled");
        return Box::new(NoopStore);
    }

    let uri = config.resolved_uri();
    let scheme = uri.split_once("://").map(|(scheme, _)| scheme);
    match scheme {
        None | Some("file") => {
            info!("Tracking runs in {}", uri);
            Box::new(FileStore::new(&uri))
        }
        Some(other) => {
            warn!(
                "Tracking URI scheme {:?} is not supported, skipping experiment tracking",
                other
            );
            Box::new(NoopStore)
        }
    }
}

/// A started run. Dropping it without [`ActiveRun::finish`] ends it FAILED.
pub struct ActiveRun {
    store: Box<dyn TrackingStore>,
    run_id: String,
    ended: bool,
}

impl ActiveRun {
    pub fn start(
        mut store: Box<dyn TrackingStore>,
        experiment: &str,
        run_name: &str,
    ) -> Result<Self, TrackingError> {
        let run_id = store.start_run(experiment, run_name)?;
        info!("Started tracking run {} ({})", run_id, run_name);
        Ok(Self {
            store,
            run_id,
            ended: false,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Log each entry as a param; non-string values are stored as JSON.
    pub fn log_params(&mut self, params: &Map<String, Value>) -> Result<(), TrackingError> {
        for (key, value) in params {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            self.store.log_param(&self.run_id, key, &text)?;
        }
        Ok(())
    }

    pub fn log_metric(&mut self, key: &str, value: f64) -> Result<(), TrackingError> {
        self.log_metric_step(key, value, 0)
    }

    pub fn log_metric_step(&mut self, key: &str, value: f64, step: u64) -> Result<(), TrackingError> {
        self.store.log_metric(&self.run_id, key, value, step)
    }

    pub fn log_artifact(&mut self, path: &Path) -> Result<(), TrackingError> {
        self.store.log_artifact(&self.run_id, path)
    }

    /// End the run FINISHED
    pub fn finish(mut self) -> Result<(), TrackingError> {
        self.ended = true;
        self.store.end_run(&self.run_id, RunStatus::Finished)
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        warn!("Tracking run {} ended without finishing, marking FAILED", self.run_id);
        if let Err(err) = self.store.end_run(&self.run_id, RunStatus::Failed) {
            warn!("Failed to close tracking run {}: {}", self.run_id, err);
        }
    }
}
