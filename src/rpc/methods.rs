//! RPC method handlers.

use std::path::PathBuf;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::AppContext;
use crate::core::spawn_export;
use crate::settings::{ExportItemPatch, SettingsError, SettingsStore};

use super::protocol::{Request, Response};

/// Summary returned by `daemon.status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub active_jobs: usize,
    pub rules: usize,
    pub target_directory: PathBuf,
    pub settings_path: PathBuf,
    pub simulation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStarted {
    pub job_id: String,
}

#[derive(Deserialize)]
struct IndexParams {
    index: usize,
}

#[derive(Deserialize)]
struct UpdateParams {
    index: usize,
    #[serde(flatten)]
    patch: ExportItemPatch,
}

#[derive(Deserialize)]
struct TargetParams {
    path: PathBuf,
}

#[derive(Deserialize)]
struct IdParams {
    id: String,
}

#[derive(Deserialize, Default)]
struct LimitParams {
    #[serde(default)]
    limit: Option<usize>,
}

/// Dispatches JSON-RPC calls against the shared daemon state.
pub struct MethodHandler {
    ctx: AppContext,
    start_time: Instant,
}

impl MethodHandler {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            start_time: Instant::now(),
        }
    }

    pub async fn handle(&self, request: Request) -> Response {
        let id = request.id.clone().unwrap_or(Value::Null);
        let params = request.params.unwrap_or(Value::Null);

        match request.method.as_str() {
            "daemon.status" => self.daemon_status(id).await,
            "settings.get" => Response::success(id, self.ctx.settings.snapshot()),
            "rules.add" => self.edit_settings(id, |s| s.add_default_rule()).await,
            "rules.remove" => match parse::<IndexParams>(params) {
                Ok(p) => self.edit_settings(id, move |s| s.remove_rule(p.index)).await,
                Err(e) => Response::invalid_params(id, e),
            },
            "rules.update" => match parse::<UpdateParams>(params) {
                Ok(p) => {
                    self.edit_settings(id, move |s| s.update_rule(p.index, p.patch))
                        .await
                }
                Err(e) => Response::invalid_params(id, e),
            },
            "target.set" => match parse::<TargetParams>(params) {
                Ok(p) => {
                    self.edit_settings(id, move |s| s.set_target_directory(p.path))
                        .await
                }
                Err(e) => Response::invalid_params(id, e),
            },
            "drives.state" => Response::success(id, self.ctx.drives.read().await.clone()),
            "export.run" => match parse::<IndexParams>(params) {
                Ok(p) => self.export_run(id, p.index),
                Err(e) => Response::invalid_params(id, e),
            },
            "progress.active" => Response::success(id, self.ctx.progress.active().await),
            "progress.get" => match parse::<IdParams>(params) {
                Ok(p) => match self.ctx.progress.get(&p.id).await {
                    Some(job) => Response::success(id, job),
                    None => Response::not_found(id, format!("Unknown job: {}", p.id)),
                },
                Err(e) => Response::invalid_params(id, e),
            },
            "jobs.recent" => Response::success(id, self.ctx.progress.recent().await),
            "log.recent" => {
                let limit = parse::<LimitParams>(params).unwrap_or_default().limit;
                Response::success(id, self.ctx.activity.recent(limit.unwrap_or(20)))
            }
            _ => Response::method_not_found(id, &request.method),
        }
    }

    async fn daemon_status(&self, id: Value) -> Response {
        let settings = self.ctx.settings.snapshot();

        Response::success(
            id,
            DaemonStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_secs: self.start_time.elapsed().as_secs(),
                active_jobs: self.ctx.progress.active_count().await,
                rules: settings.export_items.len(),
                target_directory: settings.target_directory,
                settings_path: self.ctx.settings.path().to_path_buf(),
                simulation: self.ctx.config.simulation,
            },
        )
    }

    /// Edits write the settings file, so they run on the blocking pool.
    async fn edit_settings<T, F>(&self, id: Value, f: F) -> Response
    where
        T: Serialize + Send + 'static,
        F: FnOnce(&SettingsStore) -> Result<T, SettingsError> + Send + 'static,
    {
        let store = self.ctx.settings.clone();
        match tokio::task::spawn_blocking(move || f(&store)).await {
            Ok(result) => settings_result(id, result),
            Err(e) => Response::internal_error(id, e.to_string()),
        }
    }

    /// Manual trigger: runs the rule whether or not it is automatic.
    fn export_run(&self, id: Value, index: usize) -> Response {
        match self.ctx.settings.rule(index) {
            Ok(rule) => {
                if !self.ctx.fs.drive_exists(&rule.drive_name) {
                    return Response::not_found(
                        id,
                        format!("Drive {} is not attached", rule.drive_name),
                    );
                }
                let job_id = spawn_export(&self.ctx, rule);
                Response::success(id, JobStarted { job_id })
            }
            Err(e) => settings_error(id, e),
        }
    }
}

/// Null params decode like an empty object.
fn parse<T: DeserializeOwned>(params: Value) -> Result<T, String> {
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| e.to_string())
}

fn settings_result<T: Serialize>(id: Value, result: Result<T, SettingsError>) -> Response {
    match result {
        Ok(value) => Response::success(id, value),
        Err(e) => settings_error(id, e),
    }
}

fn settings_error(id: Value, error: SettingsError) -> Response {
    match error {
        SettingsError::NoSuchRule(_) => Response::not_found(id, error.to_string()),
        _ => Response::internal_error(id, error.to_string()),
    }
}
