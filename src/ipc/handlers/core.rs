use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::refdb::RefDbRegistry;
use serde_json::json;
use std::path::PathBuf;

const DEFAULT_REFDB: &str = "ClassicModels";

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            // The default reference database is a workspace setting so an
            // instructor can repoint it without recreating the workspace.
            let default_id = db::settings_get_json(&conn, "refdb.default")
                .ok()
                .flatten()
                .and_then(|v| v.as_str().map(|s| s.to_string()))
                .unwrap_or_else(|| DEFAULT_REFDB.to_string());

            let registry = RefDbRegistry::new(path.join("refdbs"), default_id);
            if let Err(e) = registry.ensure_dir() {
                return err(&req.id, "workspace_init_failed", format!("{e:?}"), None);
            }

            log::info!("workspace selected: {}", path.to_string_lossy());
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            state.refdbs = Some(registry);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
