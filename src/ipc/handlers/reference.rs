use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::reference;
use serde_json::json;
use std::path::PathBuf;

fn handle_reference_import_topics(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(refdbs)) = (state.db.as_ref(), state.refdbs.as_ref()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let dir = match req.params.get("dir").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => return err(&req.id, "bad_params", "missing dir", None),
    };
    if !dir.is_dir() {
        return err(
            &req.id,
            "bad_params",
            format!("not a directory: {}", dir.to_string_lossy()),
            None,
        );
    }

    match reference::import_reference_dir(conn, refdbs, &dir) {
        Ok(summary) => match serde_json::to_value(&summary) {
            Ok(v) => ok(&req.id, v),
            Err(e) => err(&req.id, "serialize_failed", e.to_string(), None),
        },
        Err(e) => err(&req.id, "import_failed", format!("{e:?}"), None),
    }
}

fn handle_refdb_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(refdbs) = state.refdbs.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match refdbs.list() {
        Ok(databases) => ok(
            &req.id,
            json!({
                "databases": databases,
                "default": refdbs.default_id()
            }),
        ),
        Err(e) => err(&req.id, "refdb_list_failed", format!("{e:?}"), None),
    }
}

fn handle_refdb_load_script(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(refdbs) = state.refdbs.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let database = match req.params.get("database").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing database", None),
    };
    let path = match req.params.get("path").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => return err(&req.id, "bad_params", "missing path", None),
    };

    let script = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("failed to read {}: {}", path.to_string_lossy(), e),
                None,
            )
        }
    };

    match refdbs.load_script(&database, &script) {
        Ok(name) => {
            log::info!("loaded script into reference database {}", name);
            ok(&req.id, json!({ "database": name }))
        }
        Err(e) => err(&req.id, "refdb_load_failed", format!("{e:?}"), None),
    }
}

fn handle_refdb_set_default(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(refdbs)) = (state.db.as_ref(), state.refdbs.as_ref()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let database = match req.params.get("database").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing database", None),
    };

    if let Err(e) = crate::db::settings_set_json(conn, "refdb.default", &json!(database)) {
        return err(&req.id, "db_update_failed", format!("{e:?}"), None);
    }
    let dir = refdbs.dir().to_path_buf();
    state.refdbs = Some(crate::refdb::RefDbRegistry::new(dir, database.clone()));
    ok(&req.id, json!({ "default": database }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reference.importTopics" => Some(handle_reference_import_topics(state, req)),
        "refdb.list" => Some(handle_refdb_list(state, req)),
        "refdb.loadScript" => Some(handle_refdb_load_script(state, req)),
        "refdb.setDefault" => Some(handle_refdb_set_default(state, req)),
        _ => None,
    }
}
