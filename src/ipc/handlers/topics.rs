use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_topics_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "topics": [] }));
    };
    let user_id = req
        .params
        .get("userId")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    // Correlated subqueries to avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           t.id,
           t.name,
           t.type,
           t.database,
           (SELECT COUNT(*) FROM questions q WHERE q.topic_id = t.id) AS question_count,
           (SELECT COUNT(*) FROM completions c
              JOIN questions q ON q.id = c.question_id
             WHERE q.topic_id = t.id AND c.user_id = ?) AS completed_count
         FROM topics t
         ORDER BY t.sort_order, t.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&user_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let kind: String = row.get(2)?;
            let database: String = row.get(3)?;
            let question_count: i64 = row.get(4)?;
            let completed_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "name": name,
                "type": kind,
                "database": database,
                "questionCount": question_count,
                "completedCount": completed_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(topics) => ok(&req.id, json!({ "topics": topics })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_topics_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let kind = req
        .params
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("sql");
    if kind != "sql" && kind != "data_model" {
        return err(&req.id, "bad_params", "type must be sql or data_model", None);
    }

    let database = req
        .params
        .get("database")
        .and_then(|v| v.as_str())
        .unwrap_or("ClassicModels");

    let topic_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let inserted = conn.execute(
        "INSERT INTO topics(id, name, type, database, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&topic_id, &name, kind, database, &now, &now),
    );
    match inserted {
        Ok(_) => ok(&req.id, json!({ "topicId": topic_id })),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            err(&req.id, "conflict", "a topic with this name already exists", None)
        }
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_topics_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let topic_id = match req.params.get("topicId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing topicId", None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let steps = [
        "DELETE FROM completions WHERE question_id IN
           (SELECT id FROM questions WHERE topic_id = ?)",
        "DELETE FROM questions WHERE topic_id = ?",
        "DELETE FROM topics WHERE id = ?",
    ];
    for sql in steps {
        if let Err(e) = tx.execute(sql, [&topic_id]) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    match tx.commit() {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_commit_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "topics.list" => Some(handle_topics_list(state, req)),
        "topics.create" => Some(handle_topics_create(state, req)),
        "topics.delete" => Some(handle_topics_delete(state, req)),
        _ => None,
    }
}
