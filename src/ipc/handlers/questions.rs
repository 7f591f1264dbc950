use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_questions_list_by_topic(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let topic_id = match req.params.get("topicId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing topicId", None),
    };
    let user_id = req
        .params
        .get("userId")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let topic = conn
        .query_row(
            "SELECT name, type, database FROM topics WHERE id = ?",
            [&topic_id],
            |r| {
                Ok(json!({
                    "id": topic_id.clone(),
                    "name": r.get::<_, String>(0)?,
                    "type": r.get::<_, String>(1)?,
                    "database": r.get::<_, String>(2)?
                }))
            },
        )
        .optional();
    let topic = match topic {
        Ok(Some(t)) => t,
        Ok(None) => return err(&req.id, "not_found", "topic not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT q.id, q.question_number, q.question_text,
                (SELECT COUNT(*) FROM completions c
                  WHERE c.question_id = q.id AND c.user_id = ?) AS completed
         FROM questions q
         WHERE q.topic_id = ?
         ORDER BY q.question_number",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((&user_id, &topic_id), |row| {
            let id: String = row.get(0)?;
            let number: i64 = row.get(1)?;
            let text: String = row.get(2)?;
            let completed: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "questionNumber": number,
                "questionText": text,
                "completed": completed > 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(questions) => ok(&req.id, json!({ "topic": topic, "questions": questions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_questions_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let question_id = match req.params.get("questionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing questionId", None),
    };

    let row = conn
        .query_row(
            "SELECT q.question_number, q.question_text, q.solution,
                    t.id, t.name, t.type, t.database
             FROM questions q JOIN topics t ON t.id = q.topic_id
             WHERE q.id = ?",
            [&question_id],
            |r| {
                Ok(json!({
                    "id": question_id.clone(),
                    "questionNumber": r.get::<_, i64>(0)?,
                    "questionText": r.get::<_, String>(1)?,
                    "solution": r.get::<_, Option<String>>(2)?,
                    "topic": {
                        "id": r.get::<_, String>(3)?,
                        "name": r.get::<_, String>(4)?,
                        "type": r.get::<_, String>(5)?,
                        "database": r.get::<_, String>(6)?
                    }
                }))
            },
        )
        .optional();

    match row {
        Ok(Some(question)) => ok(&req.id, json!({ "question": question })),
        Ok(None) => err(&req.id, "not_found", "question not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_questions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let topic_id = match req.params.get("topicId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing topicId", None),
    };
    let number = match req.params.get("questionNumber").and_then(|v| v.as_i64()) {
        Some(v) if v > 0 => v,
        _ => return err(&req.id, "bad_params", "questionNumber must be a positive integer", None),
    };
    let text = match req.params.get("questionText").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing questionText", None),
    };
    let solution = req
        .params
        .get("solution")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let topic_exists = conn
        .query_row("SELECT 1 FROM topics WHERE id = ?", [&topic_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional();
    match topic_exists {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "topic not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let question_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let inserted = conn.execute(
        "INSERT INTO questions(id, topic_id, question_number, question_text, solution,
                               created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (&question_id, &topic_id, number, &text, &solution, &now, &now),
    );
    match inserted {
        Ok(_) => ok(&req.id, json!({ "questionId": question_id })),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            err(
                &req.id,
                "conflict",
                "this topic already has a question with that number",
                None,
            )
        }
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_questions_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let question_id = match req.params.get("questionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing questionId", None),
    };
    let patch = req.params.get("patch").cloned().unwrap_or(json!({}));

    let mut sets: Vec<String> = Vec::new();
    let mut args: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(text) = patch.get("questionText").and_then(|v| v.as_str()) {
        sets.push("question_text = ?".to_string());
        args.push(text.to_string().into());
    }
    if let Some(sol) = patch.get("solution") {
        sets.push("solution = ?".to_string());
        match sol.as_str() {
            Some(s) if !s.trim().is_empty() => args.push(s.trim().to_string().into()),
            _ => args.push(rusqlite::types::Value::Null),
        }
    }
    if let Some(n) = patch.get("questionNumber").and_then(|v| v.as_i64()) {
        sets.push("question_number = ?".to_string());
        args.push(n.into());
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "empty patch", None);
    }
    sets.push("updated_at = ?".to_string());
    args.push(chrono::Utc::now().to_rfc3339().into());
    args.push(question_id.clone().into());

    let sql = format!("UPDATE questions SET {} WHERE id = ?", sets.join(", "));
    match conn.execute(&sql, rusqlite::params_from_iter(args)) {
        Ok(0) => err(&req.id, "not_found", "question not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_questions_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let question_id = match req.params.get("questionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing questionId", None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for sql in [
        "DELETE FROM completions WHERE question_id = ?",
        "DELETE FROM questions WHERE id = ?",
    ] {
        if let Err(e) = tx.execute(sql, [&question_id]) {
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
        "questions.listByTopic" => Some(handle_questions_list_by_topic(state, req)),
        "questions.get" => Some(handle_questions_get(state, req)),
        "questions.create" => Some(handle_questions_create(state, req)),
        "questions.update" => Some(handle_questions_update(state, req)),
        "questions.delete" => Some(handle_questions_delete(state, req)),
        _ => None,
    }
}
