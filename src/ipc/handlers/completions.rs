use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn require_user_id(req: &Request) -> Result<String, serde_json::Value> {
    req.params
        .get("userId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", "missing userId", None))
}

fn handle_completions_progress(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match require_user_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT
           t.id,
           t.name,
           t.type,
           (SELECT COUNT(*) FROM questions q WHERE q.topic_id = t.id) AS total,
           (SELECT COUNT(*) FROM completions c
              JOIN questions q ON q.id = c.question_id
             WHERE q.topic_id = t.id AND c.user_id = ?) AS completed
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
            let total: i64 = row.get(3)?;
            let completed: i64 = row.get(4)?;
            Ok((total, completed, json!({
                "topicId": id,
                "name": name,
                "type": kind,
                "totalQuestions": total,
                "completedQuestions": completed
            })))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(entries) => {
            let total: i64 = entries.iter().map(|(t, _, _)| t).sum();
            let completed: i64 = entries.iter().map(|(_, c, _)| c).sum();
            let topics: Vec<_> = entries.into_iter().map(|(_, _, v)| v).collect();
            ok(
                &req.id,
                json!({
                    "topics": topics,
                    "totalQuestions": total,
                    "completedQuestions": completed
                }),
            )
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_completions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match require_user_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT c.question_id, c.completed_at, c.academic_year, c.semester, c.course_section,
                q.question_number, t.id, t.name
         FROM completions c
         JOIN questions q ON q.id = c.question_id
         JOIN topics t ON t.id = q.topic_id
         WHERE c.user_id = ?
         ORDER BY c.completed_at",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&user_id], |row| {
            Ok(json!({
                "questionId": row.get::<_, String>(0)?,
                "completedAt": row.get::<_, String>(1)?,
                "academicYear": row.get::<_, Option<String>>(2)?,
                "semester": row.get::<_, Option<String>>(3)?,
                "courseSection": row.get::<_, Option<String>>(4)?,
                "questionNumber": row.get::<_, i64>(5)?,
                "topicId": row.get::<_, String>(6)?,
                "topicName": row.get::<_, String>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(completions) => ok(&req.id, json!({ "completions": completions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_completions_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match require_user_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let question_id = match req.params.get("questionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing questionId", None),
    };

    match conn.execute(
        "DELETE FROM completions WHERE user_id = ? AND question_id = ?",
        (&user_id, &question_id),
    ) {
        Ok(n) => ok(&req.id, json!({ "deleted": n })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "completions.progress" => Some(handle_completions_progress(state, req)),
        "completions.list" => Some(handle_completions_list(state, req)),
        "completions.delete" => Some(handle_completions_delete(state, req)),
        _ => None,
    }
}
