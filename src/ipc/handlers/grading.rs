use crate::grader;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::refdb::RefDbRegistry;
use crate::term;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

fn get_nonempty_sql(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let sql = get_required_str(params, key)?;
    if sql.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "SQL query is required"));
    }
    Ok(sql)
}

fn sql_execute(
    reg: &RefDbRegistry,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let sql = get_nonempty_sql(params, "sql")?;
    let database = params
        .get("database")
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| reg.default_id())
        .to_string();
    let resolved = reg.resolve(&database);
    let result = reg.execute(&sql, &database);
    Ok(json!({
        "databaseName": resolved,
        "result": result,
    }))
}

fn sql_compare(
    reg: &RefDbRegistry,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_sql = get_nonempty_sql(params, "studentSql")?;
    let solution_sql = get_nonempty_sql(params, "solutionSql")?;
    let database = params
        .get("database")
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| reg.default_id())
        .to_string();
    let outcome = grader::compare_queries(reg, &student_sql, &solution_sql, &database);
    serde_json::to_value(&outcome)
        .map_err(|e| HandlerErr::new("serialize_failed", e.to_string()))
}

struct QuestionRow {
    solution: Option<String>,
    database: String,
}

fn load_question(conn: &Connection, question_id: &str) -> Result<QuestionRow, HandlerErr> {
    conn.query_row(
        "SELECT q.solution, t.database
         FROM questions q JOIN topics t ON t.id = q.topic_id
         WHERE q.id = ?",
        [question_id],
        |r| {
            Ok(QuestionRow {
                solution: r.get(0)?,
                database: r.get(1)?,
            })
        },
    )
    .optional()
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
    .ok_or_else(|| HandlerErr::new("not_found", "question not found"))
}

/// Persist a completion for a correct submission. Idempotent: re-grading a
/// question the user already completed is not an error and changes nothing.
fn record_completion(
    conn: &Connection,
    user_id: &str,
    question_id: &str,
) -> Result<(), HandlerErr> {
    let user: Option<(Option<String>, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT academic_year, semester, course_section FROM users WHERE id = ?",
            [user_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let Some((year, semester, section)) = user else {
        return Err(HandlerErr::new("not_found", "user not found"));
    };

    let completed_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO completions(id, user_id, question_id, completed_at,
                                 academic_year, semester, course_section)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(user_id, question_id) DO NOTHING",
        (
            Uuid::new_v4().to_string(),
            user_id,
            question_id,
            completed_at,
            year.unwrap_or_else(term::current_academic_year),
            semester.unwrap_or_else(|| term::current_semester().to_string()),
            section,
        ),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(())
}

fn questions_execute(
    conn: &Connection,
    reg: &RefDbRegistry,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let question_id = get_required_str(params, "questionId")?;
    let user_id = get_required_str(params, "userId")?;
    let sql = get_nonempty_sql(params, "sql")?;

    let question = load_question(conn, &question_id)?;
    let database = reg.resolve(&question.database);

    let result = reg.execute(&sql, &database);

    let mut comparison = None;
    let mut is_completed = false;

    if result.success {
        if let Some(solution_sql) = question.solution.as_deref() {
            let solution_result = reg.execute(solution_sql, &database);
            let outcome =
                grader::compare_results(&sql, solution_sql, result.clone(), solution_result);
            if outcome.is_correct {
                record_completion(conn, &user_id, &question_id)?;
                is_completed = true;
            }
            comparison = Some(outcome);
        }
    }

    let mut execution_result = serde_json::to_value(&result)
        .map_err(|e| HandlerErr::new("serialize_failed", e.to_string()))?;
    execution_result["solution"] = json!(question.solution);

    Ok(json!({
        "executionResult": execution_result,
        "comparison": comparison,
        "databaseName": database,
        "isCompleted": is_completed,
    }))
}

fn with_refdbs<'a>(state: &'a AppState) -> Result<&'a RefDbRegistry, HandlerErr> {
    state
        .refdbs
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn with_db<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sql.execute" => Some(match with_refdbs(state) {
            Ok(reg) => match sql_execute(reg, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(e) => e.response(&req.id),
            },
            Err(e) => e.response(&req.id),
        }),
        "sql.compare" => Some(match with_refdbs(state) {
            Ok(reg) => match sql_compare(reg, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(e) => e.response(&req.id),
            },
            Err(e) => e.response(&req.id),
        }),
        "questions.execute" => Some(
            match (with_db(state), with_refdbs(state)) {
                (Ok(conn), Ok(reg)) => match questions_execute(conn, reg, &req.params) {
                    Ok(result) => ok(&req.id, result),
                    Err(e) => e.response(&req.id),
                },
                (Err(e), _) | (_, Err(e)) => e.response(&req.id),
            },
        ),
        _ => None,
    }
}
