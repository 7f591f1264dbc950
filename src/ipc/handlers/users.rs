use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

const ROLES: [&str; 3] = ["admin", "instructor", "student"];

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "users": [] }));
    };
    let role_filter = req
        .params
        .get("role")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let mut stmt = match conn.prepare(
        "SELECT
           u.id, u.email, u.first_name, u.last_name, u.code, u.role,
           u.course_section, u.academic_year, u.semester, u.active,
           (SELECT COUNT(*) FROM completions c WHERE c.user_id = u.id) AS completed_count
         FROM users u
         WHERE (? = '' OR u.role = ?)
         ORDER BY u.last_name, u.first_name, u.email",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((&role_filter, &role_filter), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "email": row.get::<_, String>(1)?,
                "firstName": row.get::<_, Option<String>>(2)?,
                "lastName": row.get::<_, Option<String>>(3)?,
                "code": row.get::<_, Option<String>>(4)?,
                "role": row.get::<_, String>(5)?,
                "courseSection": row.get::<_, Option<String>>(6)?,
                "academicYear": row.get::<_, Option<String>>(7)?,
                "semester": row.get::<_, Option<String>>(8)?,
                "active": row.get::<_, i64>(9)? != 0,
                "completedCount": row.get::<_, i64>(10)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let email = match req.params.get("email").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_lowercase(),
        None => return err(&req.id, "bad_params", "missing email", None),
    };
    if email.is_empty() || !email.contains('@') {
        return err(&req.id, "bad_params", "email is not valid", None);
    }

    let role = req
        .params
        .get("role")
        .and_then(|v| v.as_str())
        .unwrap_or("student");
    if !ROLES.contains(&role) {
        return err(
            &req.id,
            "bad_params",
            "role must be admin, instructor, or student",
            None,
        );
    }

    let get_opt = |key: &str| -> Option<String> {
        req.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let user_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let inserted = conn.execute(
        "INSERT INTO users(id, email, first_name, last_name, code, role,
                           instructor_code, associated_instructor_id,
                           academic_year, semester, course_section,
                           active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        rusqlite::params![
            user_id,
            email,
            get_opt("firstName"),
            get_opt("lastName"),
            get_opt("code"),
            role,
            get_opt("instructorCode"),
            get_opt("associatedInstructorId"),
            get_opt("academicYear"),
            get_opt("semester"),
            get_opt("courseSection"),
            now,
            now,
        ],
    );
    match inserted {
        Ok(_) => ok(&req.id, json!({ "userId": user_id })),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            err(&req.id, "conflict", "email already exists", None)
        }
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_users_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match req.params.get("userId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing userId", None),
    };
    let patch = req.params.get("patch").cloned().unwrap_or(json!({}));

    let text_fields = [
        ("firstName", "first_name"),
        ("lastName", "last_name"),
        ("code", "code"),
        ("instructorCode", "instructor_code"),
        ("associatedInstructorId", "associated_instructor_id"),
        ("academicYear", "academic_year"),
        ("semester", "semester"),
        ("courseSection", "course_section"),
    ];

    let mut sets: Vec<String> = Vec::new();
    let mut args: Vec<rusqlite::types::Value> = Vec::new();

    if let Some(role) = patch.get("role").and_then(|v| v.as_str()) {
        if !ROLES.contains(&role) {
            return err(
                &req.id,
                "bad_params",
                "role must be admin, instructor, or student",
                None,
            );
        }
        sets.push("role = ?".to_string());
        args.push(role.to_string().into());
    }
    for (key, column) in text_fields {
        if let Some(v) = patch.get(key) {
            sets.push(format!("{} = ?", column));
            match v.as_str() {
                Some(s) if !s.trim().is_empty() => args.push(s.trim().to_string().into()),
                _ => args.push(rusqlite::types::Value::Null),
            }
        }
    }
    if let Some(active) = patch.get("active").and_then(|v| v.as_bool()) {
        sets.push("active = ?".to_string());
        args.push((active as i64).into());
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "empty patch", None);
    }
    sets.push("updated_at = ?".to_string());
    args.push(chrono::Utc::now().to_rfc3339().into());
    args.push(user_id.clone().into());

    let sql = format!("UPDATE users SET {} WHERE id = ?", sets.join(", "));
    match conn.execute(&sql, rusqlite::params_from_iter(args)) {
        Ok(0) => err(&req.id, "not_found", "user not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_users_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match req.params.get("userId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing userId", None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for sql in [
        "DELETE FROM completions WHERE user_id = ?",
        "DELETE FROM course_sections WHERE instructor_id = ?",
        "UPDATE users SET associated_instructor_id = NULL WHERE associated_instructor_id = ?",
        "DELETE FROM users WHERE id = ?",
    ] {
        if let Err(e) = tx.execute(sql, [&user_id]) {
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
        "users.list" => Some(handle_users_list(state, req)),
        "users.create" => Some(handle_users_create(state, req)),
        "users.update" => Some(handle_users_update(state, req)),
        "users.delete" => Some(handle_users_delete(state, req)),
        _ => None,
    }
}
