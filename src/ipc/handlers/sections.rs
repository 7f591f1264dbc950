use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::term;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_sections_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "sections": [] }));
    };
    let instructor_filter = req
        .params
        .get("instructorId")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.instructor_id, s.course_code, s.course_name, s.section_code,
                s.academic_year, s.semester, s.is_active,
                u.first_name, u.last_name, u.email
         FROM course_sections s
         JOIN users u ON u.id = s.instructor_id
         WHERE (? = '' OR s.instructor_id = ?)
         ORDER BY s.academic_year DESC, s.semester, s.course_code, s.section_code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((&instructor_filter, &instructor_filter), |row| {
            let course_code: String = row.get(2)?;
            let section_code: String = row.get(4)?;
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "instructorId": row.get::<_, String>(1)?,
                "courseCode": course_code.clone(),
                "courseName": row.get::<_, String>(3)?,
                "sectionCode": section_code.clone(),
                "sectionIdentifier": format!("{}-{}", course_code, section_code),
                "academicYear": row.get::<_, String>(5)?,
                "semester": row.get::<_, String>(6)?,
                "isActive": row.get::<_, i64>(7)? != 0,
                "instructorName": format!(
                    "{} {}",
                    row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(9)?.unwrap_or_default()
                ).trim().to_string(),
                "instructorEmail": row.get::<_, String>(10)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(sections) => ok(&req.id, json!({ "sections": sections })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_sections_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let p = &req.params;
    let required = |key: &str| -> Option<String> {
        p.get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    let Some(instructor_id) = required("instructorId") else {
        return err(&req.id, "bad_params", "missing instructorId", None);
    };
    let Some(course_code) = required("courseCode") else {
        return err(&req.id, "bad_params", "missing courseCode", None);
    };
    let Some(course_name) = required("courseName") else {
        return err(&req.id, "bad_params", "missing courseName", None);
    };
    let Some(section_code) = required("sectionCode") else {
        return err(&req.id, "bad_params", "missing sectionCode", None);
    };
    let academic_year = required("academicYear").unwrap_or_else(term::current_academic_year);
    let semester = required("semester").unwrap_or_else(|| term::current_semester().to_string());
    if !term::valid_semester(&semester) {
        return err(
            &req.id,
            "bad_params",
            "semester must be Fall, Spring, Summer, or Winter",
            None,
        );
    }

    let role: Option<String> = match conn
        .query_row("SELECT role FROM users WHERE id = ?", [&instructor_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match role.as_deref() {
        Some("instructor") | Some("admin") => {}
        Some(_) => return err(&req.id, "bad_params", "user is not an instructor", None),
        None => return err(&req.id, "not_found", "instructor not found", None),
    }

    let section_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let inserted = conn.execute(
        "INSERT INTO course_sections(id, instructor_id, course_code, course_name,
                                     section_code, academic_year, semester,
                                     is_active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        rusqlite::params![
            section_id,
            instructor_id,
            course_code,
            course_name,
            section_code,
            academic_year,
            semester,
            now,
            now,
        ],
    );
    match inserted {
        Ok(_) => ok(&req.id, json!({ "sectionId": section_id })),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            err(
                &req.id,
                "conflict",
                "this section already exists for the instructor and term",
                None,
            )
        }
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_sections_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let section_id = match req.params.get("sectionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing sectionId", None),
    };
    let patch = req.params.get("patch").cloned().unwrap_or(json!({}));

    let mut sets: Vec<String> = Vec::new();
    let mut args: Vec<rusqlite::types::Value> = Vec::new();
    for (key, column) in [
        ("courseCode", "course_code"),
        ("courseName", "course_name"),
        ("sectionCode", "section_code"),
        ("academicYear", "academic_year"),
    ] {
        if let Some(v) = patch.get(key).and_then(|v| v.as_str()) {
            let v = v.trim();
            if v.is_empty() {
                return err(&req.id, "bad_params", format!("{} must not be empty", key), None);
            }
            sets.push(format!("{} = ?", column));
            args.push(v.to_string().into());
        }
    }
    if let Some(sem) = patch.get("semester").and_then(|v| v.as_str()) {
        if !term::valid_semester(sem) {
            return err(
                &req.id,
                "bad_params",
                "semester must be Fall, Spring, Summer, or Winter",
                None,
            );
        }
        sets.push("semester = ?".to_string());
        args.push(sem.to_string().into());
    }
    if let Some(active) = patch.get("isActive").and_then(|v| v.as_bool()) {
        sets.push("is_active = ?".to_string());
        args.push((active as i64).into());
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "empty patch", None);
    }
    sets.push("updated_at = ?".to_string());
    args.push(chrono::Utc::now().to_rfc3339().into());
    args.push(section_id.clone().into());

    let sql = format!("UPDATE course_sections SET {} WHERE id = ?", sets.join(", "));
    match conn.execute(&sql, rusqlite::params_from_iter(args)) {
        Ok(0) => err(&req.id, "not_found", "section not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_sections_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let section_id = match req.params.get("sectionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing sectionId", None),
    };
    match conn.execute("DELETE FROM course_sections WHERE id = ?", [&section_id]) {
        Ok(0) => err(&req.id, "not_found", "section not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_sections_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let instructor_id = match req.params.get("instructorId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing instructorId", None),
    };
    let section_filter = req
        .params
        .get("courseSection")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let mut stmt = match conn.prepare(
        "SELECT u.id, u.email, u.first_name, u.last_name, u.code, u.course_section,
                u.academic_year, u.semester,
                (SELECT COUNT(*) FROM completions c WHERE c.user_id = u.id) AS completed_count
         FROM users u
         WHERE u.role = 'student'
           AND u.associated_instructor_id = ?
           AND (? = '' OR u.course_section = ?)
         ORDER BY u.last_name, u.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((&instructor_id, &section_filter, &section_filter), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "email": row.get::<_, String>(1)?,
                "firstName": row.get::<_, Option<String>>(2)?,
                "lastName": row.get::<_, Option<String>>(3)?,
                "code": row.get::<_, Option<String>>(4)?,
                "courseSection": row.get::<_, Option<String>>(5)?,
                "academicYear": row.get::<_, Option<String>>(6)?,
                "semester": row.get::<_, Option<String>>(7)?,
                "completedCount": row.get::<_, i64>(8)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_sections_progress(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let section_id = match req.params.get("sectionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing sectionId", None),
    };

    let section = conn
        .query_row(
            "SELECT instructor_id, course_code, section_code, course_name,
                    academic_year, semester
             FROM course_sections WHERE id = ?",
            [&section_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                ))
            },
        )
        .optional();
    let (instructor_id, course_code, section_code, course_name, academic_year, semester) =
        match section {
            Ok(Some(v)) => v,
            Ok(None) => return err(&req.id, "not_found", "section not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
    let identifier = format!("{}-{}", course_code, section_code);

    let total_questions: i64 = match conn.query_row("SELECT COUNT(*) FROM questions", [], |r| {
        r.get(0)
    }) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT u.id, u.email, u.first_name, u.last_name, u.code,
                (SELECT COUNT(*) FROM completions c WHERE c.user_id = u.id) AS completed_count
         FROM users u
         WHERE u.role = 'student'
           AND u.associated_instructor_id = ?
           AND u.course_section = ?
         ORDER BY u.last_name, u.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((&instructor_id, &identifier), |row| {
            let completed: i64 = row.get(5)?;
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "email": row.get::<_, String>(1)?,
                "firstName": row.get::<_, Option<String>>(2)?,
                "lastName": row.get::<_, Option<String>>(3)?,
                "code": row.get::<_, Option<String>>(4)?,
                "completedQuestions": completed,
                "totalQuestions": total_questions
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(
            &req.id,
            json!({
                "section": {
                    "id": section_id,
                    "courseCode": course_code,
                    "courseName": course_name,
                    "sectionCode": section_code,
                    "sectionIdentifier": identifier,
                    "academicYear": academic_year,
                    "semester": semester
                },
                "students": students,
                "totalQuestions": total_questions
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_term_current(req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "academicYear": term::current_academic_year(),
            "semester": term::current_semester()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sections.list" => Some(handle_sections_list(state, req)),
        "sections.create" => Some(handle_sections_create(state, req)),
        "sections.update" => Some(handle_sections_update(state, req)),
        "sections.delete" => Some(handle_sections_delete(state, req)),
        "sections.students" => Some(handle_sections_students(state, req)),
        "sections.progress" => Some(handle_sections_progress(state, req)),
        "term.current" => Some(handle_term_current(req)),
        _ => None,
    }
}
