use std::path::Path;

use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::refdb::RefDbRegistry;

/// Result of one pass over a directory of instructor-authored reference
/// files (one JSON file per topic).
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub files_seen: usize,
    pub files_skipped: usize,
    pub topics_created: usize,
    pub topics_updated: usize,
    pub questions_created: usize,
    pub questions_updated: usize,
    pub invalid_solutions: Vec<InvalidSolution>,
}

/// A stored solution query that failed to run against its topic's reference
/// database. Caught here, at the data-load boundary, so a broken reference
/// answer never reaches grading silently.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidSolution {
    pub topic: String,
    pub question_number: i64,
    pub error: String,
}

fn file_fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn already_imported(conn: &Connection, file_name: &str, sha: &str) -> anyhow::Result<bool> {
    let prev: Option<String> = conn
        .query_row(
            "SELECT sha256 FROM reference_imports WHERE file_name = ?",
            [file_name],
            |r| r.get(0),
        )
        .optional()?;
    Ok(prev.as_deref() == Some(sha))
}

fn record_import(conn: &Connection, file_name: &str, sha: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO reference_imports(file_name, sha256, imported_at)
         VALUES(?, ?, ?)
         ON CONFLICT(file_name) DO UPDATE SET
           sha256 = excluded.sha256,
           imported_at = excluded.imported_at",
        (file_name, sha, chrono::Utc::now().to_rfc3339()),
    )?;
    Ok(())
}

struct TopicUpsert {
    id: String,
    created: bool,
    updated: bool,
}

fn upsert_topic(
    conn: &Connection,
    name: &str,
    kind: &str,
    database: &str,
) -> anyhow::Result<TopicUpsert> {
    let existing: Option<(String, String, String)> = conn
        .query_row(
            "SELECT id, type, database FROM topics WHERE name = ?",
            [name],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let now = chrono::Utc::now().to_rfc3339();

    match existing {
        Some((id, old_kind, old_db)) => {
            let changed = old_kind != kind || old_db != database;
            if changed {
                conn.execute(
                    "UPDATE topics SET type = ?, database = ?, updated_at = ? WHERE id = ?",
                    (kind, database, &now, &id),
                )?;
            }
            Ok(TopicUpsert {
                id,
                created: false,
                updated: changed,
            })
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO topics(id, name, type, database, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (&id, name, kind, database, &now, &now),
            )?;
            Ok(TopicUpsert {
                id,
                created: true,
                updated: false,
            })
        }
    }
}

/// Upsert one question by (topic, number). Returns (created, updated).
fn upsert_question(
    conn: &Connection,
    topic_id: &str,
    number: i64,
    text: &str,
    solution: Option<&str>,
) -> anyhow::Result<(bool, bool)> {
    let existing: Option<(String, String, Option<String>)> = conn
        .query_row(
            "SELECT id, question_text, solution
             FROM questions WHERE topic_id = ? AND question_number = ?",
            (topic_id, number),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let now = chrono::Utc::now().to_rfc3339();

    match existing {
        Some((id, old_text, old_solution)) => {
            if old_text != text || old_solution.as_deref() != solution {
                conn.execute(
                    "UPDATE questions SET question_text = ?, solution = ?, updated_at = ?
                     WHERE id = ?",
                    (text, solution, &now, &id),
                )?;
                Ok((false, true))
            } else {
                Ok((false, false))
            }
        }
        None => {
            conn.execute(
                "INSERT INTO questions(id, topic_id, question_number, question_text,
                                       solution, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    topic_id,
                    number,
                    text,
                    solution,
                    &now,
                    &now,
                ),
            )?;
            Ok((true, false))
        }
    }
}

/// Import every `*.json` topic file under `dir`. Files whose content hash
/// matches the last import are skipped. `n_`-prefixed files default to the
/// Northwind database and topic names carry a database prefix, matching the
/// authoring convention of the reference pack.
pub fn import_reference_dir(
    conn: &Connection,
    refdbs: &RefDbRegistry,
    dir: &Path,
) -> anyhow::Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    let mut files: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.to_string_lossy()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension().and_then(|s| s.to_str()) == Some("json")
        })
        .collect();
    files.sort();

    for path in files {
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        summary.files_seen += 1;

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", file_name))?;
        let sha = file_fingerprint(&content);
        if already_imported(conn, &file_name, &sha)? {
            summary.files_skipped += 1;
            continue;
        }

        let data: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("{} is not valid JSON", file_name))?;
        let title = data
            .get("title")
            .and_then(|v| v.as_str())
            .with_context(|| format!("{} has no title", file_name))?;

        let northwind = file_name.starts_with("n_");
        let db_prefix = if northwind {
            "Northwind: "
        } else {
            "ClassicModels: "
        };
        let topic_name = format!("{}{}", db_prefix, title);
        let declared_db = data
            .get("database")
            .and_then(|v| v.as_str())
            .unwrap_or(if northwind { "Northwind" } else { "ClassicModels" });
        let kind = if data.get("type").and_then(|v| v.as_str()) == Some("data model") {
            "data_model"
        } else {
            "sql"
        };

        let topic = upsert_topic(conn, &topic_name, kind, declared_db)?;
        if topic.created {
            summary.topics_created += 1;
            log::info!("created topic: {}", topic_name);
        } else if topic.updated {
            summary.topics_updated += 1;
        }

        if kind == "sql" {
            let questions = data
                .get("questions")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            for (idx, q) in questions.iter().enumerate() {
                let number = q
                    .get("number")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(idx as i64 + 1);
                let Some(text) = q.get("text").and_then(|v| v.as_str()) else {
                    continue;
                };
                let solution = q.get("solution_query").and_then(|v| v.as_str());

                let (created, updated) =
                    upsert_question(conn, &topic.id, number, text, solution)?;
                if created {
                    summary.questions_created += 1;
                }
                if updated {
                    summary.questions_updated += 1;
                }

                if let Some(solution_sql) = solution {
                    let check = refdbs.execute(solution_sql, declared_db);
                    if !check.success {
                        log::warn!(
                            "solution for {} #{} does not run: {}",
                            topic_name,
                            number,
                            check.message
                        );
                        summary.invalid_solutions.push(InvalidSolution {
                            topic: topic_name.clone(),
                            question_number: number,
                            error: check.message,
                        });
                    }
                }
            }
        } else {
            let details = data
                .get("details")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            for (idx, detail) in details.iter().enumerate() {
                let Some(scenario) = detail.get("scenario").and_then(|v| v.as_str()) else {
                    continue;
                };
                let (created, updated) =
                    upsert_question(conn, &topic.id, idx as i64 + 1, scenario, None)?;
                if created {
                    summary.questions_created += 1;
                }
                if updated {
                    summary.questions_updated += 1;
                }
            }
        }

        record_import(conn, &file_name, &sha)?;
    }

    Ok(summary)
}
