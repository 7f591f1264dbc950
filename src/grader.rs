use serde::Serialize;

use crate::refdb::{QueryResult, RefDbRegistry};

pub const SYNTAX_ERROR_FEEDBACK: &str = "Fix the syntax error in your query.";

/// Verdict for one student query graded against a reference query.
///
/// Derived purely from the two execution results and the two SQL texts;
/// grading the same pair twice against an unchanged database yields an
/// identical outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonOutcome {
    pub is_correct: bool,
    pub rows_match: bool,
    pub column_count_match: bool,
    pub column_names_match: bool,
    pub missing_columns: Vec<String>,
    pub extra_columns: Vec<String>,
    pub differences: Vec<String>,
    pub feedback: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub student_result: QueryResult,
    pub solution_result: QueryResult,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Split a SELECT expression list on commas at parenthesis depth 0,
/// ignoring commas inside quoted literals and quoted identifiers.
///
/// This is a character state machine rather than a regex so that nested
/// function calls and string literals containing commas segment correctly.
pub fn split_top_level(list: &str) -> Vec<String> {
    let chars: Vec<char> = list.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0usize;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == '\\' && (q == '\'' || q == '"') {
                i += 2;
                continue;
            }
            if c == q {
                // A doubled quote char is an escape, not a close.
                if chars.get(i + 1) == Some(&q) {
                    i += 2;
                    continue;
                }
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                let piece: String = chars[start..i].iter().collect();
                let piece = piece.trim().to_string();
                if !piece.is_empty() {
                    pieces.push(piece);
                }
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    let piece: String = chars[start..].iter().collect();
    let piece = piece.trim().to_string();
    if !piece.is_empty() {
        pieces.push(piece);
    }
    pieces
}

/// Positions (in chars) where `kw` occurs as a whole word at parenthesis
/// depth 0 outside quoted regions.
fn top_level_keyword_positions(chars: &[char], kw: &str) -> Vec<usize> {
    let kw_chars: Vec<char> = kw.chars().collect();
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == '\\' && (q == '\'' || q == '"') {
                i += 2;
                continue;
            }
            if c == q {
                if chars.get(i + 1) == Some(&q) {
                    i += 2;
                    continue;
                }
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                i += 1;
                continue;
            }
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
        if depth == 0 && quote.is_none() {
            let boundary_before = i == 0 || !is_ident_char(chars[i - 1]);
            let end = i + kw_chars.len();
            if boundary_before && end <= chars.len() {
                let matches = chars[i..end]
                    .iter()
                    .zip(kw_chars.iter())
                    .all(|(a, b)| a.eq_ignore_ascii_case(b));
                let boundary_after = end == chars.len() || !is_ident_char(chars[end]);
                if matches && boundary_after {
                    out.push(i);
                    i = end;
                    continue;
                }
            }
        }
        i += 1;
    }
    out
}

/// Position just past `word` if it appears (whole-word, any case) at the
/// next non-whitespace position, else `None`.
fn skip_word(chars: &[char], start: usize, word: &str) -> Option<usize> {
    let mut i = start;
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    let w: Vec<char> = word.chars().collect();
    let end = i + w.len();
    if end <= chars.len()
        && chars[i..end]
            .iter()
            .zip(w.iter())
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
        && (end == chars.len() || !is_ident_char(chars[end]))
    {
        Some(end)
    } else {
        None
    }
}

/// Extract the top-level SELECT clause of a query as a list of raw column
/// expressions. `SELECT *` yields a single `*` expression. Queries this
/// scanner cannot segment (no SELECT keyword at the top level) yield an
/// empty list, which simply disables expression-based matching downstream.
pub fn select_expressions(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let selects = top_level_keyword_positions(&chars, "select");
    let Some(&sel) = selects.first() else {
        return Vec::new();
    };
    let mut start = sel + "select".len();
    if let Some(next) = skip_word(&chars, start, "distinct") {
        start = next;
    } else if let Some(next) = skip_word(&chars, start, "all") {
        start = next;
    }

    let end = top_level_keyword_positions(&chars, "from")
        .into_iter()
        .find(|&p| p > start)
        .unwrap_or(chars.len());

    let list: String = chars[start..end].iter().collect();
    let list = list.trim().trim_end_matches(';').to_string();
    split_top_level(&list)
}

/// Strip a trailing top-level `AS alias` from a raw SELECT expression.
fn strip_alias(expr: &str) -> String {
    let chars: Vec<char> = expr.chars().collect();
    let positions = top_level_keyword_positions(&chars, "as");
    if let Some(&pos) = positions.last() {
        let tail: String = chars[pos + 2..].iter().collect();
        let tail = tail.trim();
        let bare = tail
            .strip_prefix('`')
            .and_then(|t| t.strip_suffix('`'))
            .or_else(|| tail.strip_prefix('"').and_then(|t| t.strip_suffix('"')))
            .unwrap_or(tail);
        if !bare.is_empty() && bare.chars().all(is_ident_char) {
            let head: String = chars[..pos].iter().collect();
            return head.trim_end().to_string();
        }
    }
    expr.trim().to_string()
}

const EXPR_PUNCT: &str = "()+-*/%,=<>|&";

/// Canonical form of a SELECT expression: alias stripped, identifier
/// quoting stripped, lower-cased, whitespace collapsed so that spacing
/// around operators, parentheses and commas never matters.
pub fn normalize_expression(expr: &str) -> String {
    let unaliased = strip_alias(expr);
    let cleaned: String = unaliased
        .chars()
        .filter(|c| *c != '`' && *c != '"')
        .collect();
    let lowered = cleaned.to_lowercase();

    let chars: Vec<char> = lowered.trim().chars().collect();
    let mut out = String::new();
    let mut i = 0usize;
    while i < chars.len() {
        if chars[i].is_whitespace() {
            let mut j = i;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            let prev = out.chars().last();
            let next = chars.get(j).copied();
            let glue_prev = prev.map(|c| EXPR_PUNCT.contains(c)).unwrap_or(true);
            let glue_next = next.map(|c| EXPR_PUNCT.contains(c)).unwrap_or(true);
            if !(glue_prev || glue_next) {
                out.push(' ');
            }
            i = j;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

/// Fallback normal form for a result column name: lower-cased, quoting
/// stripped, parentheses/whitespace/operators mapped to underscores.
/// Catches engine-generated labels like `sum(price)` against hand-typed
/// variants like `sum_price`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::new();
    for c in name.chars() {
        if c == '`' || c == '"' {
            continue;
        }
        let mapped = if c.is_whitespace() || EXPR_PUNCT.contains(c) {
            '_'
        } else {
            c.to_ascii_lowercase()
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }
    out.trim_matches('_').to_string()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnReconciliation {
    /// Solution columns with no student counterpart, by original name.
    pub missing: Vec<String>,
    /// Student columns with no solution counterpart, by original name.
    pub extra: Vec<String>,
}

impl ColumnReconciliation {
    pub fn names_match(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

fn multiset_equal(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut sa = a.to_vec();
    let mut sb = b.to_vec();
    sa.sort();
    sb.sort();
    sa == sb
}

/// One greedy matching pass: pair each still-unmatched solution position
/// with the first still-unmatched student position the predicate accepts.
/// Takes and returns immutable unmatched sets, so passes compose as a fold.
fn run_pass<F>(unmatched_sol: &[usize], unmatched_stu: &[usize], accept: F) -> (Vec<usize>, Vec<usize>)
where
    F: Fn(usize, usize) -> bool,
{
    let mut remaining_stu: Vec<usize> = unmatched_stu.to_vec();
    let mut remaining_sol: Vec<usize> = Vec::new();
    for &si in unmatched_sol {
        match remaining_stu.iter().position(|&tj| accept(si, tj)) {
            Some(k) => {
                remaining_stu.remove(k);
            }
            None => remaining_sol.push(si),
        }
    }
    (remaining_sol, remaining_stu)
}

/// Decide whether two result sets' column labels are equivalent despite
/// reordering, aliasing, or engine-generated names for calculated columns.
pub fn reconcile_columns(
    solution_columns: &[String],
    student_columns: &[String],
    solution_sql: &str,
    student_sql: &str,
) -> ColumnReconciliation {
    // Fast path: same labels in any order.
    if multiset_equal(solution_columns, student_columns) {
        return ColumnReconciliation::default();
    }

    // Expression matching is only trustworthy when the parsed SELECT list
    // lines up one-to-one with the reported columns (a wildcard or a parse
    // degradation breaks the alignment).
    let sol_exprs: Vec<String> = select_expressions(solution_sql)
        .iter()
        .map(|e| normalize_expression(e))
        .collect();
    let stu_exprs: Vec<String> = select_expressions(student_sql)
        .iter()
        .map(|e| normalize_expression(e))
        .collect();
    let aligned =
        sol_exprs.len() == solution_columns.len() && stu_exprs.len() == student_columns.len();

    let sol_norm: Vec<String> = solution_columns.iter().map(|c| normalize_name(c)).collect();
    let stu_norm: Vec<String> = student_columns.iter().map(|c| normalize_name(c)).collect();

    let all_sol: Vec<usize> = (0..solution_columns.len()).collect();
    let all_stu: Vec<usize> = (0..student_columns.len()).collect();

    // Pass 1: exact name equality.
    let (rem_sol, rem_stu) = run_pass(&all_sol, &all_stu, |i, j| {
        solution_columns[i] == student_columns[j]
    });

    // Pass 2: equivalent SELECT expressions (alias-insensitive).
    let (rem_sol, rem_stu) = if aligned {
        run_pass(&rem_sol, &rem_stu, |i, j| {
            !sol_exprs[i].is_empty() && sol_exprs[i] == stu_exprs[j]
        })
    } else {
        (rem_sol, rem_stu)
    };

    // Pass 3: normalized-name fallback. When trustworthy expression
    // knowledge proves two columns are different calculations, the name
    // fallback must not conflate them (`a + b` and `a * b` flatten to the
    // same underscore form).
    let (rem_sol, rem_stu) = run_pass(&rem_sol, &rem_stu, |i, j| {
        if sol_norm[i].is_empty() || sol_norm[i] != stu_norm[j] {
            return false;
        }
        let proven_different = aligned
            && !sol_exprs[i].is_empty()
            && !stu_exprs[j].is_empty()
            && sol_exprs[i] != stu_exprs[j];
        !proven_different
    });

    ColumnReconciliation {
        missing: rem_sol.iter().map(|&i| solution_columns[i].clone()).collect(),
        extra: rem_stu.iter().map(|&j| student_columns[j].clone()).collect(),
    }
}

fn compose_feedback(
    rows_match: bool,
    column_count_match: bool,
    column_names_match: bool,
    student: &QueryResult,
    solution: &QueryResult,
    missing: &[String],
) -> String {
    if rows_match && column_count_match && column_names_match {
        return format!(
            "Great job! Your query is correct. It matches the expected solution in both rows returned ({} rows) and columns selected.",
            solution.row_count
        );
    }

    let mut feedback = String::from("Your query results differ from the expected solution.");
    if rows_match {
        feedback.push_str(&format!(
            " Your query correctly returns the expected number of rows ({} rows).",
            solution.row_count
        ));
    } else {
        feedback.push_str(&format!(
            " Your query returns {} rows, but the expected solution returns {} rows.",
            student.row_count, solution.row_count
        ));
    }

    if column_count_match && column_names_match {
        feedback.push_str(" Your query correctly selects all the expected columns.");
    } else if column_count_match {
        feedback
            .push_str(" Your query has the correct number of columns, but some column names differ.");
    } else {
        feedback.push_str(&format!(
            " Your query selects {} columns, but the expected solution uses {} columns.",
            student.columns.len(),
            solution.columns.len()
        ));
    }

    if !missing.is_empty() {
        feedback.push_str(&format!(
            " Make sure to include all required columns: {}.",
            missing.join(", ")
        ));
    }
    feedback
}

/// Grade two completed executions. Pure: no I/O, no state beyond the inputs.
pub fn compare_results(
    student_sql: &str,
    solution_sql: &str,
    student: QueryResult,
    solution: QueryResult,
) -> ComparisonOutcome {
    if !student.success {
        return ComparisonOutcome {
            is_correct: false,
            rows_match: false,
            column_count_match: false,
            column_names_match: false,
            missing_columns: Vec::new(),
            extra_columns: Vec::new(),
            differences: Vec::new(),
            feedback: SYNTAX_ERROR_FEEDBACK.to_string(),
            message: Some("Your query has an error".to_string()),
            student_result: student,
            solution_result: solution,
        };
    }

    let mut differences = Vec::new();

    let column_count_match = student.columns.len() == solution.columns.len();
    if !column_count_match {
        differences.push(format!(
            "Expected {} columns but got {}",
            solution.columns.len(),
            student.columns.len()
        ));
    }

    let rows_match = student.row_count == solution.row_count;
    if !rows_match {
        differences.push(format!(
            "Expected {} rows but got {}",
            solution.row_count, student.row_count
        ));
    }

    let recon = reconcile_columns(&solution.columns, &student.columns, solution_sql, student_sql);
    if !recon.missing.is_empty() {
        differences.push(format!("Missing columns: {}", recon.missing.join(", ")));
    }
    if !recon.extra.is_empty() {
        differences.push(format!("Extra columns: {}", recon.extra.join(", ")));
    }
    let column_names_match = recon.names_match();

    let feedback = compose_feedback(
        rows_match,
        column_count_match,
        column_names_match,
        &student,
        &solution,
        &recon.missing,
    );

    ComparisonOutcome {
        is_correct: rows_match && column_count_match && column_names_match,
        rows_match,
        column_count_match,
        column_names_match,
        missing_columns: recon.missing,
        extra_columns: recon.extra,
        differences,
        feedback,
        message: None,
        student_result: student,
        solution_result: solution,
    }
}

/// Run both queries against the named reference database and grade them.
/// The solution always runs, even when the student query fails, so its
/// shape is available for diagnostic display.
pub fn compare_queries(
    reg: &RefDbRegistry,
    student_sql: &str,
    solution_sql: &str,
    database: &str,
) -> ComparisonOutcome {
    let student = reg.execute(student_sql, database);
    let solution = reg.execute(solution_sql, database);
    compare_results(student_sql, solution_sql, student, solution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refdb::execute_on;
    use rusqlite::Connection;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn classic_models() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "CREATE TABLE Customers(customerName TEXT, city TEXT);
             INSERT INTO Customers VALUES('Atelier graphique', 'Nantes');
             INSERT INTO Customers VALUES('Signal Gift Stores', 'Las Vegas');
             INSERT INTO Customers VALUES('La Rochelle Gifts', 'Nantes');
             CREATE TABLE OrderDetails(quantityOrdered INTEGER, priceEach REAL);
             INSERT INTO OrderDetails VALUES(30, 100.0);
             INSERT INTO OrderDetails VALUES(50, 55.5);
             CREATE TABLE Products(productName TEXT, buyPrice REAL, MSRP REAL);
             INSERT INTO Products VALUES('1952 Alpine Renault', 98.58, 214.3);
             INSERT INTO Products VALUES('1958 Setra Bus', 77.9, 136.67);",
        )
        .expect("seed");
        conn
    }

    fn grade(conn: &Connection, student_sql: &str, solution_sql: &str) -> ComparisonOutcome {
        let student = execute_on(conn, student_sql);
        let solution = execute_on(conn, solution_sql);
        compare_results(student_sql, solution_sql, student, solution)
    }

    #[test]
    fn split_respects_parens_and_quotes() {
        assert_eq!(
            split_top_level("a, SUM(b, c), d"),
            vec!["a", "SUM(b, c)", "d"]
        );
        assert_eq!(
            split_top_level("name, 'x, y' AS label"),
            vec!["name", "'x, y' AS label"]
        );
        assert_eq!(
            split_top_level("COALESCE(a, NULLIF(b, ',')), c"),
            vec!["COALESCE(a, NULLIF(b, ','))", "c"]
        );
        assert_eq!(split_top_level("\"weird, name\", x"), vec!["\"weird, name\"", "x"]);
        assert_eq!(split_top_level("  a  "), vec!["a"]);
        assert!(split_top_level("").is_empty());
    }

    #[test]
    fn select_expressions_basic() {
        assert_eq!(
            select_expressions("SELECT customerName, city FROM Customers"),
            vec!["customerName", "city"]
        );
        assert_eq!(select_expressions("SELECT * FROM Customers"), vec!["*"]);
        assert_eq!(
            select_expressions("select distinct city from Customers"),
            vec!["city"]
        );
        assert_eq!(select_expressions("SELECT 1 + 1;"), vec!["1 + 1"]);
    }

    #[test]
    fn select_expressions_ignores_nested_select_and_from() {
        let exprs = select_expressions(
            "SELECT t.name, t.total FROM (SELECT name, SUM(x) AS total FROM raw GROUP BY name) t",
        );
        assert_eq!(exprs, vec!["t.name", "t.total"]);
        assert!(select_expressions("UPDATE Customers SET city = 'Oslo'").is_empty());
    }

    #[test]
    fn normalize_expression_strips_alias_and_spacing() {
        assert_eq!(
            normalize_expression("quantityOrdered * priceEach AS totalSales"),
            "quantityordered*priceeach"
        );
        assert_eq!(
            normalize_expression("quantityOrdered*priceEach"),
            "quantityordered*priceeach"
        );
        assert_eq!(normalize_expression("SUM( price )"), "sum(price)");
        assert_eq!(normalize_expression("COUNT(*) AS totalCustomers"), "count(*)");
        assert_eq!(normalize_expression("`customerName`"), "customername");
        // `as` inside a function call is not an alias.
        assert_eq!(
            normalize_expression("CAST(price AS INTEGER)"),
            "cast(price as integer)"
        );
        assert_eq!(
            normalize_expression("LENGTH(city) * 2 AS cityLength"),
            "length(city)*2"
        );
    }

    #[test]
    fn normalize_name_flattens_punctuation() {
        assert_eq!(normalize_name("SUM( price )"), "sum_price");
        assert_eq!(normalize_name("sum(price)"), "sum_price");
        assert_eq!(normalize_name("sum_price"), "sum_price");
        assert_eq!(normalize_name("quantityOrdered * priceEach"), "quantityordered_priceeach");
        assert_eq!(normalize_name("`city`"), "city");
    }

    #[test]
    fn order_invariance() {
        let conn = classic_models();
        let out = grade(
            &conn,
            "SELECT city, customerName FROM Customers",
            "SELECT customerName, city FROM Customers",
        );
        assert!(out.column_names_match);
        assert!(out.missing_columns.is_empty());
        assert!(out.extra_columns.is_empty());
        assert!(out.is_correct);
    }

    #[test]
    fn alias_invariance() {
        let conn = classic_models();
        let out = grade(
            &conn,
            "SELECT quantityOrdered * priceEach AS total FROM OrderDetails",
            "SELECT quantityOrdered * priceEach AS totalSales FROM OrderDetails",
        );
        assert!(out.column_names_match);
        assert!(out.is_correct);
    }

    #[test]
    fn aliased_vs_unaliased_invariance() {
        let conn = classic_models();
        let out = grade(
            &conn,
            "SELECT quantityOrdered * priceEach FROM OrderDetails",
            "SELECT quantityOrdered * priceEach AS totalSales FROM OrderDetails",
        );
        assert!(out.column_names_match);
        assert!(out.is_correct);
    }

    #[test]
    fn distinct_expressions_do_not_conflate() {
        let conn = classic_models();
        let out = grade(
            &conn,
            "SELECT quantityOrdered + priceEach FROM OrderDetails",
            "SELECT quantityOrdered * priceEach FROM OrderDetails",
        );
        assert!(!out.column_names_match);
        assert!(!out.is_correct);
    }

    #[test]
    fn missing_column_detection() {
        let conn = classic_models();
        let out = grade(
            &conn,
            "SELECT customerName FROM Customers",
            "SELECT customerName, city FROM Customers",
        );
        assert!(!out.column_names_match);
        assert_eq!(out.missing_columns, vec!["city"]);
        assert!(out.extra_columns.is_empty());
        assert!(!out.is_correct);
        assert!(out.feedback.contains("Make sure to include all required columns: city."));
    }

    #[test]
    fn row_count_is_strict() {
        let conn = classic_models();
        let out = grade(
            &conn,
            "SELECT customerName, city FROM Customers WHERE city = 'Nantes'",
            "SELECT customerName, city FROM Customers",
        );
        assert!(!out.rows_match);
        assert!(!out.is_correct);
        assert!(out.column_names_match);
        assert!(out
            .feedback
            .contains("Your query returns 2 rows, but the expected solution returns 3 rows."));
    }

    #[test]
    fn execution_error_short_circuits() {
        let conn = classic_models();
        let out = grade(
            &conn,
            "SELEKT * FROM Customers",
            "SELECT customerName, city FROM Customers",
        );
        assert!(!out.is_correct);
        assert!(!out.student_result.success);
        assert_eq!(out.feedback, SYNTAX_ERROR_FEEDBACK);
        assert_eq!(out.message.as_deref(), Some("Your query has an error"));
        // Solution still ran, for diagnostic display.
        assert!(out.solution_result.success);
        assert_eq!(out.solution_result.row_count, 3);
    }

    #[test]
    fn wildcard_matches_via_fast_path() {
        let conn = classic_models();
        let out = grade(
            &conn,
            "SELECT * FROM Customers",
            "SELECT * FROM Customers",
        );
        assert!(out.column_names_match);
        assert!(out.is_correct);
    }

    #[test]
    fn function_expression_with_alias_matches() {
        let conn = classic_models();
        let out = grade(
            &conn,
            "SELECT SUM(quantityOrdered * priceEach) FROM OrderDetails",
            "SELECT SUM(quantityOrdered * priceEach) AS totalSales FROM OrderDetails",
        );
        assert!(out.column_names_match, "missing: {:?} extra: {:?}", out.missing_columns, out.extra_columns);
        assert!(out.is_correct);
    }

    #[test]
    fn mixed_plain_and_calculated_columns_match() {
        let conn = classic_models();
        let out = grade(
            &conn,
            "SELECT buyPrice, MSRP, (MSRP - buyPrice) AS profit FROM Products",
            "SELECT buyPrice, MSRP, (MSRP - buyPrice) AS margin FROM Products",
        );
        assert!(out.column_names_match);
        assert!(out.is_correct);
    }

    #[test]
    fn pass_three_matches_generated_names() {
        // Parenthesized query: the scanner finds no top-level SELECT, so
        // expression matching is unavailable and the name fallback alone
        // must reconcile the engine-generated label with the typed alias.
        let recon = reconcile_columns(
            &["SUM(price)".to_string()],
            &["sum_price".to_string()],
            "(SELECT SUM(price) FROM t)",
            "(SELECT SUM(price) AS sum_price FROM t)",
        );
        assert!(recon.names_match());
    }

    #[test]
    fn pass_three_defers_to_expression_evidence() {
        // Same underscore-flattened name, but the parsed expressions prove
        // the calculations differ; the fallback must not conflate them.
        let recon = reconcile_columns(
            &["quantityOrdered * priceEach".to_string()],
            &["quantityOrdered + priceEach".to_string()],
            "SELECT quantityOrdered * priceEach FROM OrderDetails",
            "SELECT quantityOrdered + priceEach FROM OrderDetails",
        );
        assert!(!recon.names_match());
    }

    #[test]
    fn success_feedback_quotes_expected_row_count() {
        let conn = classic_models();
        let out = grade(
            &conn,
            "SELECT customerName, city FROM Customers",
            "SELECT customerName, city FROM Customers",
        );
        assert!(out.is_correct);
        assert_eq!(
            out.feedback,
            "Great job! Your query is correct. It matches the expected solution in both rows returned (3 rows) and columns selected."
        );
    }

    #[test]
    fn column_count_mismatch_feedback() {
        let conn = classic_models();
        let out = grade(
            &conn,
            "SELECT customerName, city, customerName FROM Customers",
            "SELECT customerName, city FROM Customers",
        );
        assert!(!out.column_count_match);
        assert!(out
            .differences
            .iter()
            .any(|d| d == "Expected 2 columns but got 3"));
        assert!(out
            .feedback
            .contains("Your query selects 3 columns, but the expected solution uses 2 columns."));
    }

    #[test]
    fn compare_is_idempotent() {
        let dir = std::env::temp_dir().join(format!(
            "querylab-grader-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        let reg = RefDbRegistry::new(dir.clone(), "ClassicModels".to_string());
        reg.load_script(
            "ClassicModels",
            "CREATE TABLE Customers(customerName TEXT, city TEXT);
             INSERT INTO Customers VALUES('Atelier graphique', 'Nantes');",
        )
        .expect("seed");

        let a = compare_queries(
            &reg,
            "SELECT city, customerName FROM Customers",
            "SELECT customerName, city FROM Customers",
            "ClassicModels",
        );
        let b = compare_queries(
            &reg,
            "SELECT city, customerName FROM Customers",
            "SELECT customerName, city FROM Customers",
            "ClassicModels",
        );
        assert_eq!(a.is_correct, b.is_correct);
        assert_eq!(a.rows_match, b.rows_match);
        assert_eq!(a.column_names_match, b.column_names_match);
        assert_eq!(a.feedback, b.feedback);

        let _ = std::fs::remove_dir_all(dir);
    }
}
