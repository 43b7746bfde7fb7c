use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime};
use rust_decimal::Decimal;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// `requester_id`, when given, must name the caller.
    InsertBooking {
        requester_id: Option<u64>,
        request: NewBooking,
    },
    UpdateStatus {
        id: BookingId,
        status: Status,
    },
    UpdateProgress {
        id: BookingId,
        started: Option<bool>,
        finished: Option<bool>,
    },
    UpdateEvidence {
        id: BookingId,
        phase: EvidencePhase,
        refs: Vec<String>,
    },
    DeleteBooking {
        id: BookingId,
    },
    SelectBookings {
        id: Option<BookingId>,
    },
    SelectNotifications {
        page: Option<u32>,
        page_size: Option<u32>,
    },
    DismissNotification {
        booking_id: BookingId,
    },
    SelectConflicts {
        service_id: u64,
        requester_id: u64,
        scheduled_at: Ms,
    },
}

/// Shape of the rows a statement produces, for describing prepared
/// statements before their parameters are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Bookings,
    Notifications,
    Conflicts,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    match first_statement(sql)? {
        Statement::Insert(insert) => parse_insert(&insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table, &assignments, &selection),
        Statement::Delete(delete) => parse_delete(&delete),
        Statement::Query(query) => parse_select(&query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Result shape of a statement that may still hold `$n` placeholders.
/// `None` for statements that only report a command tag.
pub fn result_shape(sql: &str) -> Option<ResultShape> {
    let table = match first_statement(sql).ok()? {
        Statement::Insert(insert) => insert_table_name(&insert).ok()?,
        Statement::Update { table, .. } => table_factor_name(&table.relation).ok()?,
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => table_factor_name(&select.from.first()?.relation).ok()?,
            _ => return None,
        },
        _ => return None,
    };
    match table.as_str() {
        "bookings" => Some(ResultShape::Bookings),
        "notifications" => Some(ResultShape::Notifications),
        "conflicts" => Some(ResultShape::Conflicts),
        _ => None,
    }
}

fn first_statement(sql: &str) -> Result<Statement, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut stmts =
        Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    Ok(stmts.swap_remove(0))
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    if insert.columns.is_empty() {
        return Err(SqlError::Parse(
            "INSERT INTO bookings needs an explicit column list".into(),
        ));
    }
    let rows = extract_insert_rows(insert)?;
    if rows.len() != 1 {
        return Err(SqlError::Unsupported("one booking per INSERT".into()));
    }
    let values = &rows[0];
    if values.len() != insert.columns.len() {
        return Err(SqlError::WrongArity(
            "bookings",
            insert.columns.len(),
            values.len(),
        ));
    }

    let mut service_id = None;
    let mut requester_id = None;
    let mut scheduled_at = None;
    let mut details = BookingDetails::default();
    for (column, value) in insert.columns.iter().zip(values) {
        let column = column.value.to_lowercase();
        match column.as_str() {
            "service_id" => service_id = Some(parse_u64(value)?),
            "requester_id" => requester_id = parse_or_null(value, parse_u64)?,
            "scheduled_at" => scheduled_at = parse_or_null(value, parse_timestamp)?,
            "provider_id" => details.provider_id = parse_or_null(value, parse_u64)?,
            "address" => details.address = parse_string(value)?,
            "description" => details.description = parse_string(value)?,
            "requester_present" => details.requester_present = parse_bool(value)?,
            "recurring" => details.recurring = parse_bool(value)?,
            "service_kind" => details.service_kind = parse_string(value)?,
            "payment_method" => details.payment_method = parse_or_null(value, parse_string)?,
            "payment_reference" => {
                details.payment_reference = parse_or_null(value, parse_string)?
            }
            "card_id" => details.card_id = parse_or_null(value, parse_u64)?,
            "square_meters" => details.square_meters = parse_u32(value)?,
            "price" => details.price = parse_decimal(value)?,
            _ => return Err(SqlError::UnknownColumn(column)),
        }
    }

    Ok(Command::InsertBooking {
        requester_id,
        request: NewBooking {
            service_id: service_id.ok_or(SqlError::MissingColumn("service_id"))?,
            scheduled_at,
            details,
        },
    })
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let name = table_factor_name(&table.relation)?;
    if name != "bookings" {
        return Err(SqlError::UnknownTable(name));
    }
    let id = extract_where_id(selection, "id")?;

    let mut columns = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        columns.push((column, &assignment.value));
    }

    // Status moves only through the lifecycle; it never rides along with other
    // fields.
    if columns.iter().any(|(c, _)| c == "status") {
        if columns.len() != 1 {
            return Err(SqlError::Unsupported(
                "status must be the only column in its UPDATE".into(),
            ));
        }
        let raw = parse_string(columns[0].1)?;
        let status = Status::parse(&raw)
            .ok_or_else(|| SqlError::Parse(format!("unknown status '{raw}'")))?;
        return Ok(Command::UpdateStatus { id, status });
    }

    let evidence_phase = |c: &str| match c {
        "evidence_before" => Some(EvidencePhase::Before),
        "evidence_after" => Some(EvidencePhase::After),
        _ => None,
    };
    if let Some((column, value)) = columns.iter().find(|(c, _)| evidence_phase(c).is_some()) {
        if columns.len() != 1 {
            return Err(SqlError::Unsupported(
                "evidence lists are updated one per statement".into(),
            ));
        }
        return Ok(Command::UpdateEvidence {
            id,
            phase: evidence_phase(column).ok_or(SqlError::MissingColumn("evidence"))?,
            refs: parse_string_list(value)?,
        });
    }

    let (mut started, mut finished) = (None, None);
    for (column, value) in columns {
        match column.as_str() {
            "cleaner_started" => started = Some(parse_bool(value)?),
            "cleaner_finished" => finished = Some(parse_bool(value)?),
            _ => return Err(SqlError::ReadOnlyColumn(column)),
        }
    }
    Ok(Command::UpdateProgress {
        id,
        started,
        finished,
    })
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    match table.as_str() {
        "bookings" => Ok(Command::DeleteBooking {
            id: extract_where_id(&delete.selection, "id")?,
        }),
        "notifications" => Ok(Command::DismissNotification {
            booking_id: extract_where_id(&delete.selection, "booking_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let from = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    let table = table_factor_name(&from.relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "bookings" => {
            let mut id = None;
            for (column, value) in filters {
                match column.as_str() {
                    "id" => id = Some(parse_u64(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::SelectBookings { id })
        }
        "notifications" => {
            let (mut page, mut page_size) = (None, None);
            for (column, value) in filters {
                match column.as_str() {
                    "page" => page = Some(parse_u32(value)?),
                    "page_size" => page_size = Some(parse_u32(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::SelectNotifications { page, page_size })
        }
        "conflicts" => {
            let (mut service_id, mut requester_id, mut scheduled_at) = (None, None, None);
            for (column, value) in filters {
                match column.as_str() {
                    "service_id" => service_id = Some(parse_u64(value)?),
                    "requester_id" => requester_id = Some(parse_u64(value)?),
                    "scheduled_at" => scheduled_at = Some(parse_timestamp(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::SelectConflicts {
                service_id: service_id.ok_or(SqlError::MissingFilter("service_id"))?,
                requester_id: requester_id.ok_or(SqlError::MissingFilter("requester_id"))?,
                scheduled_at: scheduled_at.ok_or(SqlError::MissingFilter("scheduled_at"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = 1 AND b = 2 AND ...` into column/value pairs.
fn collect_eq_filters<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, out)?;
            collect_eq_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            out.push((column, right));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    let first = tables
        .first()
        .ok_or_else(|| SqlError::Parse("DELETE without table".into()))?;
    table_factor_name(&first.relation)
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let source = insert
        .source
        .as_ref()
        .ok_or_else(|| SqlError::Parse("no VALUES".into()))?;
    match source.body.as_ref() {
        SetExpr::Values(values) if !values.rows.is_empty() => Ok(&values.rows),
        SetExpr::Values(_) => Err(SqlError::Parse("empty VALUES".into())),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// `WHERE <column> = N` and nothing else.
fn extract_where_id(selection: &Option<Expr>, column: &'static str) -> Result<u64, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter(column))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some(column) => parse_u64(right),
        _ => Err(SqlError::MissingFilter(column)),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_or_null<T>(
    expr: &Expr,
    parse: fn(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse(expr).map(Some)
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return parse_i64(expr)?
            .checked_neg()
            .ok_or_else(|| SqlError::Parse("integer overflow".into()));
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer '{s}': {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_u64(expr: &Expr) -> Result<u64, SqlError> {
    let v = parse_i64(expr)?;
    u64::try_from(v).map_err(|_| SqlError::Parse(format!("{v} must not be negative")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::DoubleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_decimal(expr: &Expr) -> Result<Decimal, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_decimal(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => Decimal::from_str(s.trim())
            .map_err(|e| SqlError::Parse(format!("bad decimal '{s}': {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected decimal, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// Milliseconds since the epoch, or an RFC 3339 string. Naive date-times are
/// read as UTC.
fn parse_timestamp(expr: &Expr) -> Result<Ms, SqlError> {
    let text = match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => s.trim(),
        _ => return parse_i64(expr),
    };
    if let Ok(ms) = text.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.timestamp_millis());
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
        .ok_or_else(|| SqlError::Parse(format!("bad timestamp '{text}'")))
}

/// `ARRAY['a', 'b']` or a JSON array in a string: `'["a","b"]'`.
fn parse_string_list(expr: &Expr) -> Result<Vec<String>, SqlError> {
    match expr {
        Expr::Array(array) => array.elem.iter().map(parse_string).collect(),
        _ => {
            let raw = parse_string(expr)?;
            serde_json::from_str(&raw)
                .map_err(|e| SqlError::Parse(format!("expected a JSON array of strings: {e}")))
        }
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    /// Column exists but is not writable through UPDATE.
    ReadOnlyColumn(String),
    MissingColumn(&'static str),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::ReadOnlyColumn(c) => write!(f, "column cannot be updated: {c}"),
            SqlError::MissingColumn(c) => write!(f, "missing column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_insert_booking() {
        let sql = "INSERT INTO bookings (service_id, scheduled_at, address, service_kind, \
                   requester_present, recurring, square_meters, price, payment_method, card_id) \
                   VALUES (5, '2025-06-01T10:00:00Z', 'Calle Mayor 1', 'limpieza', true, false, \
                   70, 45.50, 'card', NULL)";
        let cmd = parse_sql(sql).unwrap();
        let Command::InsertBooking {
            requester_id,
            request,
        } = cmd
        else {
            panic!("expected InsertBooking, got {cmd:?}");
        };
        assert_eq!(requester_id, None);
        assert_eq!(request.service_id, 5);
        assert_eq!(request.scheduled_at, Some(1_748_772_000_000));
        assert_eq!(request.details.address, "Calle Mayor 1");
        assert_eq!(request.details.service_kind, "limpieza");
        assert!(request.details.requester_present);
        assert!(!request.details.recurring);
        assert_eq!(request.details.square_meters, 70);
        assert_eq!(request.details.price, Decimal::new(4550, 2));
        assert_eq!(request.details.payment_method.as_deref(), Some("card"));
        assert_eq!(request.details.card_id, None);
        assert_eq!(request.details.provider_id, None);
    }

    #[test]
    fn insert_timestamp_forms() {
        for (literal, expected) in [
            ("1748772000000", 1_748_772_000_000),
            ("'1748772000000'", 1_748_772_000_000),
            ("'2025-06-01T12:00:00+02:00'", 1_748_772_000_000),
            ("'2025-06-01 10:00:00'", 1_748_772_000_000),
        ] {
            let sql = format!("INSERT INTO bookings (service_id, scheduled_at) VALUES (5, {literal})");
            match parse_sql(&sql).unwrap() {
                Command::InsertBooking { request, .. } => {
                    assert_eq!(request.scheduled_at, Some(expected), "{literal}")
                }
                other => panic!("expected InsertBooking, got {other:?}"),
            }
        }
    }

    #[test]
    fn insert_without_schedule_parses() {
        // Missing scheduled_at is a domain validation error, not a syntax one.
        let cmd = parse_sql("INSERT INTO bookings (service_id) VALUES (5)").unwrap();
        assert!(matches!(
            cmd,
            Command::InsertBooking { request: NewBooking { scheduled_at: None, .. }, .. }
        ));
    }

    #[test]
    fn insert_rejects_unknown_columns_and_missing_service() {
        assert!(matches!(
            parse_sql("INSERT INTO bookings (service_id, status) VALUES (5, 'finished')"),
            Err(SqlError::UnknownColumn(c)) if c == "status"
        ));
        assert!(matches!(
            parse_sql("INSERT INTO bookings (scheduled_at) VALUES (1)"),
            Err(SqlError::MissingColumn("service_id"))
        ));
        assert!(matches!(
            parse_sql("INSERT INTO bookings VALUES (5, 1)"),
            Err(SqlError::Parse(_))
        ));
    }

    #[test]
    fn parse_status_updates() {
        for (raw, status) in [
            ("accepted", Status::Accepted),
            ("in_progress", Status::InProgress),
            ("finished", Status::Finished),
        ] {
            let sql = format!("UPDATE bookings SET status = '{raw}' WHERE id = 42");
            assert_eq!(
                parse_sql(&sql).unwrap(),
                Command::UpdateStatus { id: 42, status }
            );
        }
        assert!(matches!(
            parse_sql("UPDATE bookings SET status = 'done' WHERE id = 42"),
            Err(SqlError::Parse(_))
        ));
    }

    #[test]
    fn status_cannot_ride_along() {
        let err = parse_sql(
            "UPDATE bookings SET status = 'finished', cleaner_finished = true WHERE id = 1",
        )
        .unwrap_err();
        assert!(matches!(err, SqlError::Unsupported(_)));
    }

    #[test]
    fn parse_progress_update() {
        assert_eq!(
            parse_sql("UPDATE bookings SET cleaner_started = true WHERE id = 3").unwrap(),
            Command::UpdateProgress {
                id: 3,
                started: Some(true),
                finished: None
            }
        );
        assert_eq!(
            parse_sql(
                "UPDATE bookings SET cleaner_started = 'f', cleaner_finished = TRUE WHERE id = 3"
            )
            .unwrap(),
            Command::UpdateProgress {
                id: 3,
                started: Some(false),
                finished: Some(true)
            }
        );
    }

    #[test]
    fn immutable_columns_rejected() {
        for column in ["scheduled_at = 5", "price = 10", "address = 'x'"] {
            let sql = format!("UPDATE bookings SET {column} WHERE id = 1");
            assert!(
                matches!(parse_sql(&sql), Err(SqlError::ReadOnlyColumn(_))),
                "{sql}"
            );
        }
    }

    #[test]
    fn parse_evidence_array_and_json() {
        assert_eq!(
            parse_sql(
                "UPDATE bookings SET evidence_before = ARRAY['https://x/1.jpg', 'https://x/2.jpg'] WHERE id = 9"
            )
            .unwrap(),
            Command::UpdateEvidence {
                id: 9,
                phase: EvidencePhase::Before,
                refs: vec!["https://x/1.jpg".into(), "https://x/2.jpg".into()],
            }
        );
        assert_eq!(
            parse_sql(r#"UPDATE bookings SET evidence_after = '["a","b"]' WHERE id = 9"#).unwrap(),
            Command::UpdateEvidence {
                id: 9,
                phase: EvidencePhase::After,
                refs: vec!["a".into(), "b".into()],
            }
        );
        // Empty lists parse; the engine rejects them.
        assert_eq!(
            parse_sql("UPDATE bookings SET evidence_after = '[]' WHERE id = 9").unwrap(),
            Command::UpdateEvidence {
                id: 9,
                phase: EvidencePhase::After,
                refs: vec![],
            }
        );
        assert!(matches!(
            parse_sql("UPDATE bookings SET evidence_after = 'not json' WHERE id = 9"),
            Err(SqlError::Parse(_))
        ));
    }

    #[test]
    fn update_requires_id() {
        assert!(matches!(
            parse_sql("UPDATE bookings SET status = 'accepted'"),
            Err(SqlError::MissingFilter("id"))
        ));
        assert!(matches!(
            parse_sql("UPDATE services SET status = 'accepted' WHERE id = 1"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn parse_deletes() {
        assert_eq!(
            parse_sql("DELETE FROM bookings WHERE id = 4").unwrap(),
            Command::DeleteBooking { id: 4 }
        );
        assert_eq!(
            parse_sql("DELETE FROM notifications WHERE booking_id = 4").unwrap(),
            Command::DismissNotification { booking_id: 4 }
        );
        assert!(matches!(
            parse_sql("DELETE FROM notifications WHERE id = 4"),
            Err(SqlError::MissingFilter("booking_id"))
        ));
    }

    #[test]
    fn parse_selects() {
        assert_eq!(
            parse_sql("SELECT * FROM bookings").unwrap(),
            Command::SelectBookings { id: None }
        );
        assert_eq!(
            parse_sql("SELECT * FROM bookings WHERE id = 12").unwrap(),
            Command::SelectBookings { id: Some(12) }
        );
        assert_eq!(
            parse_sql("SELECT * FROM notifications").unwrap(),
            Command::SelectNotifications {
                page: None,
                page_size: None
            }
        );
        assert_eq!(
            parse_sql("SELECT * FROM notifications WHERE page = 2 AND page_size = 5").unwrap(),
            Command::SelectNotifications {
                page: Some(2),
                page_size: Some(5)
            }
        );
    }

    #[test]
    fn parse_conflict_check() {
        let sql = "SELECT * FROM conflicts WHERE service_id = 5 AND requester_id = 7 \
                   AND scheduled_at = '2025-06-01T11:30:00Z'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectConflicts {
                service_id: 5,
                requester_id: 7,
                scheduled_at: 1_748_777_400_000,
            }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM conflicts WHERE service_id = 5 AND requester_id = 7"),
            Err(SqlError::MissingFilter("scheduled_at"))
        ));
    }

    #[test]
    fn select_filters_are_strict() {
        assert!(matches!(
            parse_sql("SELECT * FROM bookings WHERE status = 'pending'"),
            Err(SqlError::UnknownColumn(_))
        ));
        assert!(matches!(
            parse_sql("SELECT * FROM bookings WHERE id > 3"),
            Err(SqlError::Unsupported(_))
        ));
    }

    #[test]
    fn result_shapes() {
        assert_eq!(
            result_shape("SELECT * FROM bookings WHERE id = $1"),
            Some(ResultShape::Bookings)
        );
        assert_eq!(
            result_shape("UPDATE bookings SET status = $1 WHERE id = $2"),
            Some(ResultShape::Bookings)
        );
        assert_eq!(
            result_shape("SELECT * FROM notifications"),
            Some(ResultShape::Notifications)
        );
        assert_eq!(
            result_shape("SELECT * FROM conflicts WHERE service_id = $1"),
            Some(ResultShape::Conflicts)
        );
        assert_eq!(result_shape("DELETE FROM bookings WHERE id = $1"), None);
    }

    #[test]
    fn parse_unknown_and_empty() {
        assert!(matches!(
            parse_sql("SELECT * FROM services"),
            Err(SqlError::UnknownTable(_))
        ));
        assert!(parse_sql("").is_err());
        assert!(matches!(
            parse_sql("CREATE TABLE t (a INT)"),
            Err(SqlError::Unsupported(_))
        ));
    }
}
