use std::collections::HashMap;

use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::directory::OwnerEntry;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    UpsertOwner {
        entry: OwnerEntry,
    },
    AssignScope {
        owner_id: Ulid,
        scope_id: String,
    },
    UpsertReservation {
        reservation: Reservation,
    },
    SetAvailability {
        owner: OwnerRef,
        start: NaiveDate,
        end: NaiveDate,
        fields: OverrideFields,
        actor: Actor,
    },
    UpdateOverride {
        id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        fields: OverrideFields,
        actor: Actor,
    },
    BlockRanges {
        owner: OwnerRef,
        ranges: Vec<(NaiveDate, NaiveDate)>,
        reason: Option<OverrideReason>,
        actor: Actor,
    },
    SetSpecialPricing {
        owner: OwnerRef,
        ranges: Vec<PriceRange>,
        actor: Actor,
    },
    InitializeDefaults {
        owner: OwnerRef,
        days_ahead: Option<u32>,
    },
    SelectAvailability {
        owner_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    SelectQuote {
        owner_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    SelectPrice {
        owner_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    SelectCalendar {
        owner_id: Ulid,
        year: i32,
        month: u32,
    },
    SelectOverrides {
        owner_id: Ulid,
    },
    Checkpoint,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.eq_ignore_ascii_case("CHECKPOINT") {
        return Ok(Command::Checkpoint);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Column name → value expression for one VALUES row.
type Row<'a> = HashMap<String, &'a Expr>;

/// Column order assumed when an INSERT omits its column list.
fn default_columns(table: &str) -> &'static [&'static str] {
    match table {
        "owners" => &["id", "scope", "parent_id", "base_price", "is_available", "is_deleted"],
        "owner_scopes" => &["owner_id", "scope_id"],
        "reservations" => &["id", "sub_unit_id", "check_in", "check_out", "status"],
        "overrides" => &[
            "owner_id",
            "scope",
            "start_date",
            "end_date",
            "is_available",
            "reason",
            "special_price",
            "weekend_price",
            "actor_id",
            "scope_id",
        ],
        "blocks" => &["owner_id", "scope", "start_date", "end_date", "reason", "actor_id", "scope_id"],
        "special_prices" => &[
            "owner_id",
            "scope",
            "start_date",
            "end_date",
            "weekday_price",
            "weekend_price",
            "actor_id",
            "scope_id",
        ],
        "default_availability" => &["owner_id", "scope", "days_ahead"],
        _ => &[],
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let columns: Vec<String> = if insert.columns.is_empty() {
        default_columns(&table).iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    let rows = extract_all_insert_rows(insert)?
        .iter()
        .map(|values| {
            if values.len() != columns.len() {
                return Err(SqlError::WrongArity(table.clone(), columns.len(), values.len()));
            }
            Ok(columns.iter().cloned().zip(values.iter()).collect::<Row>())
        })
        .collect::<Result<Vec<Row>, SqlError>>()?;

    match table.as_str() {
        "owners" => {
            let row = single_row(&table, &rows)?;
            Ok(Command::UpsertOwner {
                entry: OwnerEntry {
                    id: parse_ulid_expr(required(row, "id")?)?,
                    scope: parse_scope(required(row, "scope")?)?,
                    parent_id: optional(row, "parent_id", parse_ulid_or_null)?.flatten(),
                    base_price: parse_i64_expr(required(row, "base_price")?)?,
                    is_available: optional(row, "is_available", parse_bool)?.unwrap_or(true),
                    is_deleted: optional(row, "is_deleted", parse_bool)?.unwrap_or(false),
                },
            })
        }
        "owner_scopes" => {
            let row = single_row(&table, &rows)?;
            Ok(Command::AssignScope {
                owner_id: parse_ulid_expr(required(row, "owner_id")?)?,
                scope_id: parse_string(required(row, "scope_id")?)?,
            })
        }
        "reservations" => {
            let row = single_row(&table, &rows)?;
            let status = match optional(row, "status", parse_string)? {
                Some(s) => ReservationStatus::parse(&s)
                    .ok_or_else(|| SqlError::Parse(format!("bad reservation status: {s}")))?,
                None => ReservationStatus::Confirmed,
            };
            Ok(Command::UpsertReservation {
                reservation: Reservation {
                    id: parse_ulid_expr(required(row, "id")?)?,
                    sub_unit_id: parse_ulid_expr(required(row, "sub_unit_id")?)?,
                    check_in: parse_date_expr(required(row, "check_in")?)?,
                    check_out: parse_date_expr(required(row, "check_out")?)?,
                    status,
                },
            })
        }
        "overrides" => {
            let row = single_row(&table, &rows)?;
            let fields = OverrideFields {
                is_available: parse_bool(required(row, "is_available")?)?,
                reason: parse_reason(row)?,
                special_price: optional(row, "special_price", parse_i64_or_null)?.flatten(),
                weekend_price: optional(row, "weekend_price", parse_i64_or_null)?.flatten(),
            };
            let start = parse_date_expr(required(row, "start_date")?)?;
            let end = parse_date_expr(required(row, "end_date")?)?;
            let actor = parse_actor(row)?;
            // An explicit id edits that row in place.
            match optional(row, "id", parse_ulid_or_null)?.flatten() {
                Some(id) => Ok(Command::UpdateOverride {
                    id,
                    start,
                    end,
                    fields,
                    actor,
                }),
                None => Ok(Command::SetAvailability {
                    owner: parse_owner(row)?,
                    start,
                    end,
                    fields,
                    actor,
                }),
            }
        }
        "blocks" => {
            let first = rows.first().ok_or_else(|| SqlError::Parse("empty VALUES".into()))?;
            let owner = parse_owner(first)?;
            let reason = parse_reason(first)?;
            let actor = parse_actor(first)?;
            let mut ranges = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                let at_row = |e: SqlError| SqlError::Parse(format!("row {i}: {e}"));
                if parse_owner(row).map_err(at_row)? != owner
                    || parse_reason(row).map_err(at_row)? != reason
                    || parse_actor(row).map_err(at_row)? != actor
                {
                    return Err(SqlError::MixedBatch("blocks"));
                }
                ranges.push((
                    parse_date_expr(required(row, "start_date")?).map_err(at_row)?,
                    parse_date_expr(required(row, "end_date")?).map_err(at_row)?,
                ));
            }
            Ok(Command::BlockRanges {
                owner,
                ranges,
                reason,
                actor,
            })
        }
        "special_prices" => {
            let first = rows.first().ok_or_else(|| SqlError::Parse("empty VALUES".into()))?;
            let owner = parse_owner(first)?;
            let actor = parse_actor(first)?;
            let mut ranges = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                let at_row = |e: SqlError| SqlError::Parse(format!("row {i}: {e}"));
                if parse_owner(row).map_err(at_row)? != owner || parse_actor(row).map_err(at_row)? != actor {
                    return Err(SqlError::MixedBatch("special_prices"));
                }
                ranges.push(PriceRange {
                    start: parse_date_expr(required(row, "start_date")?).map_err(at_row)?,
                    end: parse_date_expr(required(row, "end_date")?).map_err(at_row)?,
                    weekday_price: optional(row, "weekday_price", parse_i64_or_null)?.flatten(),
                    weekend_price: optional(row, "weekend_price", parse_i64_or_null)?.flatten(),
                });
            }
            Ok(Command::SetSpecialPricing { owner, ranges, actor })
        }
        "default_availability" => {
            let row = single_row(&table, &rows)?;
            Ok(Command::InitializeDefaults {
                owner: parse_owner(row)?,
                days_ahead: optional(row, "days_ahead", parse_u32_or_null)?.flatten(),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Row::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters);
    }
    let filter = |col: &'static str| filters.get(col).copied().ok_or(SqlError::MissingFilter(col));

    match table.as_str() {
        "availability" => Ok(Command::SelectAvailability {
            owner_id: parse_ulid_expr(filter("owner_id")?)?,
            check_in: parse_date_expr(filter("check_in")?)?,
            check_out: parse_date_expr(filter("check_out")?)?,
        }),
        "quote" => Ok(Command::SelectQuote {
            owner_id: parse_ulid_expr(filter("owner_id")?)?,
            check_in: parse_date_expr(filter("check_in")?)?,
            check_out: parse_date_expr(filter("check_out")?)?,
        }),
        "price" => Ok(Command::SelectPrice {
            owner_id: parse_ulid_expr(filter("owner_id")?)?,
            check_in: parse_date_expr(filter("check_in")?)?,
            check_out: parse_date_expr(filter("check_out")?)?,
        }),
        "calendar" => {
            let year = parse_i64_expr(filter("year")?)?;
            Ok(Command::SelectCalendar {
                owner_id: parse_ulid_expr(filter("owner_id")?)?,
                year: i32::try_from(year).map_err(|_| SqlError::Parse(format!("{year} out of range")))?,
                month: parse_u32(filter("month")?)?,
            })
        }
        "overrides" => Ok(Command::SelectOverrides {
            owner_id: parse_ulid_expr(filter("owner_id")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Gather `col = value` terms joined by AND. Other predicates are ignored.
fn collect_eq_filters<'a>(expr: &'a Expr, filters: &mut Row<'a>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, filters);
            collect_eq_filters(right, filters);
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if let Some(col) = expr_column_name(left) {
                filters.insert(col, right.as_ref());
            }
        }
        Expr::Nested(inner) => collect_eq_filters(inner, filters),
        _ => {}
    }
}

// ── Row helpers ───────────────────────────────────────────────

fn single_row<'r, 'a>(table: &str, rows: &'r [Row<'a>]) -> Result<&'r Row<'a>, SqlError> {
    match rows {
        [row] => Ok(row),
        _ => Err(SqlError::Unsupported(format!("multi-row INSERT into {table}"))),
    }
}

fn required<'a>(row: &Row<'a>, col: &'static str) -> Result<&'a Expr, SqlError> {
    row.get(col).copied().ok_or(SqlError::MissingColumn(col))
}

fn optional<T>(
    row: &Row<'_>,
    col: &'static str,
    parse: impl Fn(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    row.get(col).copied().map(parse).transpose()
}

fn parse_owner(row: &Row<'_>) -> Result<OwnerRef, SqlError> {
    Ok(OwnerRef {
        scope: parse_scope(required(row, "scope")?)?,
        id: parse_ulid_expr(required(row, "owner_id")?)?,
    })
}

fn parse_actor(row: &Row<'_>) -> Result<Actor, SqlError> {
    Ok(Actor {
        id: parse_ulid_expr(required(row, "actor_id")?)?,
        scope_id: optional(row, "scope_id", parse_string_or_null)?.flatten(),
    })
}

fn parse_reason(row: &Row<'_>) -> Result<Option<OverrideReason>, SqlError> {
    match optional(row, "reason", parse_string_or_null)?.flatten() {
        Some(s) => OverrideReason::parse(&s)
            .map(Some)
            .ok_or_else(|| SqlError::Parse(format!("bad reason: {s}"))),
        None => Ok(None),
    }
}

fn parse_scope(expr: &Expr) -> Result<OwnerScope, SqlError> {
    let s = parse_string(expr)?;
    OwnerScope::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad owner scope: {s}")))
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(&values.rows)
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
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
        Expr::Cast { expr, .. } | Expr::Nested(expr) => extract_value(expr),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_ulid_expr(expr).map(Some)
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

/// ISO `YYYY-MM-DD`, optionally cast (`'2024-01-01'::date`).
fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date '{s}': {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_i64_expr(expr).map(Some)
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_u32(expr).map(Some)
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(String, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
    /// Rows of one batch INSERT name different owners, reasons or actors.
    MixedBatch(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::MixedBatch(t) => write!(f, "{t}: all rows must share owner, reason and actor"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const ACTOR: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn id() -> Ulid {
        Ulid::from_string(ID).unwrap()
    }

    fn actor() -> Ulid {
        Ulid::from_string(ACTOR).unwrap()
    }

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    #[test]
    fn parse_insert_owner() {
        let sql = format!("INSERT INTO owners (id, scope, base_price) VALUES ('{ID}', 'unit', 12000)");
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(
            cmd,
            Command::UpsertOwner {
                entry: OwnerEntry {
                    id: id(),
                    scope: OwnerScope::Unit,
                    parent_id: None,
                    base_price: 12000,
                    is_available: true,
                    is_deleted: false,
                }
            }
        );
    }

    #[test]
    fn parse_insert_owner_positional() {
        let sql = format!("INSERT INTO owners VALUES ('{ID}', 'sub_unit', '{ACTOR}', 80, false, true)");
        match parse_sql(&sql).unwrap() {
            Command::UpsertOwner { entry } => {
                assert_eq!(entry.scope, OwnerScope::SubUnit);
                assert_eq!(entry.parent_id, Some(actor()));
                assert!(!entry.is_available);
                assert!(entry.is_deleted);
            }
            cmd => panic!("expected UpsertOwner, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_scope_and_reservation() {
        let sql = format!("INSERT INTO owner_scopes (owner_id, scope_id) VALUES ('{ID}', 'north')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::AssignScope {
                owner_id: id(),
                scope_id: "north".into()
            }
        );

        let sql = format!(
            "INSERT INTO reservations (id, sub_unit_id, check_in, check_out, status) \
             VALUES ('{ACTOR}', '{ID}', '2024-05-01', '2024-05-03'::date, 'checked_in')"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpsertReservation { reservation } => {
                assert_eq!(reservation.check_in, d(5, 1));
                assert_eq!(reservation.check_out, d(5, 3));
                assert_eq!(reservation.status, ReservationStatus::CheckedIn);
            }
            cmd => panic!("expected UpsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_override() {
        let sql = format!(
            "INSERT INTO overrides (owner_id, scope, start_date, end_date, is_available, reason, special_price, actor_id, scope_id) \
             VALUES ('{ID}', 'unit', '2024-01-01', '2024-01-10', false, 'maintenance', NULL, '{ACTOR}', 'north')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SetAvailability {
                owner: OwnerRef::unit(id()),
                start: d(1, 1),
                end: d(1, 10),
                fields: OverrideFields::blocked(Some(OverrideReason::Maintenance)),
                actor: Actor::scoped(actor(), "north"),
            }
        );
    }

    #[test]
    fn parse_insert_override_with_id_is_update() {
        let sql = format!(
            "INSERT INTO overrides (id, start_date, end_date, is_available, weekend_price, actor_id) \
             VALUES ('{ID}', '2024-02-01', '2024-02-05', true, 180, '{ACTOR}')"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateOverride { id: row, fields, actor: a, .. } => {
                assert_eq!(row, id());
                assert!(fields.is_available);
                assert_eq!(fields.weekend_price, Some(180));
                assert_eq!(a, Actor::unscoped(actor()));
            }
            cmd => panic!("expected UpdateOverride, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_batch_blocks() {
        let sql = format!(
            "INSERT INTO blocks (owner_id, scope, start_date, end_date, reason, actor_id) VALUES \
             ('{ID}', 'sub_unit', '2024-03-01', '2024-03-03', 'owner_blocked', '{ACTOR}'), \
             ('{ID}', 'sub_unit', '2024-03-10', '2024-03-12', 'owner_blocked', '{ACTOR}')"
        );
        match parse_sql(&sql).unwrap() {
            Command::BlockRanges { owner, ranges, reason, .. } => {
                assert_eq!(owner, OwnerRef::sub_unit(id()));
                assert_eq!(ranges, vec![(d(3, 1), d(3, 3)), (d(3, 10), d(3, 12))]);
                assert_eq!(reason, Some(OverrideReason::OwnerBlocked));
            }
            cmd => panic!("expected BlockRanges, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_batch_blocks_mixed_owner_errors() {
        let sql = format!(
            "INSERT INTO blocks (owner_id, scope, start_date, end_date, actor_id) VALUES \
             ('{ID}', 'unit', '2024-03-01', '2024-03-03', '{ACTOR}'), \
             ('{ACTOR}', 'unit', '2024-03-10', '2024-03-12', '{ACTOR}')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::MixedBatch("blocks"))));
    }

    #[test]
    fn parse_special_prices() {
        let sql = format!(
            "INSERT INTO special_prices (owner_id, scope, start_date, end_date, weekday_price, weekend_price, actor_id) VALUES \
             ('{ID}', 'unit', '2024-12-24', '2024-12-26', 300, NULL, '{ACTOR}')"
        );
        match parse_sql(&sql).unwrap() {
            Command::SetSpecialPricing { ranges, .. } => {
                assert_eq!(
                    ranges,
                    vec![PriceRange {
                        start: d(12, 24),
                        end: d(12, 26),
                        weekday_price: Some(300),
                        weekend_price: None,
                    }]
                );
            }
            cmd => panic!("expected SetSpecialPricing, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_default_availability() {
        let sql = format!("INSERT INTO default_availability (owner_id, scope) VALUES ('{ID}', 'unit')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InitializeDefaults {
                owner: OwnerRef::unit(id()),
                days_ahead: None
            }
        );
    }

    #[test]
    fn parse_selects() {
        let sql = format!(
            "SELECT * FROM availability WHERE owner_id = '{ID}' AND check_in = '2024-05-01' AND check_out = '2024-05-04'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability {
                owner_id: id(),
                check_in: d(5, 1),
                check_out: d(5, 4)
            }
        );

        let sql = format!("SELECT * FROM calendar WHERE owner_id = '{ID}' AND year = 2024 AND month = 2");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectCalendar {
                owner_id: id(),
                year: 2024,
                month: 2
            }
        );

        let sql = format!("SELECT date, price FROM quote WHERE owner_id = '{ID}' AND check_in = '2024-05-01' AND check_out = '2024-05-04'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::SelectQuote { .. }));

        let sql = format!("SELECT total FROM price WHERE check_out = '2024-05-04' AND owner_id = '{ID}' AND check_in = '2024-05-01'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectPrice {
                owner_id: id(),
                check_in: d(5, 1),
                check_out: d(5, 4)
            }
        );

        let sql = format!("SELECT * FROM overrides WHERE owner_id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::SelectOverrides { owner_id: id() });
    }

    #[test]
    fn parse_checkpoint() {
        assert_eq!(parse_sql("CHECKPOINT").unwrap(), Command::Checkpoint);
        assert_eq!(parse_sql("checkpoint;").unwrap(), Command::Checkpoint);
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
        assert!(matches!(
            parse_sql(&format!("INSERT INTO foobar (id) VALUES ('{ID}')")),
            Err(SqlError::UnknownTable(_))
        ));
        assert!(matches!(
            parse_sql(&format!("SELECT * FROM availability WHERE owner_id = '{ID}'")),
            Err(SqlError::MissingFilter("check_in"))
        ));
        assert!(matches!(
            parse_sql(&format!("INSERT INTO owners (id, scope) VALUES ('{ID}', 'unit')")),
            Err(SqlError::MissingColumn("base_price"))
        ));
        assert!(matches!(
            parse_sql(&format!("INSERT INTO owners (id, scope) VALUES ('{ID}')")),
            Err(SqlError::WrongArity(..))
        ));
        assert!(parse_sql(&format!(
            "INSERT INTO reservations (id, sub_unit_id, check_in, check_out) VALUES ('{ID}', '{ID}', '2024-13-01', '2024-05-03')"
        ))
        .is_err());
    }
}
