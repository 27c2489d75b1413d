use sqlparser::ast::{
    self, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{BatchBooking, BookingFilter, StayRequest};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertHomestay {
        id: Ulid,
        host_id: String,
        name: Option<String>,
    },
    InsertRoom {
        id: Ulid,
        homestay_id: Ulid,
        spec: RoomSpec,
    },
    UpdateRoom {
        id: Ulid,
        spec: RoomSpec,
    },
    DeleteListing {
        id: Ulid,
    },
    InsertRule {
        id: Ulid,
        listing_id: Ulid,
        start: Ms,
        end: Ms,
        blocking: bool,
    },
    DeleteRule {
        id: Ulid,
    },
    InsertHold {
        id: Ulid,
        room_id: Ulid,
        start: Ms,
        end: Ms,
        stay: StayRequest,
        expires_at: Option<Ms>,
    },
    DeleteHold {
        id: Ulid,
    },
    ConfirmHold {
        hold_id: Ulid,
        payment_ref: String,
    },
    InsertBooking {
        id: Ulid,
        room_id: Ulid,
        start: Ms,
        end: Ms,
        stay: StayRequest,
        payment_ref: Option<String>,
    },
    BatchInsertBookings {
        bookings: Vec<BatchBooking>,
    },
    DeleteBooking {
        id: Ulid,
    },
    InsertVoucher {
        voucher: Voucher,
    },
    DeleteVoucher {
        code: String,
    },
    UpdateSettings {
        changes: Vec<(String, String)>,
    },
    SelectAvailability {
        room_id: Ulid,
        start: Ms,
        end: Ms,
        min_nights: Option<i64>,
    },
    SelectHomestayAvailability {
        homestay_id: Ulid,
        start: Ms,
        end: Ms,
        min_rooms: usize,
        min_nights: Option<i64>,
    },
    SelectVacancies {
        start: Ms,
        end: Ms,
        guests: u32,
        homestay_id: Option<Ulid>,
    },
    SelectQuote {
        room_id: Ulid,
        start: Ms,
        end: Ms,
        voucher: Option<String>,
    },
    SelectCalendar {
        room_id: Ulid,
        year: i32,
        month: u32,
    },
    SelectHomestays {
        host_id: Option<String>,
    },
    SelectRooms {
        homestay_id: Option<Ulid>,
    },
    SelectRules {
        listing_id: Ulid,
    },
    SelectHolds {
        room_id: Ulid,
    },
    SelectBookings {
        filter: BookingFilter,
    },
    SelectVouchers,
    SelectSettings,
    SelectRevenue {
        host_id: Option<String>,
        window: Option<(Ms, Ms)>,
    },
}

impl Command {
    /// Settings and vouchers are back-office writes.
    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Command::InsertVoucher { .. } | Command::DeleteVoucher { .. } | Command::UpdateSettings { .. }
        )
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("one statement per query".into()));
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// The table a SELECT reads from, if `sql` is one. Placeholders are left
/// unresolved, so this works on prepared statements.
pub fn select_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let Some(Statement::Query(query)) = stmts.first() else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    table_factor_name(&select.from.first()?.relation).ok()
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_all_insert_rows(insert)?;

    match table.as_str() {
        "settings" => {
            let mut changes = Vec::with_capacity(rows.len());
            for row in &rows {
                if row.len() < 2 {
                    return Err(SqlError::WrongArity("settings", 2, row.len()));
                }
                changes.push((parse_text(&row[0])?, parse_text(&row[1])?));
            }
            return Ok(Command::UpdateSettings { changes });
        }
        "bookings" if rows.len() > 1 => return parse_batch_bookings(&rows),
        _ => {}
    }

    if rows.len() > 1 {
        return Err(SqlError::Unsupported(format!("multi-row INSERT into {table}")));
    }
    let values = &rows[0];

    match table.as_str() {
        "homestays" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("homestays", 2, values.len()));
            }
            Ok(Command::InsertHomestay {
                id: parse_ulid(&values[0])?,
                host_id: parse_text(&values[1])?,
                name: opt(values, 2, parse_text_or_null)?.flatten(),
            })
        }
        "rooms" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("rooms", 5, values.len()));
            }
            Ok(Command::InsertRoom {
                id: parse_ulid(&values[0])?,
                homestay_id: parse_ulid(&values[1])?,
                spec: parse_room_spec(&values[2..])?,
            })
        }
        "room_updates" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("room_updates", 5, values.len()));
            }
            Ok(Command::UpdateRoom {
                id: parse_ulid(&values[0])?,
                spec: parse_room_spec(&values[1..])?,
            })
        }
        "rules" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("rules", 5, values.len()));
            }
            Ok(Command::InsertRule {
                id: parse_ulid(&values[0])?,
                listing_id: parse_ulid(&values[1])?,
                start: parse_i64(&values[2])?,
                end: parse_i64(&values[3])?,
                blocking: parse_bool(&values[4])?,
            })
        }
        "holds" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("holds", 6, values.len()));
            }
            Ok(Command::InsertHold {
                id: parse_ulid(&values[0])?,
                room_id: parse_ulid(&values[1])?,
                start: parse_i64(&values[2])?,
                end: parse_i64(&values[3])?,
                stay: StayRequest {
                    guest: parse_text(&values[4])?,
                    guests: parse_u32(&values[5])?,
                    voucher: opt(values, 6, parse_text_or_null)?.flatten(),
                },
                expires_at: opt(values, 7, parse_i64_or_null)?.flatten(),
            })
        }
        "confirmations" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("confirmations", 2, values.len()));
            }
            Ok(Command::ConfirmHold {
                hold_id: parse_ulid(&values[0])?,
                payment_ref: parse_text(&values[1])?,
            })
        }
        "bookings" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("bookings", 6, values.len()));
            }
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                room_id: parse_ulid(&values[1])?,
                start: parse_i64(&values[2])?,
                end: parse_i64(&values[3])?,
                stay: StayRequest {
                    guest: parse_text(&values[4])?,
                    guests: parse_u32(&values[5])?,
                    voucher: opt(values, 6, parse_text_or_null)?.flatten(),
                },
                payment_ref: opt(values, 7, parse_text_or_null)?.flatten(),
            })
        }
        "vouchers" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("vouchers", 5, values.len()));
            }
            let amount = parse_i64(&values[2])?;
            let kind = match parse_text(&values[1])?.to_lowercase().as_str() {
                "percentage" | "percent" => DiscountKind::Percentage {
                    basis_points: u32::try_from(amount)
                        .map_err(|_| SqlError::Parse(format!("{amount} out of basis point range")))?,
                },
                "fixed" => DiscountKind::Fixed { amount },
                other => {
                    return Err(SqlError::Parse(format!(
                        "voucher kind must be percentage or fixed, got {other}"
                    )));
                }
            };
            let usage_limit = parse_i64_or_null(&values[3])?
                .map(|n| u32::try_from(n).map_err(|_| SqlError::Parse(format!("{n} out of u32 range"))))
                .transpose()?;
            Ok(Command::InsertVoucher {
                voucher: Voucher {
                    code: parse_text(&values[0])?,
                    kind,
                    usage_limit,
                    expires_at: parse_i64(&values[4])?,
                    min_subtotal: opt(values, 5, parse_i64_or_null)?.flatten().unwrap_or(0),
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `(name, price_per_night, max_guests[, units[, turnover]])`
fn parse_room_spec(values: &[Expr]) -> Result<RoomSpec, SqlError> {
    Ok(RoomSpec {
        name: parse_text_or_null(&values[0])?,
        price_per_night: parse_i64(&values[1])?,
        max_guests: parse_u32(&values[2])?,
        units: opt(values, 3, parse_u32)?.unwrap_or(1),
        turnover: opt(values, 4, parse_i64_or_null)?.flatten(),
    })
}

fn parse_batch_bookings(rows: &[Vec<Expr>]) -> Result<Command, SqlError> {
    let mut bookings = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        if row.len() < 6 {
            return Err(SqlError::WrongArity("bookings row", 6, row.len()));
        }
        let at_row = |e: SqlError| SqlError::Parse(format!("row {i}: {e}"));
        if opt(row, 6, parse_text_or_null).map_err(at_row)?.flatten().is_some() {
            return Err(SqlError::Unsupported(
                "vouchers cannot be redeemed in a multi-row booking".into(),
            ));
        }
        bookings.push(BatchBooking {
            id: parse_ulid(&row[0]).map_err(at_row)?,
            room_id: parse_ulid(&row[1]).map_err(at_row)?,
            start: parse_i64(&row[2]).map_err(at_row)?,
            end: parse_i64(&row[3]).map_err(at_row)?,
            guest: parse_text(&row[4]).map_err(at_row)?,
            guests: parse_u32(&row[5]).map_err(at_row)?,
            payment_ref: opt(row, 7, parse_text_or_null).map_err(at_row)?.flatten(),
        });
    }
    Ok(Command::BatchInsertBookings { bookings })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    if table == "vouchers" {
        let code = extract_where_eq(&delete.selection, "code")?;
        return Ok(Command::DeleteVoucher { code: parse_text(code)? });
    }

    let id = parse_ulid(extract_where_eq(&delete.selection, "id")?)?;
    match table.as_str() {
        "homestays" | "rooms" => Ok(Command::DeleteListing { id }),
        "rules" => Ok(Command::DeleteRule { id }),
        "holds" => Ok(Command::DeleteHold { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
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

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        filters.collect(selection)?;
    }

    match table.as_str() {
        "availability" => Ok(Command::SelectAvailability {
            room_id: filters.require("room_id", BinaryOperator::Eq, parse_ulid)?,
            start: filters.require("start", BinaryOperator::GtEq, parse_i64)?,
            end: filters.require("end", BinaryOperator::LtEq, parse_i64)?,
            min_nights: filters.get("min_nights", BinaryOperator::Eq, parse_i64)?,
        }),
        "homestay_availability" => Ok(Command::SelectHomestayAvailability {
            homestay_id: filters.require("homestay_id", BinaryOperator::Eq, parse_ulid)?,
            start: filters.require("start", BinaryOperator::GtEq, parse_i64)?,
            end: filters.require("end", BinaryOperator::LtEq, parse_i64)?,
            min_rooms: filters
                .get("min_rooms", BinaryOperator::Eq, parse_u32)?
                .map_or(1, |n| n as usize),
            min_nights: filters.get("min_nights", BinaryOperator::Eq, parse_i64)?,
        }),
        "vacancies" => Ok(Command::SelectVacancies {
            start: filters.require("start", BinaryOperator::Eq, parse_i64)?,
            end: filters.require("end", BinaryOperator::Eq, parse_i64)?,
            guests: filters.get("guests", BinaryOperator::Eq, parse_u32)?.unwrap_or(1),
            homestay_id: filters.get("homestay_id", BinaryOperator::Eq, parse_ulid)?,
        }),
        "quote" => Ok(Command::SelectQuote {
            room_id: filters.require("room_id", BinaryOperator::Eq, parse_ulid)?,
            start: filters.require("start", BinaryOperator::Eq, parse_i64)?,
            end: filters.require("end", BinaryOperator::Eq, parse_i64)?,
            voucher: filters.get("voucher", BinaryOperator::Eq, parse_text)?,
        }),
        "calendar" => {
            let year = filters.require("year", BinaryOperator::Eq, parse_i64)?;
            let month = filters.require("month", BinaryOperator::Eq, parse_u32)?;
            Ok(Command::SelectCalendar {
                room_id: filters.require("room_id", BinaryOperator::Eq, parse_ulid)?,
                year: i32::try_from(year).map_err(|_| SqlError::Parse(format!("{year} out of year range")))?,
                month,
            })
        }
        "homestays" => Ok(Command::SelectHomestays {
            host_id: filters.get("host_id", BinaryOperator::Eq, parse_text)?,
        }),
        "rooms" => Ok(Command::SelectRooms {
            homestay_id: filters.get("homestay_id", BinaryOperator::Eq, parse_ulid)?,
        }),
        "rules" => Ok(Command::SelectRules {
            listing_id: filters.require("listing_id", BinaryOperator::Eq, parse_ulid)?,
        }),
        "holds" => Ok(Command::SelectHolds {
            room_id: filters.require("room_id", BinaryOperator::Eq, parse_ulid)?,
        }),
        "bookings" => {
            let filter = if let Some(id) = filters.get("room_id", BinaryOperator::Eq, parse_ulid)? {
                BookingFilter::Room(id)
            } else if let Some(id) = filters.get("homestay_id", BinaryOperator::Eq, parse_ulid)? {
                BookingFilter::Homestay(id)
            } else if let Some(host) = filters.get("host_id", BinaryOperator::Eq, parse_text)? {
                BookingFilter::Host(host)
            } else {
                BookingFilter::All
            };
            Ok(Command::SelectBookings { filter })
        }
        "vouchers" => Ok(Command::SelectVouchers),
        "settings" => Ok(Command::SelectSettings),
        "revenue" => {
            let start = filters.get("start", BinaryOperator::GtEq, parse_i64)?;
            let end = filters.get("end", BinaryOperator::LtEq, parse_i64)?;
            let window = match (start, end) {
                (Some(s), Some(e)) => Some((s, e)),
                (None, None) => None,
                (None, Some(_)) => return Err(SqlError::MissingFilter("start")),
                (Some(_), None) => return Err(SqlError::MissingFilter("end")),
            };
            Ok(Command::SelectRevenue {
                host_id: filters.get("host_id", BinaryOperator::Eq, parse_text)?,
                window,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Column comparisons from a WHERE clause joined by AND.
#[derive(Default)]
struct Filters {
    preds: Vec<(String, BinaryOperator, Expr)>,
}

impl Filters {
    fn collect(&mut self, expr: &Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.collect(inner),
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                self.collect(left)?;
                self.collect(right)
            }
            Expr::BinaryOp { left, op, right }
                if matches!(op, BinaryOperator::Eq | BinaryOperator::GtEq | BinaryOperator::LtEq) =>
            {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
                self.preds.push((col, op.clone(), (**right).clone()));
                Ok(())
            }
            _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
        }
    }

    fn get<T>(
        &self,
        col: &'static str,
        op: BinaryOperator,
        parse: fn(&Expr) -> Result<T, SqlError>,
    ) -> Result<Option<T>, SqlError> {
        self.preds
            .iter()
            .find(|(c, o, _)| c == col && *o == op)
            .map(|(_, _, value)| parse(value))
            .transpose()
    }

    fn require<T>(
        &self,
        col: &'static str,
        op: BinaryOperator,
        parse: fn(&Expr) -> Result<T, SqlError>,
    ) -> Result<T, SqlError> {
        self.get(col, op, parse)?.ok_or(SqlError::MissingFilter(col))
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
        TableObject::TableName(name) => object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into())),
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into())),
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert.source.as_ref().ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_eq<'a>(selection: &'a Option<Expr>, col: &'static str) -> Result<&'a Expr, SqlError> {
    match selection.as_ref() {
        Some(Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some(col) => Ok(&**right),
        _ => Err(SqlError::MissingFilter(col)),
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

/// Parse an optional trailing column, if the row has it.
fn opt<T>(values: &[Expr], idx: usize, parse: fn(&Expr) -> Result<T, SqlError>) -> Result<Option<T>, SqlError> {
    values.get(idx).map(parse).transpose()
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => {
                s.trim().parse().map_err(|e| SqlError::Parse(format!("bad i64: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        parse_i64(expr)?
            .checked_neg()
            .ok_or_else(|| SqlError::Parse("number out of range".into()))
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if is_null(expr) { Ok(None) } else { parse_i64(expr).map(Some) }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

/// Strings, plus bare numbers and booleans read as their text.
fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.clone()),
        Some(Value::Boolean(b)) => Ok(b.to_string()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) { Ok(None) } else { parse_text(expr).map(Some) }
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
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const OTHER: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn id() -> Ulid {
        Ulid::from_string(ID).unwrap()
    }

    #[test]
    fn parse_insert_homestay() {
        let sql = format!("INSERT INTO homestays (id, host_id, name) VALUES ('{ID}', 'host-1', 'Pine Lodge')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertHomestay {
                id: id(),
                host_id: "host-1".into(),
                name: Some("Pine Lodge".into()),
            }
        );
    }

    #[test]
    fn parse_insert_room_defaults() {
        let sql = format!(
            "INSERT INTO rooms (id, homestay_id, name, price_per_night, max_guests) VALUES ('{ID}', '{OTHER}', NULL, 12000, 2)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertRoom { homestay_id, spec, .. } => {
                assert_eq!(homestay_id.to_string(), OTHER);
                assert_eq!(
                    spec,
                    RoomSpec {
                        name: None,
                        price_per_night: 12_000,
                        max_guests: 2,
                        units: 1,
                        turnover: None,
                    }
                );
            }
            cmd => panic!("expected InsertRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_room_update_with_units_and_turnover() {
        let sql = format!(
            "INSERT INTO room_updates (room_id, name, price_per_night, max_guests, units, turnover) VALUES ('{ID}', 'Loft', 15000, 3, 2, 7200000)"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateRoom { id: room, spec } => {
                assert_eq!(room, id());
                assert_eq!(spec.units, 2);
                assert_eq!(spec.turnover, Some(7_200_000));
                assert_eq!(spec.name.as_deref(), Some("Loft"));
            }
            cmd => panic!("expected UpdateRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_delete_listings() {
        for table in ["homestays", "rooms"] {
            let sql = format!("DELETE FROM {table} WHERE id = '{ID}'");
            assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteListing { id: id() });
        }
    }

    #[test]
    fn parse_insert_rule() {
        let sql = format!(
            r#"INSERT INTO rules (id, listing_id, start, "end", blocking) VALUES ('{ID}', '{OTHER}', 1000, 2000, true)"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertRule { start, end, blocking, .. } => {
                assert_eq!((start, end), (1000, 2000));
                assert!(blocking);
            }
            cmd => panic!("expected InsertRule, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_hold_with_voucher() {
        let sql = format!(
            r#"INSERT INTO holds (id, room_id, start, "end", guest, guests, voucher) VALUES ('{ID}', '{OTHER}', 1000, 2000, 'Ana', 2, 'summer')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertHold { stay, expires_at, .. } => {
                assert_eq!(
                    stay,
                    StayRequest {
                        guest: "Ana".into(),
                        guests: 2,
                        voucher: Some("summer".into()),
                    }
                );
                assert_eq!(expires_at, None);
            }
            cmd => panic!("expected InsertHold, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_hold_with_expiry_and_no_voucher() {
        let sql = format!(
            r#"INSERT INTO holds (id, room_id, start, "end", guest, guests, voucher, expires_at) VALUES ('{ID}', '{OTHER}', 1000, 2000, 'Ana', 1, NULL, 5000)"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertHold { stay, expires_at, .. } => {
                assert_eq!(stay.voucher, None);
                assert_eq!(expires_at, Some(5000));
            }
            cmd => panic!("expected InsertHold, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_confirmation() {
        let sql = format!("INSERT INTO confirmations (hold_id, payment_ref) VALUES ('{ID}', 'pi_123')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::ConfirmHold {
                hold_id: id(),
                payment_ref: "pi_123".into(),
            }
        );
    }

    #[test]
    fn parse_single_booking_with_payment() {
        let sql = format!(
            r#"INSERT INTO bookings (id, room_id, start, "end", guest, guests, voucher, payment_ref) VALUES ('{ID}', '{OTHER}', 1000, 2000, 'Ana', 2, NULL, 'pi_9')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking { stay, payment_ref, .. } => {
                assert_eq!(stay.voucher, None);
                assert_eq!(payment_ref.as_deref(), Some("pi_9"));
            }
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_batch_bookings() {
        let sql = format!(
            r#"INSERT INTO bookings (id, room_id, start, "end", guest, guests) VALUES ('{ID}', '{OTHER}', 1000, 2000, 'Ana', 1), ('{OTHER}', '{ID}', 3000, 4000, 'Bo', 2)"#
        );
        match parse_sql(&sql).unwrap() {
            Command::BatchInsertBookings { bookings } => {
                assert_eq!(bookings.len(), 2);
                assert_eq!((bookings[0].start, bookings[0].end), (1000, 2000));
                assert_eq!(bookings[1].guest, "Bo");
                assert_eq!(bookings[1].guests, 2);
                assert_eq!(bookings[1].payment_ref, None);
            }
            cmd => panic!("expected BatchInsertBookings, got {cmd:?}"),
        }
    }

    #[test]
    fn batch_bookings_reject_vouchers() {
        let sql = format!(
            r#"INSERT INTO bookings (id, room_id, start, "end", guest, guests, voucher) VALUES ('{ID}', '{OTHER}', 1000, 2000, 'Ana', 1, NULL), ('{OTHER}', '{ID}', 3000, 4000, 'Bo', 2, 'SUMMER')"#
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_voucher_insert_and_delete() {
        let sql = "INSERT INTO vouchers (code, kind, amount, usage_limit, expires_at) VALUES ('summer', 'percentage', 1500, NULL, 99999)";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertVoucher {
                voucher: Voucher {
                    code: "summer".into(),
                    kind: DiscountKind::Percentage { basis_points: 1_500 },
                    usage_limit: None,
                    expires_at: 99_999,
                    min_subtotal: 0,
                },
            }
        );

        let sql = "INSERT INTO vouchers (code, kind, amount, usage_limit, expires_at, min_subtotal) VALUES ('TENOFF', 'fixed', 1000, 5, 99999, 20000)";
        match parse_sql(sql).unwrap() {
            Command::InsertVoucher { voucher } => {
                assert_eq!(voucher.kind, DiscountKind::Fixed { amount: 1_000 });
                assert_eq!(voucher.usage_limit, Some(5));
                assert_eq!(voucher.min_subtotal, 20_000);
            }
            cmd => panic!("expected InsertVoucher, got {cmd:?}"),
        }

        let cmd = parse_sql("DELETE FROM vouchers WHERE code = 'TENOFF'").unwrap();
        assert_eq!(cmd, Command::DeleteVoucher { code: "TENOFF".into() });
        assert!(cmd.requires_admin());
    }

    #[test]
    fn unknown_voucher_kind_errors() {
        let sql = "INSERT INTO vouchers (code, kind, amount, usage_limit, expires_at) VALUES ('X', 'bogo', 1, NULL, 9)";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_multi_row_settings() {
        let sql = "INSERT INTO settings (key, value) VALUES ('currency', 'eur'), ('service_fee', 250)";
        let cmd = parse_sql(sql).unwrap();
        assert_eq!(
            cmd,
            Command::UpdateSettings {
                changes: vec![
                    ("currency".into(), "eur".into()),
                    ("service_fee".into(), "250".into()),
                ],
            }
        );
        assert!(cmd.requires_admin());
    }

    #[test]
    fn parse_select_availability_with_min_nights() {
        let sql = format!(
            r#"SELECT * FROM availability WHERE room_id = '{ID}' AND start >= 1000 AND "end" <= 2000 AND min_nights = 2"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability {
                room_id: id(),
                start: 1000,
                end: 2000,
                min_nights: Some(2),
            }
        );
    }

    #[test]
    fn availability_requires_window() {
        let sql = format!("SELECT * FROM availability WHERE room_id = '{ID}' AND start >= 1000");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("end"))));
    }

    #[test]
    fn parse_homestay_availability_defaults_to_one_room() {
        let sql = format!(
            r#"SELECT * FROM homestay_availability WHERE homestay_id = '{ID}' AND start >= 0 AND "end" <= 10"#
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectHomestayAvailability { min_rooms, min_nights, .. } => {
                assert_eq!(min_rooms, 1);
                assert_eq!(min_nights, None);
            }
            cmd => panic!("expected SelectHomestayAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_vacancies_and_quote() {
        let sql = format!(r#"SELECT * FROM vacancies WHERE start = 10 AND "end" = 20 AND guests = 3 AND homestay_id = '{ID}'"#);
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectVacancies {
                start: 10,
                end: 20,
                guests: 3,
                homestay_id: Some(id()),
            }
        );

        let sql = format!(r#"SELECT * FROM quote WHERE room_id = '{ID}' AND start = 10 AND "end" = 20 AND voucher = 'SUMMER'"#);
        match parse_sql(&sql).unwrap() {
            Command::SelectQuote { voucher, .. } => assert_eq!(voucher.as_deref(), Some("SUMMER")),
            cmd => panic!("expected SelectQuote, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_calendar() {
        let sql = format!("SELECT * FROM calendar WHERE room_id = '{ID}' AND year = 2030 AND month = 3");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectCalendar {
                room_id: id(),
                year: 2030,
                month: 3,
            }
        );
    }

    #[test]
    fn parse_booking_filters() {
        let sql = format!("SELECT * FROM bookings WHERE homestay_id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectBookings {
                filter: BookingFilter::Homestay(id()),
            }
        );
        let sql = "SELECT * FROM bookings WHERE host_id = 'host-1'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectBookings {
                filter: BookingFilter::Host("host-1".into()),
            }
        );
        assert_eq!(
            parse_sql("SELECT * FROM bookings").unwrap(),
            Command::SelectBookings { filter: BookingFilter::All }
        );
    }

    #[test]
    fn parse_revenue_window() {
        let sql = r#"SELECT * FROM revenue WHERE host_id = 'h' AND start >= 0 AND "end" <= 100"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectRevenue {
                host_id: Some("h".into()),
                window: Some((0, 100)),
            }
        );
        let half = "SELECT * FROM revenue WHERE start >= 0";
        assert!(matches!(parse_sql(half), Err(SqlError::MissingFilter("end"))));
        assert_eq!(
            parse_sql("SELECT * FROM revenue").unwrap(),
            Command::SelectRevenue {
                host_id: None,
                window: None,
            }
        );
    }

    #[test]
    fn or_filters_are_rejected() {
        let sql = "SELECT * FROM homestays WHERE host_id = 'a' OR host_id = 'b'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn quoted_numbers_parse() {
        // Extended-protocol parameters arrive as quoted text.
        let sql = format!(
            r#"INSERT INTO rules (id, listing_id, start, "end", blocking) VALUES ('{ID}', '{OTHER}', '1000', '2000', 'false')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertRule { start, end, blocking, .. } => {
                assert_eq!((start, end), (1000, 2000));
                assert!(!blocking);
            }
            cmd => panic!("expected InsertRule, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_wrong_arity_errors() {
        let sql = format!("INSERT INTO holds (id, room_id) VALUES ('{ID}', '{OTHER}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity("holds", 6, 2))));
    }

    #[test]
    fn select_table_ignores_placeholders() {
        let sql = r#"SELECT * FROM availability WHERE room_id = $1 AND start >= $2 AND "end" <= $3"#;
        assert_eq!(select_table(sql).as_deref(), Some("availability"));
        assert_eq!(select_table("DELETE FROM rules WHERE id = $1"), None);
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
