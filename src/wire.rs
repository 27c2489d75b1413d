use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::warn;

use crate::auth::StaybookAuthSource;
use crate::engine::{Confirmation, Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

pub struct StaybookHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<StaybookQueryParser>,
    admin_user: String,
}

impl StaybookHandler {
    pub fn new(tenant_manager: Arc<TenantManager>, admin_user: String) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(StaybookQueryParser),
            admin_user,
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error(e.sqlstate(), e.to_string()))
    }

    fn authorize<C: ClientInfo>(&self, client: &C, cmd: &Command) -> PgWireResult<()> {
        if !cmd.requires_admin() {
            return Ok(());
        }
        let user = client.metadata().get("user").map(String::as_str).unwrap_or("");
        if user == self.admin_user {
            return Ok(());
        }
        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
        warn!("user {user:?} refused {}", observability::command_label(cmd));
        Err(user_error(
            "42501",
            "settings and vouchers can only be changed by the admin user".to_string(),
        ))
    }

    /// Parse, authorize, and run one statement, recording query metrics.
    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Response> {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.authorize(client, &cmd)?;

        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(&engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertHomestay { id, host_id, name } => {
                engine.create_homestay(id, host_id, name).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertRoom { id, homestay_id, spec } => {
                engine.create_room(id, homestay_id, spec).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::UpdateRoom { id, spec } => {
                engine.update_room(id, spec).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::DeleteListing { id } => {
                engine.delete_listing(id).await.map_err(engine_err)?;
                Ok(deleted())
            }
            Command::InsertRule {
                id,
                listing_id,
                start,
                end,
                blocking,
            } => {
                engine
                    .add_rule(id, listing_id, start, end, blocking)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::DeleteRule { id } => {
                engine.remove_rule(id).await.map_err(engine_err)?;
                Ok(deleted())
            }
            Command::InsertHold {
                id,
                room_id,
                start,
                end,
                stay,
                expires_at,
            } => {
                engine
                    .place_hold(id, room_id, start, end, stay, expires_at)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::DeleteHold { id } => {
                engine.release_hold(id).await.map_err(engine_err)?;
                Ok(deleted())
            }
            Command::ConfirmHold { hold_id, payment_ref } => {
                match engine.confirm_hold(hold_id, payment_ref).await.map_err(engine_err)? {
                    Confirmation::Confirmed(_) => Ok(inserted(1)),
                    // A replayed webhook: report success without a new row.
                    Confirmation::AlreadyConfirmed(_) => Ok(inserted(0)),
                }
            }
            Command::InsertBooking {
                id,
                room_id,
                start,
                end,
                stay,
                payment_ref,
            } => {
                engine
                    .confirm_booking(id, room_id, start, end, stay, payment_ref)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::BatchInsertBookings { bookings } => {
                let count = bookings.len();
                engine.batch_confirm_bookings(bookings).await.map_err(engine_err)?;
                Ok(inserted(count))
            }
            Command::DeleteBooking { id } => {
                engine.cancel_booking(id).await.map_err(engine_err)?;
                Ok(deleted())
            }
            Command::InsertVoucher { voucher } => {
                engine.create_voucher(voucher).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::DeleteVoucher { code } => {
                engine.delete_voucher(&code).await.map_err(engine_err)?;
                Ok(deleted())
            }
            Command::UpdateSettings { changes } => {
                let count = changes.len();
                engine.update_settings(changes).await.map_err(engine_err)?;
                Ok(inserted(count))
            }
            Command::SelectAvailability {
                room_id,
                start,
                end,
                min_nights,
            } => {
                let spans = engine
                    .compute_availability(room_id, start, end, min_nights)
                    .await
                    .map_err(engine_err)?;
                let rid = room_id.to_string();
                rows("availability", &spans, |enc, span| {
                    enc.encode_field(&rid)?;
                    enc.encode_field(&span.start)?;
                    enc.encode_field(&span.end)
                })
            }
            Command::SelectHomestayAvailability {
                homestay_id,
                start,
                end,
                min_rooms,
                min_nights,
            } => {
                let spans = engine
                    .compute_homestay_availability(homestay_id, start, end, min_rooms, min_nights)
                    .await
                    .map_err(engine_err)?;
                let hid = homestay_id.to_string();
                rows("homestay_availability", &spans, |enc, span| {
                    enc.encode_field(&hid)?;
                    enc.encode_field(&span.start)?;
                    enc.encode_field(&span.end)
                })
            }
            Command::SelectVacancies {
                start,
                end,
                guests,
                homestay_id,
            } => {
                let vacancies = engine
                    .search_vacancies(start, end, guests, homestay_id)
                    .await
                    .map_err(engine_err)?;
                rows("vacancies", &vacancies, |enc, v| {
                    enc.encode_field(&v.room.id.to_string())?;
                    enc.encode_field(&v.room.homestay_id.to_string())?;
                    enc.encode_field(&v.room.name)?;
                    enc.encode_field(&(v.room.max_guests as i64))?;
                    enc.encode_field(&v.quote.nights)?;
                    enc.encode_field(&v.quote.subtotal)?;
                    enc.encode_field(&v.quote.service_fee)?;
                    enc.encode_field(&v.quote.total)
                })
            }
            Command::SelectQuote {
                room_id,
                start,
                end,
                voucher,
            } => {
                let quote = engine
                    .quote_stay(room_id, start, end, voucher.as_deref())
                    .await
                    .map_err(engine_err)?;
                let rid = room_id.to_string();
                rows("quote", std::slice::from_ref(&quote), |enc, q| {
                    enc.encode_field(&rid)?;
                    encode_quote(enc, q)
                })
            }
            Command::SelectCalendar { room_id, year, month } => {
                let days = engine
                    .room_calendar(room_id, year, month)
                    .await
                    .map_err(engine_err)?;
                rows("calendar", &days, |enc, day| {
                    enc.encode_field(&day.date.to_string())?;
                    enc.encode_field(&(day.week as i64))?;
                    enc.encode_field(&(day.column as i64))?;
                    enc.encode_field(&day.status.as_str().to_string())
                })
            }
            Command::SelectHomestays { host_id } => {
                let homestays = engine.list_homestays(host_id.as_deref()).await;
                rows("homestays", &homestays, |enc, h| {
                    enc.encode_field(&h.id.to_string())?;
                    enc.encode_field(&h.host_id)?;
                    enc.encode_field(&h.name)?;
                    enc.encode_field(&(h.rooms as i64))
                })
            }
            Command::SelectRooms { homestay_id } => {
                let rooms = engine.list_rooms(homestay_id).await;
                rows("rooms", &rooms, |enc, r| {
                    enc.encode_field(&r.id.to_string())?;
                    enc.encode_field(&r.homestay_id.to_string())?;
                    enc.encode_field(&r.name)?;
                    enc.encode_field(&r.price_per_night)?;
                    enc.encode_field(&(r.max_guests as i64))?;
                    enc.encode_field(&(r.units as i64))?;
                    enc.encode_field(&r.turnover)
                })
            }
            Command::SelectRules { listing_id } => {
                let rules = engine.get_rules(listing_id).await.map_err(engine_err)?;
                rows("rules", &rules, |enc, r| {
                    enc.encode_field(&r.id.to_string())?;
                    enc.encode_field(&r.listing_id.to_string())?;
                    enc.encode_field(&r.start)?;
                    enc.encode_field(&r.end)?;
                    enc.encode_field(&r.blocking)
                })
            }
            Command::SelectHolds { room_id } => {
                let holds = engine.get_holds(room_id).await.map_err(engine_err)?;
                rows("holds", &holds, |enc, h| {
                    enc.encode_field(&h.id.to_string())?;
                    enc.encode_field(&h.room_id.to_string())?;
                    enc.encode_field(&h.start)?;
                    enc.encode_field(&h.end)?;
                    enc.encode_field(&h.expires_at)?;
                    enc.encode_field(&h.stay.guest)?;
                    enc.encode_field(&(h.stay.guests as i64))?;
                    enc.encode_field(&h.stay.quote.total)?;
                    enc.encode_field(&quote_json(&h.stay.quote)?)
                })
            }
            Command::SelectBookings { filter } => {
                let bookings = engine.list_bookings(filter).await;
                rows("bookings", &bookings, |enc, b| {
                    enc.encode_field(&b.id.to_string())?;
                    enc.encode_field(&b.room_id.to_string())?;
                    enc.encode_field(&b.homestay_id.to_string())?;
                    enc.encode_field(&b.start)?;
                    enc.encode_field(&b.end)?;
                    enc.encode_field(&b.stay.guest)?;
                    enc.encode_field(&(b.stay.guests as i64))?;
                    enc.encode_field(&b.stay.quote.total)?;
                    enc.encode_field(&b.payment_ref)?;
                    enc.encode_field(&quote_json(&b.stay.quote)?)
                })
            }
            Command::SelectVouchers => {
                let vouchers = engine.list_vouchers().await;
                rows("vouchers", &vouchers, |enc, v| {
                    enc.encode_field(&v.voucher.code)?;
                    enc.encode_field(&v.voucher.kind.label().to_string())?;
                    enc.encode_field(&v.voucher.kind.amount())?;
                    enc.encode_field(&v.voucher.usage_limit.map(i64::from))?;
                    enc.encode_field(&i64::from(v.used))?;
                    enc.encode_field(&v.remaining.map(i64::from))?;
                    enc.encode_field(&v.voucher.expires_at)?;
                    enc.encode_field(&v.voucher.min_subtotal)
                })
            }
            Command::SelectSettings => {
                let s = engine.settings().await;
                let pairs = [
                    ("currency", s.currency.clone()),
                    ("service_fee", s.service_fee.to_string()),
                    ("commission_bps", s.commission_bps.to_string()),
                    ("hold_ttl", s.hold_ttl_ms.to_string()),
                    ("week_start", s.week_start.as_str().to_string()),
                ];
                rows("settings", &pairs, |enc, (key, value)| {
                    enc.encode_field(&key.to_string())?;
                    enc.encode_field(value)
                })
            }
            Command::SelectRevenue { host_id, window } => {
                let report = engine
                    .revenue(host_id.as_deref(), window)
                    .await
                    .map_err(engine_err)?;
                rows("revenue", &report, |enc, r| {
                    enc.encode_field(&r.homestay_id.to_string())?;
                    enc.encode_field(&r.host_id)?;
                    enc.encode_field(&(r.bookings as i64))?;
                    enc.encode_field(&r.nights)?;
                    enc.encode_field(&r.gross)?;
                    enc.encode_field(&r.discounts)?;
                    enc.encode_field(&r.service_fees)?;
                    enc.encode_field(&r.commission)?;
                    enc.encode_field(&r.host_payout)
                })
            }
        }
    }
}

fn inserted(rows: usize) -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(rows))
}

fn deleted() -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(1))
}

fn encode_quote(enc: &mut DataRowEncoder, q: &Quote) -> PgWireResult<()> {
    enc.encode_field(&q.nights)?;
    enc.encode_field(&q.nightly_rate)?;
    enc.encode_field(&q.subtotal)?;
    enc.encode_field(&q.discount)?;
    enc.encode_field(&q.service_fee)?;
    enc.encode_field(&q.total)?;
    enc.encode_field(&q.commission)?;
    enc.encode_field(&q.host_payout)?;
    enc.encode_field(&q.voucher)
}

fn quote_json(q: &Quote) -> PgWireResult<String> {
    serde_json::to_string(q).map_err(|e| user_error("XX000", format!("encoding quote: {e}")))
}

/// Encode `items` as a result set with the schema of `table`.
fn rows<T>(
    table: &str,
    items: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(result_schema(table));
    let data: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(data))))
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn text(name: &str) -> FieldInfo {
    field(name, Type::VARCHAR)
}

fn int8(name: &str) -> FieldInfo {
    field(name, Type::INT8)
}

/// Column layout of every readable table. Empty for writes.
fn result_schema(table: &str) -> Vec<FieldInfo> {
    match table {
        "availability" => vec![text("room_id"), int8("start"), int8("end")],
        "homestay_availability" => vec![text("homestay_id"), int8("start"), int8("end")],
        "vacancies" => vec![
            text("room_id"),
            text("homestay_id"),
            text("name"),
            int8("max_guests"),
            int8("nights"),
            int8("subtotal"),
            int8("service_fee"),
            int8("total"),
        ],
        "quote" => vec![
            text("room_id"),
            int8("nights"),
            int8("nightly_rate"),
            int8("subtotal"),
            int8("discount"),
            int8("service_fee"),
            int8("total"),
            int8("commission"),
            int8("host_payout"),
            text("voucher"),
        ],
        "calendar" => vec![text("date"), int8("week"), int8("column"), text("status")],
        "homestays" => vec![text("id"), text("host_id"), text("name"), int8("rooms")],
        "rooms" => vec![
            text("id"),
            text("homestay_id"),
            text("name"),
            int8("price_per_night"),
            int8("max_guests"),
            int8("units"),
            int8("turnover"),
        ],
        "rules" => vec![
            text("id"),
            text("listing_id"),
            int8("start"),
            int8("end"),
            field("blocking", Type::BOOL),
        ],
        "holds" => vec![
            text("id"),
            text("room_id"),
            int8("start"),
            int8("end"),
            int8("expires_at"),
            text("guest"),
            int8("guests"),
            int8("total"),
            field("quote", Type::JSON),
        ],
        "bookings" => vec![
            text("id"),
            text("room_id"),
            text("homestay_id"),
            int8("start"),
            int8("end"),
            text("guest"),
            int8("guests"),
            int8("total"),
            text("payment_ref"),
            field("quote", Type::JSON),
        ],
        "vouchers" => vec![
            text("code"),
            text("kind"),
            int8("amount"),
            int8("usage_limit"),
            int8("used"),
            int8("remaining"),
            int8("expires_at"),
            int8("min_subtotal"),
        ],
        "settings" => vec![text("key"), text("value")],
        "revenue" => vec![
            text("homestay_id"),
            text("host_id"),
            int8("bookings"),
            int8("nights"),
            int8("gross"),
            int8("discounts"),
            int8("service_fees"),
            int8("commission"),
            int8("host_payout"),
        ],
        _ => vec![],
    }
}

fn statement_schema(sql: &str) -> Vec<FieldInfo> {
    sql::select_table(sql).map(|t| result_schema(&t)).unwrap_or_default()
}

#[async_trait]
impl SimpleQueryHandler for StaybookHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct StaybookQueryParser;

#[async_trait]
impl QueryParser for StaybookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(statement_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for StaybookHandler {
    type Statement = String;
    type QueryParser = StaybookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(client, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            statement_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(statement_schema(
            &target.statement.statement,
        )))
    }
}

/// Every `$N` placeholder outside quoted literals and identifiers, as the
/// byte range it covers and its number.
fn placeholders(sql: &str) -> Vec<(std::ops::Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote is an escaped one and stays inside.
            Some(q) if b == q => {
                if bytes.get(i + 1) == Some(&q) {
                    i += 1;
                } else {
                    quote = None;
                }
            }
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'$' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end > start
                    && let Ok(n) = sql[start..end].parse::<usize>()
                {
                    found.push((i..end, n));
                    i = end;
                    continue;
                }
            }
            None => {}
        }
        i += 1;
    }
    found
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute(&portal.statement.statement, &params)
}

/// One pass over the statement as written, so bound values are never
/// rescanned. Placeholders without a bound value are left alone.
fn substitute(sql: &str, params: &[Option<String>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        result.push_str(&sql[copied..range.start]);
        match param {
            Some(text) => {
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = range.end;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct StaybookFactory {
    handler: Arc<StaybookHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<StaybookAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl StaybookFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String, admin_user: String) -> Self {
        let auth_source = StaybookAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(StaybookHandler::new(tenant_manager, admin_user)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for StaybookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    admin_user: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = StaybookFactory::new(tenant_manager, password, admin_user);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error("P0001", e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
