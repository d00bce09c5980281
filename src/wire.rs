use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::StaygridAuthSource;
use crate::directory::{Directory, StoreError};
use crate::engine::{Scheduler, SchedulerError};
use crate::observability::{self, command_label};
use crate::sql::{self, Command};

/// Everything a connection needs: the scheduler, the directory it reads owners and
/// reservations from, and the default seeding horizon.
pub struct Backend {
    pub scheduler: Arc<Scheduler>,
    pub directory: Arc<Directory>,
    pub default_days_ahead: u32,
}

pub struct StaygridHandler {
    backend: Arc<Backend>,
    query_parser: Arc<StaygridQueryParser>,
}

impl StaygridHandler {
    pub fn new(backend: Arc<Backend>) -> Self {
        Self {
            backend,
            query_parser: Arc::new(StaygridQueryParser),
        }
    }

    /// Run one command and record its outcome.
    async fn dispatch(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let scheduler = &self.backend.scheduler;
        let directory = &self.backend.directory;
        match cmd {
            Command::UpsertOwner { entry } => {
                directory.upsert_owner(entry).await.map_err(store_err)?;
                Ok(vec![inserted(1)])
            }
            Command::AssignScope { owner_id, scope_id } => {
                directory.assign_scope(owner_id, scope_id).await.map_err(store_err)?;
                Ok(vec![inserted(1)])
            }
            Command::UpsertReservation { reservation } => {
                directory.upsert_reservation(reservation).await.map_err(store_err)?;
                Ok(vec![inserted(1)])
            }
            Command::SetAvailability {
                owner,
                start,
                end,
                fields,
                actor,
            } => {
                scheduler
                    .set_availability(owner, start, end, fields, &actor)
                    .await
                    .map_err(scheduler_err)?;
                Ok(vec![inserted(1)])
            }
            Command::UpdateOverride {
                id,
                start,
                end,
                fields,
                actor,
            } => {
                scheduler
                    .update_override(id, start, end, fields, &actor)
                    .await
                    .map_err(scheduler_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::BlockRanges {
                owner,
                ranges,
                reason,
                actor,
            } => {
                let written = scheduler
                    .block_date_ranges(owner, &ranges, reason, &actor)
                    .await
                    .map_err(scheduler_err)?;
                Ok(vec![inserted(written.len())])
            }
            Command::SetSpecialPricing {
                owner,
                ranges,
                actor,
            } => {
                let written = scheduler
                    .set_special_pricing(owner, &ranges, &actor)
                    .await
                    .map_err(scheduler_err)?;
                Ok(vec![inserted(written.len())])
            }
            Command::InitializeDefaults { owner, days_ahead } => {
                let days = days_ahead.unwrap_or(self.backend.default_days_ahead);
                let seeded = scheduler
                    .initialize_default_availability(owner, days)
                    .await
                    .map_err(scheduler_err)?;
                Ok(vec![inserted(usize::from(seeded.is_some()))])
            }
            Command::SelectAvailability {
                owner_id,
                check_in,
                check_out,
            } => {
                let available = scheduler
                    .is_available(owner_id, check_in, check_out)
                    .await
                    .map_err(scheduler_err)?;
                let schema = Arc::new(availability_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&owner_id.to_string())?;
                encoder.encode_field(&check_in.to_string())?;
                encoder.encode_field(&check_out.to_string())?;
                encoder.encode_field(&available)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectQuote {
                owner_id,
                check_in,
                check_out,
            } => {
                let quote = scheduler
                    .quote(owner_id, check_in, check_out)
                    .await
                    .map_err(scheduler_err)?;
                let schema = Arc::new(quote_schema());
                let rows: Vec<PgWireResult<_>> = quote
                    .nights
                    .iter()
                    .map(|night| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&night.date.to_string())?;
                        encoder.encode_field(&night.price)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectPrice {
                owner_id,
                check_in,
                check_out,
            } => {
                let quote = scheduler
                    .quote(owner_id, check_in, check_out)
                    .await
                    .map_err(scheduler_err)?;
                let schema = Arc::new(price_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&owner_id.to_string())?;
                encoder.encode_field(&(quote.nights.len() as i64))?;
                encoder.encode_field(&quote.total)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectCalendar {
                owner_id,
                year,
                month,
            } => {
                let days = scheduler
                    .build_month(owner_id, year, month)
                    .await
                    .map_err(scheduler_err)?;
                let schema = Arc::new(calendar_schema());
                let rows: Vec<PgWireResult<_>> = days
                    .values()
                    .map(|day| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&day.date.to_string())?;
                        encoder.encode_field(&day.is_available)?;
                        encoder.encode_field(&day.is_booked)?;
                        encoder.encode_field(&day.is_weekend)?;
                        encoder.encode_field(&day.price)?;
                        encoder.encode_field(&day.reason.map(|r| r.as_str().to_string()))?;
                        encoder.encode_field(&day.override_id.map(|id| id.to_string()))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectOverrides { owner_id } => {
                let overrides = scheduler.list_overrides(owner_id).await;
                let schema = Arc::new(overrides_schema());
                let rows: Vec<PgWireResult<_>> = overrides
                    .iter()
                    .map(|o| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&o.id.to_string())?;
                        encoder.encode_field(&o.owner.id.to_string())?;
                        encoder.encode_field(&o.owner.scope.as_str().to_string())?;
                        encoder.encode_field(&o.span.start.to_string())?;
                        encoder.encode_field(&o.span.end.to_string())?;
                        encoder.encode_field(&o.is_available)?;
                        encoder.encode_field(&o.reason.map(|r| r.as_str().to_string()))?;
                        encoder.encode_field(&o.special_price)?;
                        encoder.encode_field(&o.weekend_price)?;
                        encoder.encode_field(&o.updated_by.map(|id| id.to_string()))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::Checkpoint => {
                scheduler.compact_store().await.map_err(scheduler_err)?;
                directory.compact_journal().await.map_err(store_err)?;
                Ok(vec![Response::Execution(Tag::new("CHECKPOINT"))])
            }
        }
    }
}

fn inserted(rows: usize) -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(rows))
}

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("owner_id", Type::VARCHAR),
        text_field("check_in", Type::VARCHAR),
        text_field("check_out", Type::VARCHAR),
        text_field("available", Type::BOOL),
    ]
}

fn quote_schema() -> Vec<FieldInfo> {
    vec![text_field("date", Type::VARCHAR), text_field("price", Type::INT8)]
}

fn price_schema() -> Vec<FieldInfo> {
    vec![
        text_field("owner_id", Type::VARCHAR),
        text_field("nights", Type::INT8),
        text_field("total", Type::INT8),
    ]
}

fn calendar_schema() -> Vec<FieldInfo> {
    vec![
        text_field("date", Type::VARCHAR),
        text_field("is_available", Type::BOOL),
        text_field("is_booked", Type::BOOL),
        text_field("is_weekend", Type::BOOL),
        text_field("price", Type::INT8),
        text_field("reason", Type::VARCHAR),
        text_field("override_id", Type::VARCHAR),
    ]
}

fn overrides_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("owner_id", Type::VARCHAR),
        text_field("scope", Type::VARCHAR),
        text_field("start_date", Type::VARCHAR),
        text_field("end_date", Type::VARCHAR),
        text_field("is_available", Type::BOOL),
        text_field("reason", Type::VARCHAR),
        text_field("special_price", Type::INT8),
        text_field("weekend_price", Type::INT8),
        text_field("updated_by", Type::VARCHAR),
    ]
}

/// Result columns of a statement, judged from the table it selects from.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let mut tokens = sql.split_whitespace();
    if !tokens
        .next()
        .is_some_and(|t| t.eq_ignore_ascii_case("SELECT"))
    {
        return vec![];
    }
    let table = tokens
        .skip_while(|t| !t.eq_ignore_ascii_case("FROM"))
        .nth(1)
        .map(|t| t.trim_end_matches(';').to_ascii_lowercase());
    match table.as_deref() {
        Some("availability") => availability_schema(),
        Some("quote") => quote_schema(),
        Some("price") => price_schema(),
        Some("calendar") => calendar_schema(),
        Some("overrides") => overrides_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for StaygridHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.dispatch(cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct StaygridQueryParser;

#[async_trait]
impl QueryParser for StaygridQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for StaygridHandler {
    type Statement = String;
    type QueryParser = StaygridQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
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
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.dispatch(cmd).await?;
        Ok(responses.remove(0))
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first, so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct StaygridFactory {
    handler: Arc<StaygridHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<StaygridAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl StaygridFactory {
    pub fn new(backend: Arc<Backend>, password: String) -> Self {
        let auth_source = StaygridAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(StaygridHandler::new(backend)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for StaygridFactory {
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

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    backend: Arc<Backend>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = StaygridFactory::new(backend, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE per scheduler error.
fn sqlstate(e: &SchedulerError) -> &'static str {
    match e {
        SchedulerError::NotFound(_) => "P0002",
        SchedulerError::Overlap { .. } => "23P01",
        SchedulerError::InvalidRange { .. } | SchedulerError::InvalidMonth { .. } => "22008",
        SchedulerError::LimitExceeded(_) => "54000",
        SchedulerError::PersistenceFailure { .. } => "58000",
    }
}

fn scheduler_err(e: SchedulerError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn store_err(e: StoreError) -> PgWireError {
    user_error("22023", e.to_string())
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn sqlstates_by_error_kind() {
        let id = Ulid::new();
        let day = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(sqlstate(&SchedulerError::NotFound(id)), "P0002");
        assert_eq!(sqlstate(&SchedulerError::Overlap { existing: id }), "23P01");
        assert_eq!(
            sqlstate(&SchedulerError::InvalidRange {
                start: day,
                end: day
            }),
            "22008"
        );
        assert_eq!(
            sqlstate(&SchedulerError::InvalidMonth {
                year: 2024,
                month: 13
            }),
            "22008"
        );
        assert_eq!(sqlstate(&SchedulerError::LimitExceeded("x")), "54000");
        assert_eq!(
            sqlstate(&SchedulerError::persistence("quote", "disk gone")),
            "58000"
        );
    }

    #[test]
    fn result_schema_follows_selected_table() {
        let names = |sql: &str| -> Vec<String> {
            result_schema(sql)
                .iter()
                .map(|f| f.name().to_string())
                .collect()
        };
        assert_eq!(
            names("SELECT * FROM quote WHERE owner_id = $1"),
            vec!["date", "price"]
        );
        assert_eq!(names("select total from price;").len(), 3);
        assert_eq!(names("SELECT * FROM calendar WHERE year = 2024").len(), 7);
        assert!(names("INSERT INTO overrides VALUES ($1)").is_empty());
        assert!(names("SELECT * FROM nowhere").is_empty());
    }

    #[test]
    fn count_params_finds_highest_placeholder() {
        assert_eq!(count_params("SELECT 1"), 0);
        assert_eq!(count_params("SELECT * FROM quote WHERE owner_id = $1 AND check_in = $3"), 3);
        assert_eq!(count_params("VALUES ($10, $2)"), 10);
    }
}
