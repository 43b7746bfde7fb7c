use std::fmt::Debug;
use std::io;
use std::ops::Range;
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
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::{self, TidyslotAuthSource};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, ResultShape};
use crate::tenant::TenantManager;

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

pub struct TidyslotHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<TidyslotQueryParser>,
}

impl TidyslotHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(TidyslotQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            user_error("08006", format!("tenant error: {e}"))
        })
    }

    /// The startup user name is the caller's identity.
    fn resolve_identity<C: ClientInfo>(&self, client: &C) -> PgWireResult<Participant> {
        let user = client.metadata().get("user").cloned().unwrap_or_default();
        auth::parse_identity(&user).map_err(|e| {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            tracing::warn!("rejected identity '{user}': {e}");
            user_error("28000", e.to_string())
        })
    }

    /// Parse, execute and record metrics for one statement.
    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Response> {
        let engine = self.resolve_engine(client)?;
        let caller = self.resolve_identity(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;

        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = execute_command(&engine, caller, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }
}

fn requester_only(caller: Participant, what: &str) -> PgWireResult<u64> {
    match caller {
        Participant::Requester { id } => Ok(id),
        Participant::Provider { .. } => Err(engine_err(EngineError::Forbidden(format!(
            "{what} are only available to requesters"
        )))),
    }
}

async fn execute_command(
    engine: &Engine,
    caller: Participant,
    cmd: Command,
) -> PgWireResult<Response> {
    match cmd {
        Command::InsertBooking {
            requester_id,
            request,
        } => {
            if let Some(requester_id) = requester_id
                && caller != (Participant::Requester { id: requester_id })
            {
                return Err(engine_err(EngineError::Forbidden(format!(
                    "{caller} cannot create bookings for requester {requester_id}"
                ))));
            }
            let booking = engine
                .create_booking(caller, request)
                .await
                .map_err(engine_err)?;
            Ok(booking_rows(vec![booking]))
        }
        Command::UpdateStatus { id, status } => {
            let booking = engine
                .advance_booking(id, caller, status)
                .await
                .map_err(engine_err)?;
            Ok(booking_rows(vec![booking]))
        }
        Command::UpdateProgress {
            id,
            started,
            finished,
        } => {
            let booking = engine
                .set_cleaner_progress(id, caller, started, finished)
                .await
                .map_err(engine_err)?;
            Ok(booking_rows(vec![booking]))
        }
        Command::UpdateEvidence { id, phase, refs } => {
            let booking = engine
                .replace_evidence(id, caller, phase, refs)
                .await
                .map_err(engine_err)?;
            Ok(booking_rows(vec![booking]))
        }
        Command::DeleteBooking { id } => {
            engine.cancel_booking(id, caller).await.map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
        }
        Command::SelectBookings { id: Some(id) } => {
            let booking = engine.get_booking(id, caller).await.map_err(engine_err)?;
            Ok(booking_rows(vec![booking]))
        }
        Command::SelectBookings { id: None } => Ok(booking_rows(engine.list_bookings(caller).await)),
        Command::SelectNotifications { page, page_size } => {
            let requester_id = requester_only(caller, "notifications")?;
            let page = engine
                .list_notifications(requester_id, page, page_size)
                .await
                .map_err(engine_err)?;
            Ok(notification_rows(page))
        }
        Command::DismissNotification { booking_id } => {
            let requester_id = requester_only(caller, "notifications")?;
            engine
                .dismiss_notification(requester_id, booking_id)
                .await
                .map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
        }
        Command::SelectConflicts {
            service_id,
            requester_id,
            scheduled_at,
        } => {
            if let Participant::Requester { id } = caller
                && id != requester_id
            {
                return Err(engine_err(EngineError::Forbidden(format!(
                    "{caller} cannot inspect requester {requester_id}'s schedule"
                ))));
            }
            let check = engine
                .check_conflict(service_id, requester_id, scheduled_at)
                .await
                .map_err(engine_err)?;
            Ok(conflict_row(service_id, requester_id, scheduled_at, check))
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::INT8),
        field("service_id", Type::INT8),
        field("requester_id", Type::INT8),
        field("provider_id", Type::INT8),
        field("scheduled_at", Type::INT8),
        field("status", Type::VARCHAR),
        field("address", Type::VARCHAR),
        field("description", Type::VARCHAR),
        field("requester_present", Type::BOOL),
        field("recurring", Type::BOOL),
        field("service_kind", Type::VARCHAR),
        field("payment_method", Type::VARCHAR),
        field("payment_reference", Type::VARCHAR),
        field("card_id", Type::INT8),
        field("cleaner_started", Type::BOOL),
        field("cleaner_finished", Type::BOOL),
        field("evidence_before", Type::VARCHAR),
        field("evidence_after", Type::VARCHAR),
        field("square_meters", Type::INT8),
        field("price", Type::VARCHAR),
        field("created_at", Type::INT8),
        field("updated_at", Type::INT8),
    ]
}

fn notification_schema() -> Vec<FieldInfo> {
    vec![
        field("booking_id", Type::INT8),
        field("service_kind", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("message", Type::VARCHAR),
        field("updated_at", Type::INT8),
        field("total_count", Type::INT8),
        field("total_pages", Type::INT8),
        field("current_page", Type::INT8),
        field("page_size", Type::INT8),
    ]
}

fn conflict_schema() -> Vec<FieldInfo> {
    vec![
        field("service_id", Type::INT8),
        field("requester_id", Type::INT8),
        field("scheduled_at", Type::INT8),
        field("window_start", Type::INT8),
        field("window_end", Type::INT8),
        field("conflicting", Type::BOOL),
        field("conflicting_id", Type::INT8),
    ]
}

fn schema_for(shape: ResultShape) -> Vec<FieldInfo> {
    match shape {
        ResultShape::Bookings => booking_schema(),
        ResultShape::Notifications => notification_schema(),
        ResultShape::Conflicts => conflict_schema(),
    }
}

fn result_schema_for(sql: &str) -> Vec<FieldInfo> {
    sql::result_shape(sql).map(schema_for).unwrap_or_default()
}

/// Ids and counts are far below `i64::MAX`; the casts only change the wire type.
fn int(v: u64) -> i64 {
    v as i64
}

fn evidence_text(refs: &[String]) -> String {
    serde_json::to_string(refs).unwrap_or_else(|_| "[]".into())
}

fn encode_booking(encoder: &mut DataRowEncoder, b: &Booking) -> PgWireResult<()> {
    encoder.encode_field(&int(b.id))?;
    encoder.encode_field(&int(b.service_id))?;
    encoder.encode_field(&int(b.requester_id))?;
    encoder.encode_field(&b.provider_id.map(int))?;
    encoder.encode_field(&b.scheduled_at)?;
    encoder.encode_field(&b.status.as_str())?;
    encoder.encode_field(&b.address)?;
    encoder.encode_field(&b.description)?;
    encoder.encode_field(&b.requester_present)?;
    encoder.encode_field(&b.recurring)?;
    encoder.encode_field(&b.service_kind)?;
    encoder.encode_field(&b.payment_method)?;
    encoder.encode_field(&b.payment_reference)?;
    encoder.encode_field(&b.card_id.map(int))?;
    encoder.encode_field(&b.cleaner_started)?;
    encoder.encode_field(&b.cleaner_finished)?;
    encoder.encode_field(&evidence_text(&b.evidence_before))?;
    encoder.encode_field(&evidence_text(&b.evidence_after))?;
    encoder.encode_field(&i64::from(b.square_meters))?;
    encoder.encode_field(&b.price.to_string())?;
    encoder.encode_field(&b.created_at)?;
    encoder.encode_field(&b.updated_at)?;
    Ok(())
}

fn rows_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn booking_rows(bookings: Vec<Booking>) -> Response {
    let schema = Arc::new(booking_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode_booking(&mut encoder, b)?;
            Ok(encoder.take_row())
        })
        .collect();
    rows_response(schema, rows)
}

fn encode_page_totals(encoder: &mut DataRowEncoder, page: &NotificationPage) -> PgWireResult<()> {
    encoder.encode_field(&int(page.total_count as u64))?;
    encoder.encode_field(&int(page.total_pages as u64))?;
    encoder.encode_field(&i64::from(page.current_page))?;
    encoder.encode_field(&i64::from(page.page_size))?;
    Ok(())
}

/// One row per notice, then a summary row whose notice columns are NULL. The
/// summary is always present, so an empty page still reports its totals.
fn notification_rows(page: NotificationPage) -> Response {
    let schema = Arc::new(notification_schema());
    let mut rows: Vec<PgWireResult<_>> = page
        .items
        .iter()
        .map(|n| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&int(n.booking_id))?;
            encoder.encode_field(&n.service_kind)?;
            encoder.encode_field(&n.status.as_str())?;
            encoder.encode_field(&n.message)?;
            encoder.encode_field(&n.updated_at)?;
            encode_page_totals(&mut encoder, &page)?;
            Ok(encoder.take_row())
        })
        .collect();

    let mut encoder = DataRowEncoder::new(schema.clone());
    let summary = encode_summary(&mut encoder, &page).map(|()| encoder.take_row());
    rows.push(summary);
    rows_response(schema, rows)
}

fn encode_summary(encoder: &mut DataRowEncoder, page: &NotificationPage) -> PgWireResult<()> {
    encoder.encode_field(&None::<i64>)?;
    encoder.encode_field(&None::<&str>)?;
    encoder.encode_field(&None::<&str>)?;
    encoder.encode_field(&None::<&str>)?;
    encoder.encode_field(&None::<i64>)?;
    encode_page_totals(encoder, page)
}

fn encode_conflict(
    encoder: &mut DataRowEncoder,
    service_id: u64,
    requester_id: u64,
    scheduled_at: Ms,
    check: &ConflictCheck,
) -> PgWireResult<()> {
    encoder.encode_field(&int(service_id))?;
    encoder.encode_field(&int(requester_id))?;
    encoder.encode_field(&scheduled_at)?;
    encoder.encode_field(&check.window.start)?;
    encoder.encode_field(&check.window.end)?;
    encoder.encode_field(&check.conflicting.is_some())?;
    encoder.encode_field(&check.conflicting.map(int))?;
    Ok(())
}

fn conflict_row(
    service_id: u64,
    requester_id: u64,
    scheduled_at: Ms,
    check: ConflictCheck,
) -> Response {
    let schema = Arc::new(conflict_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    let row = encode_conflict(&mut encoder, service_id, requester_id, scheduled_at, &check)
        .map(|()| encoder.take_row());
    rows_response(schema, vec![row])
}

#[async_trait]
impl SimpleQueryHandler for TidyslotHandler {
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
pub struct TidyslotQueryParser;

#[async_trait]
impl QueryParser for TidyslotQueryParser {
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
        Ok(result_schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for TidyslotHandler {
    type Statement = String;
    type QueryParser = TidyslotQueryParser;

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
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
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
            result_schema_for(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema_for(
            &target.statement.statement,
        )))
    }
}

/// `$N` placeholders outside quoted literals, as `(byte range, N)`.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            // A doubled quote inside a literal toggles twice and stays inside.
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Ok(n) = sql[start..end].parse::<usize>() {
                    found.push((i..end, n));
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    found
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Inline bound parameters as quoted text literals. Placeholders are located
/// once on the original statement, so a value containing `$1` or a quote is
/// never scanned again.
fn substitute_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|idx| params.get(idx)) else {
            continue;
        };
        result.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
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

pub struct TidyslotFactory {
    handler: Arc<TidyslotHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<TidyslotAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl TidyslotFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(TidyslotHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                TidyslotAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for TidyslotFactory {
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
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(TidyslotFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    let message = match &e {
        EngineError::Persistence(detail) => {
            tracing::error!("storage failure surfaced to client: {detail}");
            "storage failure".to_string()
        }
        other => other.to_string(),
    };
    user_error(e.sqlstate(), message)
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM bookings"), 0);
        assert_eq!(
            count_params("SELECT * FROM conflicts WHERE service_id = $1 AND requester_id = $2 AND scheduled_at = $3"),
            3
        );
        assert_eq!(count_params("UPDATE bookings SET status = $10 WHERE id = $2"), 10);
        assert_eq!(count_params("SELECT '$' FROM bookings"), 0);
    }

    #[test]
    fn substitutes_as_quoted_text() {
        let params: Vec<Option<&[u8]>> = vec![Some(&b"it's"[..]), None, Some(&b"3"[..])];
        let sql = substitute_params("UPDATE t SET a = $1, b = $2 WHERE id = $3", &params);
        assert_eq!(sql, "UPDATE t SET a = 'it''s', b = NULL WHERE id = '3'");
    }

    #[test]
    fn substituted_values_are_never_rescanned() {
        let params: Vec<Option<&[u8]>> =
            vec![Some(&b"5"[..]), Some(&b"https://cdn/x?v=$1&n='o'"[..])];
        let sql = substitute_params(
            "INSERT INTO bookings (service_id, description) VALUES ($1, $2)",
            &params,
        );
        assert_eq!(
            sql,
            "INSERT INTO bookings (service_id, description) VALUES ('5', 'https://cdn/x?v=$1&n=''o''')"
        );
        match sql::parse_sql(&sql).unwrap() {
            Command::InsertBooking { request, .. } => {
                assert_eq!(request.service_id, 5);
                assert_eq!(request.details.description, "https://cdn/x?v=$1&n='o'");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn quote_in_value_cannot_escape_its_literal() {
        let params: Vec<Option<&[u8]>> = vec![Some(&b"1' OR '1'='1"[..])];
        let sql = substitute_params("SELECT * FROM bookings WHERE id = $1", &params);
        assert_eq!(sql, "SELECT * FROM bookings WHERE id = '1'' OR ''1''=''1'");
        assert!(sql::parse_sql(&sql).is_err());
    }

    #[test]
    fn placeholders_inside_literals_stay() {
        let params: Vec<Option<&[u8]>> = vec![Some(&b"9"[..])];
        assert_eq!(
            substitute_params("UPDATE bookings SET description = 'it''s $1' WHERE id = $1", &params),
            "UPDATE bookings SET description = 'it''s $1' WHERE id = '9'"
        );
        assert_eq!(count_params("SELECT 'it''s $3' FROM bookings WHERE id = $1"), 1);
    }

    #[test]
    fn persistence_errors_are_opaque() {
        let err = engine_err(EngineError::Persistence("disk on fire at /var/data".into()));
        let shown = format!("{err:?}");
        assert!(shown.contains("58030"), "{shown}");
        assert!(shown.contains("storage failure"), "{shown}");
        assert!(!shown.contains("disk on fire"), "{shown}");
    }

    #[test]
    fn schemas_match_shapes() {
        assert_eq!(result_schema_for("SELECT * FROM bookings").len(), 22);
        assert_eq!(result_schema_for("SELECT * FROM notifications").len(), 9);
        assert_eq!(result_schema_for("SELECT * FROM conflicts WHERE service_id = $1").len(), 7);
        assert!(result_schema_for("DELETE FROM notifications WHERE booking_id = 1").is_empty());
    }
}
