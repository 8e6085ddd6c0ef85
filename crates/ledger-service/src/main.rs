//! HTTP request boundary for the company/invoice ledger.
//!
//! Handlers parse input, hand the typed operation to the blocking store
//! worker, and render either the documented response envelope or the fixed
//! error body `{"error": {"message", "status"}}`. Status assignment happens
//! in exactly one place, the exhaustive match in [`failure_from`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use ledger_core::{
    validate_amount, Company, CompanyDetail, CompanySummary, Invoice, InvoiceDetail,
    InvoiceSummary, LedgerError,
};
use ledger_store_sqlite::LedgerApi;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
struct ServiceState {
    api: LedgerApi,
    operation_timeout: Duration,
    telemetry: Arc<ServiceTelemetry>,
}

#[derive(Debug, Clone)]
struct ServiceFailure {
    status: StatusCode,
    message: String,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorEnvelope {
    error: ErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorPayload {
    message: String,
    status: u16,
}

#[derive(Debug, Clone, Serialize)]
struct CompaniesResponse {
    companies: Vec<CompanySummary>,
}

#[derive(Debug, Clone, Serialize)]
struct CompanyEnvelope<T>
where
    T: Serialize,
{
    company: T,
}

#[derive(Debug, Clone, Serialize)]
struct InvoicesResponse {
    invoices: Vec<InvoiceSummary>,
}

#[derive(Debug, Clone, Serialize)]
struct InvoiceEnvelope<T>
where
    T: Serialize,
{
    invoice: T,
}

#[derive(Debug, Clone, Serialize)]
struct DeletedResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateCompanyRequest {
    code: String,
    name: String,
    description: String,
}

#[derive(Debug, Clone, Deserialize)]
struct UpdateCompanyRequest {
    name: String,
    description: String,
}

/// Monetary fields arrive as raw JSON so the validation gate can accept both
/// numbers and numeric strings while rejecting everything else itself.
#[derive(Debug, Clone, Deserialize)]
struct CreateInvoiceRequest {
    comp_code: String,
    amt: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct UpdateInvoiceRequest {
    amt: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    timeout_ms: u64,
    telemetry: ServiceTelemetrySnapshot,
}

#[derive(Debug, Default)]
struct ServiceTelemetry {
    requests_total: AtomicU64,
    requests_success_total: AtomicU64,
    requests_failure_total: AtomicU64,
    timeout_total: AtomicU64,
    invalid_json_total: AtomicU64,
    not_found_total: AtomicU64,
    conflict_total: AtomicU64,
    invalid_amount_total: AtomicU64,
    internal_error_total: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceTelemetrySnapshot {
    requests_total: u64,
    requests_success_total: u64,
    requests_failure_total: u64,
    timeout_total: u64,
    invalid_json_total: u64,
    not_found_total: u64,
    conflict_total: u64,
    invalid_amount_total: u64,
    internal_error_total: u64,
}

#[derive(Debug, Clone, Copy)]
enum FailureCategory {
    InvalidJson,
    NotFound,
    Conflict,
    InvalidAmount,
    Internal,
}

#[derive(Debug, Parser)]
#[command(name = "ledger-service")]
#[command(about = "Local HTTP service for companies and their invoices")]
struct Args {
    #[arg(long, default_value = "./ledger.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    #[arg(long, default_value_t = 2500)]
    operation_timeout_ms: u64,
}

impl ServiceFailure {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl IntoResponse for ServiceFailure {
    fn into_response(self) -> Response {
        let payload = ErrorEnvelope {
            error: ErrorPayload { message: self.message, status: self.status.as_u16() },
        };
        (self.status, Json(payload)).into_response()
    }
}

/// The sole translation point from the closed domain taxonomy to HTTP.
/// `Internal` deliberately drops its diagnostic detail: store-internal text
/// never reaches a client.
fn failure_from(err: LedgerError) -> ServiceFailure {
    match err {
        LedgerError::NotFound { .. } => ServiceFailure::new(StatusCode::NOT_FOUND, err.to_string()),
        LedgerError::Conflict(message) => ServiceFailure::new(StatusCode::BAD_REQUEST, message),
        LedgerError::InvalidAmount(_) => {
            ServiceFailure::new(StatusCode::BAD_REQUEST, err.to_string())
        }
        LedgerError::Internal(_) => {
            ServiceFailure::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

fn category_of(err: &LedgerError) -> FailureCategory {
    match err {
        LedgerError::NotFound { .. } => FailureCategory::NotFound,
        LedgerError::Conflict(_) => FailureCategory::Conflict,
        LedgerError::InvalidAmount(_) => FailureCategory::InvalidAmount,
        LedgerError::Internal(_) => FailureCategory::Internal,
    }
}

impl ServiceState {
    fn invalid_json(&self, rejection: &JsonRejection) -> ServiceFailure {
        self.telemetry.record_failure(FailureCategory::InvalidJson, false);
        ServiceFailure::new(rejection.status(), rejection.body_text())
    }

    fn parse_invoice_id(&self, raw: &str) -> Result<i64, ServiceFailure> {
        raw.parse::<i64>().map_err(|_| {
            self.telemetry.record_failure(FailureCategory::NotFound, false);
            failure_from(LedgerError::not_found(raw))
        })
    }

    async fn run_blocking<T, F>(
        &self,
        operation_label: &'static str,
        op: F,
    ) -> Result<T, ServiceFailure>
    where
        T: Send + 'static,
        F: FnOnce(LedgerApi) -> Result<T, LedgerError> + Send + 'static,
    {
        self.telemetry.requests_total.fetch_add(1, Ordering::Relaxed);
        let api = self.api.clone();
        let handle = tokio::task::spawn_blocking(move || op(api));
        let join_result =
            tokio::time::timeout(self.operation_timeout, handle).await.map_err(|_| {
                self.telemetry.record_failure(FailureCategory::Internal, true);
                ServiceFailure::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!(
                        "{operation_label} timed out after {} ms",
                        self.operation_timeout.as_millis()
                    ),
                )
            })?;

        let op_result = join_result.map_err(|_| {
            self.telemetry.record_failure(FailureCategory::Internal, false);
            ServiceFailure::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        })?;

        match op_result {
            Ok(value) => {
                self.telemetry.requests_success_total.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            Err(err) => {
                self.telemetry.record_failure(category_of(&err), false);
                Err(failure_from(err))
            }
        }
    }
}

impl ServiceTelemetry {
    fn record_failure(&self, category: FailureCategory, timeout: bool) {
        self.requests_failure_total.fetch_add(1, Ordering::Relaxed);
        if timeout {
            self.timeout_total.fetch_add(1, Ordering::Relaxed);
        }
        match category {
            FailureCategory::InvalidJson => {
                self.invalid_json_total.fetch_add(1, Ordering::Relaxed);
            }
            FailureCategory::NotFound => {
                self.not_found_total.fetch_add(1, Ordering::Relaxed);
            }
            FailureCategory::Conflict => {
                self.conflict_total.fetch_add(1, Ordering::Relaxed);
            }
            FailureCategory::InvalidAmount => {
                self.invalid_amount_total.fetch_add(1, Ordering::Relaxed);
            }
            FailureCategory::Internal => {
                self.internal_error_total.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn snapshot(&self) -> ServiceTelemetrySnapshot {
        ServiceTelemetrySnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success_total: self.requests_success_total.load(Ordering::Relaxed),
            requests_failure_total: self.requests_failure_total.load(Ordering::Relaxed),
            timeout_total: self.timeout_total.load(Ordering::Relaxed),
            invalid_json_total: self.invalid_json_total.load(Ordering::Relaxed),
            not_found_total: self.not_found_total.load(Ordering::Relaxed),
            conflict_total: self.conflict_total.load(Ordering::Relaxed),
            invalid_amount_total: self.invalid_amount_total.load(Ordering::Relaxed),
            internal_error_total: self.internal_error_total.load(Ordering::Relaxed),
        }
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/companies", get(list_companies).post(create_company))
        .route(
            "/companies/:code",
            get(get_company).put(update_company).delete(delete_company),
        )
        .route("/invoices", get(list_invoices).post(create_invoice))
        .route(
            "/invoices/:id",
            get(get_invoice).put(update_invoice).delete(delete_invoice),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let api = LedgerApi::new(args.db);
    api.bootstrap()?;

    let state = ServiceState {
        api,
        operation_timeout: Duration::from_millis(args.operation_timeout_ms),
        telemetry: Arc::new(ServiceTelemetry::default()),
    };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    let timeout_ms = u64::try_from(state.operation_timeout.as_millis()).unwrap_or(u64::MAX);
    Json(HealthResponse {
        status: "ok",
        timeout_ms,
        telemetry: state.telemetry.snapshot(),
    })
}

async fn list_companies(
    State(state): State<ServiceState>,
) -> Result<Json<CompaniesResponse>, ServiceFailure> {
    let companies = state.run_blocking("list_companies", |api| api.list_companies()).await?;
    Ok(Json(CompaniesResponse { companies }))
}

async fn get_company(
    State(state): State<ServiceState>,
    Path(code): Path<String>,
) -> Result<Json<CompanyEnvelope<CompanyDetail>>, ServiceFailure> {
    let company = state.run_blocking("get_company", move |api| api.get_company(&code)).await?;
    Ok(Json(CompanyEnvelope { company }))
}

async fn create_company(
    State(state): State<ServiceState>,
    payload: Result<Json<CreateCompanyRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CompanyEnvelope<Company>>), ServiceFailure> {
    let Json(request) = payload.map_err(|rejection| state.invalid_json(&rejection))?;
    let company = state
        .run_blocking("create_company", move |api| {
            api.create_company(&request.code, &request.name, &request.description)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(CompanyEnvelope { company })))
}

async fn update_company(
    State(state): State<ServiceState>,
    Path(code): Path<String>,
    payload: Result<Json<UpdateCompanyRequest>, JsonRejection>,
) -> Result<Json<CompanyEnvelope<Company>>, ServiceFailure> {
    let Json(request) = payload.map_err(|rejection| state.invalid_json(&rejection))?;
    let company = state
        .run_blocking("update_company", move |api| {
            api.update_company(&code, &request.name, &request.description)
        })
        .await?;
    Ok(Json(CompanyEnvelope { company }))
}

async fn delete_company(
    State(state): State<ServiceState>,
    Path(code): Path<String>,
) -> Result<Json<DeletedResponse>, ServiceFailure> {
    state.run_blocking("delete_company", move |api| api.delete_company(&code)).await?;
    Ok(Json(DeletedResponse { status: "deleted" }))
}

async fn list_invoices(
    State(state): State<ServiceState>,
) -> Result<Json<InvoicesResponse>, ServiceFailure> {
    let invoices = state.run_blocking("list_invoices", |api| api.list_invoices()).await?;
    Ok(Json(InvoicesResponse { invoices }))
}

async fn get_invoice(
    State(state): State<ServiceState>,
    Path(raw_id): Path<String>,
) -> Result<Json<InvoiceEnvelope<InvoiceDetail>>, ServiceFailure> {
    let id = state.parse_invoice_id(&raw_id)?;
    let invoice = state.run_blocking("get_invoice", move |api| api.get_invoice(id)).await?;
    Ok(Json(InvoiceEnvelope { invoice }))
}

async fn create_invoice(
    State(state): State<ServiceState>,
    payload: Result<Json<CreateInvoiceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<InvoiceEnvelope<Invoice>>), ServiceFailure> {
    let Json(request) = payload.map_err(|rejection| state.invalid_json(&rejection))?;
    let invoice = state
        .run_blocking("create_invoice", move |api| {
            let amt = validate_amount(&request.amt)?;
            api.create_invoice(&request.comp_code, amt)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(InvoiceEnvelope { invoice })))
}

async fn update_invoice(
    State(state): State<ServiceState>,
    Path(raw_id): Path<String>,
    payload: Result<Json<UpdateInvoiceRequest>, JsonRejection>,
) -> Result<Json<InvoiceEnvelope<Invoice>>, ServiceFailure> {
    let id = state.parse_invoice_id(&raw_id)?;
    let Json(request) = payload.map_err(|rejection| state.invalid_json(&rejection))?;
    let invoice = state
        .run_blocking("update_invoice", move |api| {
            let amt = validate_amount(&request.amt)?;
            api.update_invoice(id, amt)
        })
        .await?;
    Ok(Json(InvoiceEnvelope { invoice }))
}

async fn delete_invoice(
    State(state): State<ServiceState>,
    Path(raw_id): Path<String>,
) -> Result<Json<DeletedResponse>, ServiceFailure> {
    let id = state.parse_invoice_id(&raw_id)?;
    state.run_blocking("delete_invoice", move |api| api.delete_invoice(id)).await?;
    Ok(Json(DeletedResponse { status: "deleted" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("ledger-service-{}.sqlite3", ulid::Ulid::new()))
    }

    fn test_router() -> Router {
        let api = LedgerApi::new(unique_temp_db_path());
        api.bootstrap().unwrap_or_else(|err| panic!("bootstrap failed: {err}"));
        app(ServiceState {
            api,
            operation_timeout: Duration::from_millis(2500),
            telemetry: Arc::new(ServiceTelemetry::default()),
        })
    }

    async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                builder.body(Body::from(value.to_string()))
            }
            None => builder.body(Body::empty()),
        }
        .unwrap_or_else(|err| panic!("failed to build request: {err}"));

        let response = match router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        };
        let status = response.status();

        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}"),
        };
        (status, value)
    }

    async fn seed_apple(router: &Router) {
        let (status, _) = send(
            router,
            "POST",
            "/companies",
            Some(json!({"code": "apple", "name": "Apple", "description": "d"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    fn assert_error(status: StatusCode, body: &Value, expected_status: u16, message: &str) {
        assert_eq!(status.as_u16(), expected_status);
        assert_eq!(body["error"]["message"], json!(message));
        assert_eq!(body["error"]["status"], json!(expected_status));
    }

    #[tokio::test]
    async fn company_round_trip_returns_empty_invoice_list() {
        let router = test_router();
        seed_apple(&router).await;

        let (status, body) = send(&router, "GET", "/companies/apple", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"company": {
                "code": "apple", "name": "Apple", "description": "d", "invoices": []
            }})
        );
    }

    #[tokio::test]
    async fn duplicate_code_create_is_rejected() {
        let router = test_router();
        seed_apple(&router).await;

        let (status, body) = send(
            &router,
            "POST",
            "/companies",
            Some(json!({"code": "apple", "name": "Apple Two", "description": ""})),
        )
        .await;
        assert_error(status, &body, 400, "Name or code already exists");
    }

    #[tokio::test]
    async fn duplicate_name_with_different_code_is_rejected() {
        let router = test_router();
        seed_apple(&router).await;

        let (status, body) = send(
            &router,
            "POST",
            "/companies",
            Some(json!({"code": "apple2", "name": "Apple", "description": ""})),
        )
        .await;
        assert_error(status, &body, 400, "Name or code already exists");
    }

    #[tokio::test]
    async fn missing_company_lookup_is_404() {
        let router = test_router();
        let (status, body) = send(&router, "GET", "/companies/nope", None).await;
        assert_error(status, &body, 404, "Not found: nope");
    }

    #[tokio::test]
    async fn company_update_renames_and_rejects_collisions() {
        let router = test_router();
        seed_apple(&router).await;
        let (status, _) = send(
            &router,
            "POST",
            "/companies",
            Some(json!({"code": "ibm", "name": "IBM", "description": "b"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            &router,
            "PUT",
            "/companies/ibm",
            Some(json!({"name": "Big Blue", "description": "renamed"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["company"]["name"], json!("Big Blue"));
        assert_eq!(body["company"]["code"], json!("ibm"));

        let (status, body) = send(
            &router,
            "PUT",
            "/companies/ibm",
            Some(json!({"name": "Apple", "description": "collides"})),
        )
        .await;
        assert_error(status, &body, 400, "Name already taken");

        let (status, body) = send(
            &router,
            "PUT",
            "/companies/ghost",
            Some(json!({"name": "Ghost", "description": ""})),
        )
        .await;
        assert_error(status, &body, 404, "Not found: ghost");
    }

    #[tokio::test]
    async fn company_delete_reports_status_then_404() {
        let router = test_router();
        seed_apple(&router).await;

        let (status, body) = send(&router, "DELETE", "/companies/apple", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "deleted"}));

        let (status, body) = send(&router, "DELETE", "/companies/apple", None).await;
        assert_error(status, &body, 404, "Not found: apple");
    }

    #[tokio::test]
    async fn company_with_invoices_cannot_be_deleted() {
        let router = test_router();
        seed_apple(&router).await;
        let (status, _) = send(
            &router,
            "POST",
            "/invoices",
            Some(json!({"comp_code": "apple", "amt": 100})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&router, "DELETE", "/companies/apple", None).await;
        assert_error(status, &body, 400, "Company still has invoices: apple");
    }

    #[tokio::test]
    async fn listings_return_summary_shapes() {
        let router = test_router();
        seed_apple(&router).await;
        let (_, created) = send(
            &router,
            "POST",
            "/invoices",
            Some(json!({"comp_code": "apple", "amt": 100})),
        )
        .await;
        let id = &created["invoice"]["id"];

        let (status, body) = send(&router, "GET", "/companies", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"companies": [{"code": "apple", "name": "Apple"}]}));

        let (status, body) = send(&router, "GET", "/invoices", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"invoices": [{"id": id, "comp_code": "apple"}]}));
    }

    #[tokio::test]
    async fn invoice_create_returns_full_row() {
        let router = test_router();
        seed_apple(&router).await;

        let (status, body) = send(
            &router,
            "POST",
            "/invoices",
            Some(json!({"comp_code": "apple", "amt": 100})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let invoice = &body["invoice"];
        assert_eq!(invoice["comp_code"], json!("apple"));
        assert_eq!(invoice["amt"], json!(100.0));
        assert_eq!(invoice["paid"], json!(false));
        assert_eq!(invoice["paid_date"], Value::Null);
        assert!(invoice["id"].is_i64());
        assert!(invoice["add_date"].is_string());
    }

    #[tokio::test]
    async fn invoice_detail_embeds_owning_company() {
        let router = test_router();
        seed_apple(&router).await;
        let (_, created) = send(
            &router,
            "POST",
            "/invoices",
            Some(json!({"comp_code": "apple", "amt": 100})),
        )
        .await;
        let id = created["invoice"]["id"].as_i64().unwrap_or_default();

        let (status, body) = send(&router, "GET", &format!("/invoices/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let invoice = &body["invoice"];
        assert_eq!(invoice["id"], json!(id));
        assert_eq!(invoice["amt"], json!(100.0));
        assert_eq!(invoice["paid"], json!(false));
        assert_eq!(invoice["paid_date"], Value::Null);
        assert_eq!(
            invoice["company"],
            json!({"code": "apple", "name": "Apple", "description": "d"})
        );
        assert!(invoice.get("comp_code").is_none());
    }

    #[tokio::test]
    async fn numeric_string_amounts_are_accepted() {
        let router = test_router();
        seed_apple(&router).await;

        let (status, body) = send(
            &router,
            "POST",
            "/invoices",
            Some(json!({"comp_code": "apple", "amt": "1"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["invoice"]["amt"], json!(1.0));
    }

    #[tokio::test]
    async fn invalid_amounts_are_rejected_on_create_and_update() {
        let router = test_router();
        seed_apple(&router).await;
        let (_, created) = send(
            &router,
            "POST",
            "/invoices",
            Some(json!({"comp_code": "apple", "amt": 100})),
        )
        .await;
        let id = created["invoice"]["id"].as_i64().unwrap_or_default();

        for (raw, rendered) in
            [(json!(0), "0"), (json!("abc"), "abc"), (json!(-5), "-5")]
        {
            let (status, body) = send(
                &router,
                "POST",
                "/invoices",
                Some(json!({"comp_code": "apple", "amt": raw})),
            )
            .await;
            assert_error(status, &body, 400, &format!("Invalid amount: {rendered}"));

            let (status, body) = send(
                &router,
                "PUT",
                &format!("/invoices/{id}"),
                Some(json!({"amt": raw})),
            )
            .await;
            assert_error(status, &body, 400, &format!("Invalid amount: {rendered}"));
        }
    }

    #[tokio::test]
    async fn unknown_company_code_on_invoice_create_is_rejected() {
        let router = test_router();
        let (status, body) = send(
            &router,
            "POST",
            "/invoices",
            Some(json!({"comp_code": "ghost", "amt": 10})),
        )
        .await;
        assert_error(status, &body, 400, "Company code does not exist: ghost");
    }

    #[tokio::test]
    async fn invoice_update_and_delete_lifecycle() {
        let router = test_router();
        seed_apple(&router).await;
        let (_, created) = send(
            &router,
            "POST",
            "/invoices",
            Some(json!({"comp_code": "apple", "amt": 100})),
        )
        .await;
        let id = created["invoice"]["id"].as_i64().unwrap_or_default();

        let (status, body) =
            send(&router, "PUT", &format!("/invoices/{id}"), Some(json!({"amt": 250.5}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["invoice"]["amt"], json!(250.5));
        assert_eq!(body["invoice"]["comp_code"], json!("apple"));

        let (status, body) = send(&router, "DELETE", &format!("/invoices/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "deleted"}));

        let (status, body) = send(&router, "GET", &format!("/invoices/{id}"), None).await;
        assert_error(status, &body, 404, &format!("Not found: {id}"));
    }

    #[tokio::test]
    async fn missing_and_malformed_invoice_ids_are_404() {
        let router = test_router();
        let (status, body) = send(&router, "PUT", "/invoices/9999", Some(json!({"amt": 1}))).await;
        assert_error(status, &body, 404, "Not found: 9999");

        let (status, body) = send(&router, "GET", "/invoices/abc", None).await;
        assert_error(status, &body, 404, "Not found: abc");
    }

    #[tokio::test]
    async fn malformed_json_bodies_use_the_error_envelope() {
        let router = test_router();
        let request = Request::builder()
            .method("POST")
            .uri("/companies")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap_or_else(|err| panic!("failed to build request: {err}"));
        let response = match router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        };
        let status = response.status();
        assert!(status.is_client_error());

        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body: Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(err) => panic!("error body is not JSON: {err}"),
        };
        assert_eq!(body["error"]["status"], json!(status.as_u16()));
        assert!(body["error"]["message"].is_string());
    }

    #[tokio::test]
    async fn sql_metacharacters_round_trip_verbatim() {
        let router = test_router();
        seed_apple(&router).await;
        let hostile = "Robert'); DROP TABLE companies;--";

        let (status, _) = send(
            &router,
            "POST",
            "/companies",
            Some(json!({"code": "bobby", "name": hostile, "description": hostile})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&router, "GET", "/companies/bobby", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["company"]["name"], json!(hostile));
        assert_eq!(body["company"]["description"], json!(hostile));

        // Other rows stay intact.
        let (status, body) = send(&router, "GET", "/companies/apple", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["company"]["name"], json!("Apple"));
    }

    #[tokio::test]
    async fn health_reports_telemetry_counters() {
        let router = test_router();
        let (_, _) = send(&router, "GET", "/companies/nope", None).await;

        let (status, body) = send(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("ok"));
        assert_eq!(body["timeout_ms"], json!(2500));
        assert_eq!(body["telemetry"]["requests_total"], json!(1));
        assert_eq!(body["telemetry"]["not_found_total"], json!(1));
        assert_eq!(body["telemetry"]["requests_failure_total"], json!(1));
    }
}
