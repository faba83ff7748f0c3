//! In-process FHIR server stub for integration tests.
//!
//! Serves a small FHIR REST surface under `/fhir` plus the scoring service's
//! `POST /predict-risk` on one ephemeral port. Supports create, read, update,
//! search, and delete. Search results are paged with
//! `next` links; deleting a still-referenced resource answers 409.

#![allow(dead_code)]

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

pub const RISK_SCORE: f64 = 0.27;

#[derive(Default)]
struct StubState {
    base: String,
    resources: Vec<(String, String, Value)>,
    next_id: u64,
    page_size: usize,
    omit_created_ids: bool,
    failures: HashMap<(String, String), u16>,
    requests: Vec<String>,
}

impl StubState {
    fn failure(&self, method: &str, resource_type: &str) -> Option<StatusCode> {
        self.failures
            .get(&(method.to_string(), resource_type.to_string()))
            .and_then(|s| StatusCode::from_u16(*s).ok())
    }

    fn is_referenced(&self, resource_type: &str, id: &str) -> bool {
        let target = format!("{resource_type}/{id}");
        self.resources
            .iter()
            .any(|(_, _, body)| body.pointer("/subject/reference") == Some(&json!(target)))
    }
}

type Shared = Arc<Mutex<StubState>>;

pub struct FhirStub {
    addr: SocketAddr,
    state: Shared,
    server: JoinHandle<()>,
}

impl FhirStub {
    pub async fn start() -> anyhow::Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state: Shared = Arc::new(Mutex::new(StubState {
            base: format!("http://{addr}/fhir"),
            page_size: 100,
            ..StubState::default()
        }));

        let fhir = Router::new()
            .route("/metadata", get(metadata))
            .route("/:resource_type", post(create).get(search))
            .route("/:resource_type/:id", get(read).put(update).delete(delete));
        let app = Router::new()
            .nest("/fhir", fhir)
            .route("/predict-risk", post(predict))
            .with_state(state.clone());

        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            addr,
            state,
            server,
        })
    }

    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap()
    }

    /// Base URL of the FHIR endpoint.
    pub fn fhir_base(&self) -> String {
        format!("http://{}/fhir", self.addr)
    }

    /// Base URL of the scoring service.
    pub fn prediction_base(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_page_size(&self, size: usize) {
        self.lock().page_size = size.max(1);
    }

    /// Answer creates with an empty body so ids only arrive via `Location`.
    pub fn omit_created_ids(&self) {
        self.lock().omit_created_ids = true;
    }

    pub fn fail(&self, method: &str, resource_type: &str, status: u16) {
        self.lock()
            .failures
            .insert((method.to_string(), resource_type.to_string()), status);
    }

    pub fn count(&self, resource_type: &str) -> usize {
        self.lock()
            .resources
            .iter()
            .filter(|(rt, _, _)| rt == resource_type)
            .count()
    }

    pub fn count_referencing(&self, patient_id: &str) -> usize {
        let target = json!(format!("Patient/{patient_id}"));
        self.lock()
            .resources
            .iter()
            .filter(|(_, _, body)| body.pointer("/subject/reference") == Some(&target))
            .count()
    }

    pub fn resources(&self, resource_type: &str) -> Vec<Value> {
        self.lock()
            .resources
            .iter()
            .filter(|(rt, _, _)| rt == resource_type)
            .map(|(_, _, body)| body.clone())
            .collect()
    }

    /// `"METHOD /path"` lines in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }
}

impl Drop for FhirStub {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn outcome(status: StatusCode, diagnostics: impl Into<String>) -> Response {
    let body = json!({
        "resourceType": "OperationOutcome",
        "issue": [{"severity": "error", "code": "processing", "diagnostics": diagnostics.into()}]
    });
    (status, Json(body)).into_response()
}

fn insert(state: &mut StubState, resource_type: &str, mut body: Value) -> String {
    state.next_id += 1;
    let id = state.next_id.to_string();
    body["id"] = json!(id);
    body["meta"] = json!({"versionId": "1"});
    state
        .resources
        .push((resource_type.to_string(), id.clone(), body));
    id
}

async fn metadata(State(state): State<Shared>) -> Response {
    state.lock().unwrap().requests.push("GET /metadata".into());
    Json(json!({
        "resourceType": "CapabilityStatement",
        "status": "active",
        "fhirVersion": "4.0.1",
        "software": {"name": "fhir-stub", "version": "0.0.1"}
    }))
    .into_response()
}

async fn create(
    State(state): State<Shared>,
    Path(resource_type): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    state.requests.push(format!("POST /{resource_type}"));
    if let Some(status) = state.failure("POST", &resource_type) {
        return outcome(status, "injected failure");
    }
    if body.get("resourceType").and_then(Value::as_str) != Some(resource_type.as_str()) {
        return outcome(StatusCode::BAD_REQUEST, "resourceType does not match endpoint");
    }

    let id = insert(&mut state, &resource_type, body);
    let location = format!("{}/{resource_type}/{id}/_history/1", state.base);
    let created = if state.omit_created_ids {
        String::new()
    } else {
        state
            .resources
            .last()
            .map(|(_, _, body)| body.to_string())
            .unwrap_or_default()
    };

    (
        StatusCode::CREATED,
        [
            (header::LOCATION, location),
            (header::CONTENT_TYPE, "application/fhir+json".to_string()),
        ],
        created,
    )
        .into_response()
}

async fn search(
    State(state): State<Shared>,
    Path(resource_type): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut state = state.lock().unwrap();
    state.requests.push(format!("GET /{resource_type}"));
    if let Some(status) = state.failure("GET", &resource_type) {
        return outcome(status, "injected failure");
    }

    let matches: Vec<Value> = state
        .resources
        .iter()
        .filter(|(rt, _, _)| *rt == resource_type)
        .filter(|(_, id, body)| {
            let subject_ok = params.get("subject").map_or(true, |s| {
                body.pointer("/subject/reference").and_then(Value::as_str) == Some(s.as_str())
            });
            let id_ok = params.get("_id").map_or(true, |wanted| wanted == id);
            subject_ok && id_ok
        })
        .map(|(_, _, body)| body.clone())
        .collect();

    let offset: usize = params
        .get("_offset")
        .and_then(|o| o.parse().ok())
        .unwrap_or(0);
    let page: Vec<Value> = matches
        .iter()
        .skip(offset)
        .take(state.page_size)
        .map(|resource| json!({"resource": resource}))
        .collect();

    let mut link = vec![];
    let next_offset = offset + state.page_size;
    if next_offset < matches.len() {
        let mut next = url::Url::parse(&format!("{}/{resource_type}", state.base))
            .expect("stub base url");
        {
            let mut query = next.query_pairs_mut();
            for (key, value) in params.iter().filter(|(k, _)| k.as_str() != "_offset") {
                query.append_pair(key, value);
            }
            query.append_pair("_offset", &next_offset.to_string());
        }
        link.push(json!({"relation": "next", "url": next.to_string()}));
    }

    Json(json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": matches.len(),
        "link": link,
        "entry": page
    }))
    .into_response()
}

async fn read(
    State(state): State<Shared>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Response {
    let mut state = state.lock().unwrap();
    state.requests.push(format!("GET /{resource_type}/{id}"));
    match state
        .resources
        .iter()
        .find(|(rt, rid, _)| *rt == resource_type && *rid == id)
    {
        Some((_, _, body)) => Json(body.clone()).into_response(),
        None => outcome(StatusCode::NOT_FOUND, format!("{resource_type}/{id} not found")),
    }
}

async fn update(
    State(state): State<Shared>,
    Path((resource_type, id)): Path<(String, String)>,
    Json(mut body): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    state.requests.push(format!("PUT /{resource_type}/{id}"));
    if let Some(status) = state.failure("PUT", &resource_type) {
        return outcome(status, "injected failure");
    }
    let Some(stored) = state
        .resources
        .iter_mut()
        .find(|(rt, rid, _)| *rt == resource_type && *rid == id)
    else {
        return outcome(StatusCode::NOT_FOUND, format!("{resource_type}/{id} not found"));
    };
    body["id"] = json!(id);
    stored.2 = body;
    (StatusCode::OK, Json(stored.2.clone())).into_response()
}

async fn delete(
    State(state): State<Shared>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Response {
    let mut state = state.lock().unwrap();
    state.requests.push(format!("DELETE /{resource_type}/{id}"));
    if let Some(status) = state.failure("DELETE", &resource_type) {
        return outcome(status, "injected failure");
    }
    let Some(position) = state
        .resources
        .iter()
        .position(|(rt, rid, _)| *rt == resource_type && *rid == id)
    else {
        return outcome(StatusCode::NOT_FOUND, format!("{resource_type}/{id} not found"));
    };
    if state.is_referenced(&resource_type, &id) {
        return outcome(
            StatusCode::CONFLICT,
            format!("{resource_type}/{id} is referenced by other resources"),
        );
    }
    state.resources.remove(position);
    StatusCode::NO_CONTENT.into_response()
}

async fn predict(State(state): State<Shared>, Json(request): Json<Value>) -> Response {
    let mut state = state.lock().unwrap();
    state.requests.push("POST /predict-risk".into());
    if let Some(status) = state.failure("POST", "predict-risk") {
        return (status, Json(json!({"detail": "Error during prediction."}))).into_response();
    }

    let Some(patient_id) = request.get("patient_id").and_then(Value::as_str) else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"detail": "patient_id is required"})),
        )
            .into_response();
    };
    let exists = state
        .resources
        .iter()
        .any(|(rt, id, _)| rt == "Patient" && id == patient_id);
    if !exists {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "Patient not found"})),
        )
            .into_response();
    }

    let patient_id = patient_id.to_string();
    let assessment = json!({
        "resourceType": "RiskAssessment",
        "status": "final",
        "subject": {"reference": format!("Patient/{patient_id}")},
        "occurrenceDateTime": "2024-03-01T10:00:00Z",
        "prediction": [{"outcome": {"text": "TenYearCHD"}, "probabilityDecimal": RISK_SCORE}]
    });
    let assessment_id = insert(&mut state, "RiskAssessment", assessment);

    Json(json!({
        "patient_id": patient_id,
        "risk_score": RISK_SCORE,
        "risk_class": "Low",
        "risk_assessment_id": assessment_id
    }))
    .into_response()
}
