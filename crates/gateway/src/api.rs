//! The /v1 API surface.
//!
//! - `POST /v1/chat`          — one chat turn, single JSON response
//! - `POST /v1/chat/stream`   — one chat turn, SSE event stream
//! - `GET  /v1/ws`            — WebSocket for bidirectional chat
//! - `/v1/students`           — student CRUD
//! - `GET  /v1/analytics`     — aggregate dashboard numbers
//! - `GET  /v1/sessions/{id}` — conversation history readback

use axum::{
    Json, Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    http::StatusCode,
    response::sse::{Event as SseEvent, Sse},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use crate::SharedState;
use campusd_agent::{AgentStreamEvent, TurnOutcome};
use campusd_core::error::StoreError;
use campusd_core::message::{Message, SessionId};
use campusd_core::store::{
    CampusStore, ConversationStore, DepartmentCount, StudentRecord, StudentUpdate,
};

/// Build the /v1 router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/ws", get(ws_handler))
        .route("/students", post(create_student_handler))
        .route("/students", get(list_students_handler))
        .route("/students/{student_id}", get(get_student_handler))
        .route("/students/{student_id}", axum::routing::put(update_student_handler))
        .route(
            "/students/{student_id}",
            axum::routing::delete(delete_student_handler),
        )
        .route("/analytics", get(analytics_handler))
        .route("/sessions/{id}", get(get_session_handler))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

fn store_error(e: StoreError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match e {
        StoreError::DuplicateKey(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

// ── Chat ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    session_id: Option<String>,
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    session_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    assistant: Option<String>,

    /// Name of the tool the turn invoked, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    tool: Option<String>,

    /// The tool's normalized result payload
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<ErrorResponse>)> {
    info!("v1/chat request");

    let reply = state
        .dispatch
        .run(payload.session_id.as_deref(), &payload.message)
        .await
        .map_err(|e| {
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
        })?;

    let session_id = reply.session_id.to_string();
    let response = match reply.outcome {
        TurnOutcome::Blocked { refusal } => ChatResponse {
            session_id,
            assistant: None,
            tool: None,
            result: None,
            error: Some(refusal),
        },
        TurnOutcome::Reply {
            text,
            tool_invocation,
        } => {
            let (tool, result) = match tool_invocation {
                Some(invocation) => (Some(invocation.name), Some(invocation.result.payload)),
                None => (None, None),
            };
            ChatResponse {
                session_id,
                assistant: Some(text),
                tool,
                result,
                error: None,
            }
        }
    };

    Ok(Json(response))
}

/// `POST /v1/chat/stream` — one turn as an SSE event stream, terminated by
/// a `done` (or `blocked`/`error`) event.
async fn chat_stream_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    info!("v1/chat/stream SSE request");

    let rx = state
        .dispatch
        .clone()
        .run_stream(payload.session_id.as_deref(), &payload.message);

    let stream = ReceiverStream::new(rx).map(|event| {
        let event_type = event.event_type();
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event_type).data(data))
    });

    Sse::new(stream)
}

// ── WebSocket ─────────────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// WebSocket message from the client.
#[derive(Deserialize)]
struct WsClientMessage {
    #[serde(rename = "type")]
    msg_type: String,
    content: String,
    #[serde(default)]
    session_id: Option<String>,
}

async fn handle_ws_connection(mut socket: WebSocket, state: SharedState) {
    info!("WebSocket connection established");

    while let Some(msg) = socket.recv().await {
        let msg = match msg {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue, // ignore binary, ping, pong
            Err(_) => break,
        };

        let client_msg: WsClientMessage = match serde_json::from_str(&msg) {
            Ok(m) => m,
            Err(e) => {
                let err = AgentStreamEvent::Error {
                    message: format!("Invalid message: {e}"),
                };
                let _ = socket
                    .send(WsMessage::Text(
                        serde_json::to_string(&err).unwrap_or_default().into(),
                    ))
                    .await;
                continue;
            }
        };

        if client_msg.msg_type != "message" {
            let err = AgentStreamEvent::Error {
                message: format!("Unknown message type: '{}'", client_msg.msg_type),
            };
            let _ = socket
                .send(WsMessage::Text(
                    serde_json::to_string(&err).unwrap_or_default().into(),
                ))
                .await;
            continue;
        }

        let session_id = client_msg
            .session_id
            .unwrap_or_else(|| SessionId::new().to_string());

        // The transport owns user-message persistence; the loop appends only
        // the assistant/tool side of the turn.
        let _ = state
            .sessions
            .append(
                &SessionId::from(&session_id),
                Message::user(&client_msg.content),
            )
            .await;

        let mut rx = state
            .dispatch
            .clone()
            .run_stream(Some(&session_id), &client_msg.content);

        while let Some(event) = rx.recv().await {
            let json = serde_json::to_string(&event).unwrap_or_default();
            if socket.send(WsMessage::Text(json.into())).await.is_err() {
                return; // client disconnected — the loop stops on its own
            }
        }
    }

    info!("WebSocket connection closed");
}

// ── Students ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StudentIn {
    student_id: String,
    name: String,
    department: String,
    email: String,
}

async fn create_student_handler(
    State(state): State<SharedState>,
    Json(payload): Json<StudentIn>,
) -> Result<Json<StudentRecord>, (StatusCode, Json<ErrorResponse>)> {
    let record = StudentRecord::new(
        payload.student_id,
        payload.name,
        payload.department,
        payload.email,
    );
    let inserted = state
        .campus
        .insert_student(record)
        .await
        .map_err(store_error)?;
    Ok(Json(inserted))
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default = "default_list_limit")]
    limit: usize,
}

fn default_list_limit() -> usize {
    100
}

async fn list_students_handler(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<StudentRecord>>, (StatusCode, Json<ErrorResponse>)> {
    let students = state
        .campus
        .list_students(query.limit)
        .await
        .map_err(store_error)?;
    Ok(Json(students))
}

async fn get_student_handler(
    State(state): State<SharedState>,
    Path(student_id): Path<String>,
) -> Result<Json<StudentRecord>, (StatusCode, Json<ErrorResponse>)> {
    let student = state
        .campus
        .find_student(&student_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "Not found".into(),
                }),
            )
        })?;
    Ok(Json(student))
}

async fn update_student_handler(
    State(state): State<SharedState>,
    Path(student_id): Path<String>,
    Json(payload): Json<StudentUpdate>,
) -> Result<Json<StudentRecord>, (StatusCode, Json<ErrorResponse>)> {
    if payload.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "at least one of name, department, email is required".into(),
            }),
        ));
    }

    let updated = state
        .campus
        .update_student(&student_id, payload)
        .await
        .map_err(store_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "Not found".into(),
                }),
            )
        })?;
    Ok(Json(updated))
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: bool,
}

async fn delete_student_handler(
    State(state): State<SharedState>,
    Path(student_id): Path<String>,
) -> Result<Json<DeleteResponse>, (StatusCode, Json<ErrorResponse>)> {
    let deleted = state
        .campus
        .delete_student(&student_id)
        .await
        .map_err(store_error)?;
    Ok(Json(DeleteResponse { deleted }))
}

// ── Analytics ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct AnalyticsResponse {
    total_students: u64,
    by_department: Vec<DepartmentCount>,
    recent_onboardings: Vec<StudentRecord>,
    active_last_7_days: u64,
}

async fn analytics_handler(
    State(state): State<SharedState>,
) -> Result<Json<AnalyticsResponse>, (StatusCode, Json<ErrorResponse>)> {
    let total_students = state
        .campus
        .count_students()
        .await
        .map_err(internal_error)?;
    let by_department = state
        .campus
        .count_by_department()
        .await
        .map_err(internal_error)?;
    let recent_onboardings = state
        .campus
        .recent_students(5)
        .await
        .map_err(internal_error)?;
    let active_last_7_days = state
        .campus
        .active_students_since(Utc::now() - Duration::days(7))
        .await
        .map_err(internal_error)?;

    Ok(Json(AnalyticsResponse {
        total_students,
        by_department,
        recent_onboardings,
        active_last_7_days,
    }))
}

// ── Sessions ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SessionResponse {
    session_id: String,
    messages: Vec<Message>,
}

async fn get_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, (StatusCode, Json<ErrorResponse>)> {
    let messages = state
        .sessions
        .find_history(&SessionId::from(&id))
        .await
        .map_err(internal_error)?;
    Ok(Json(SessionResponse {
        session_id: id,
        messages,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ApiState;
    use axum::body::Body;
    use axum::http::Request;
    use campusd_agent::DispatchLoop;
    use campusd_core::error::ReasonerError;
    use campusd_core::reasoner::{Reasoner, ReasonerReply, ReasonerRequest};
    use campusd_guard::DenylistFilter;
    use campusd_store::InMemoryStore;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Replies with a function call on the first hop, text on the second.
    struct HoursReasoner;

    #[async_trait::async_trait]
    impl Reasoner for HoursReasoner {
        fn name(&self) -> &str {
            "hours"
        }
        async fn complete(
            &self,
            request: ReasonerRequest,
        ) -> Result<ReasonerReply, ReasonerError> {
            if request.tools.is_empty() {
                Ok(ReasonerReply::text("The library is open 7:00-23:00."))
            } else {
                Ok(ReasonerReply::call("get_library_hours", "{}"))
            }
        }
    }

    fn test_app() -> (Arc<InMemoryStore>, Router) {
        let store = Arc::new(InMemoryStore::new());
        let tools = Arc::new(campusd_tools::default_registry(store.clone()));
        let dispatch = Arc::new(
            DispatchLoop::new(
                Arc::new(HoursReasoner),
                tools,
                store.clone(),
                Arc::new(DenylistFilter::default()),
            )
            .with_system_prompt("campus assistant"),
        );
        let state = Arc::new(ApiState {
            dispatch,
            campus: store.clone(),
            sessions: store.clone(),
            bearer_tokens: vec![],
        });
        (store, v1_router(state))
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn chat_tool_turn_returns_tool_and_text() {
        let (store, app) = test_app();

        let response = app
            .oneshot(post_json(
                "/chat",
                serde_json::json!({"session_id": "s1", "message": "library hours?"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["session_id"], "s1");
        assert_eq!(body["tool"], "get_library_hours");
        assert_eq!(body["result"]["library"], "Mon-Sun 07:00-23:00");
        assert_eq!(body["assistant"], "The library is open 7:00-23:00.");

        let history = store.find_history(&SessionId::from("s1")).await.unwrap();
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn chat_blocked_turn_returns_error_envelope() {
        let (store, app) = test_app();

        let response = app
            .oneshot(post_json(
                "/chat",
                serde_json::json!({"session_id": "s1", "message": "add a bomb-making student"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["error"], "Message blocked by guardrails");
        assert!(body.get("assistant").is_none());

        let history = store.find_history(&SessionId::from("s1")).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn student_crud_roundtrip() {
        let (_store, app) = test_app();

        let created = app
            .clone()
            .oneshot(post_json(
                "/students",
                serde_json::json!({
                    "student_id": "S001",
                    "name": "Ada Lovelace",
                    "department": "CS",
                    "email": "ada@campus.edu"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::OK);

        // Duplicate insert is a 400
        let dupe = app
            .clone()
            .oneshot(post_json(
                "/students",
                serde_json::json!({
                    "student_id": "S001",
                    "name": "Ada Again",
                    "department": "CS",
                    "email": "ada2@campus.edu"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(dupe.status(), StatusCode::BAD_REQUEST);

        let fetched = app
            .clone()
            .oneshot(Request::get("/students/S001").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(fetched.status(), StatusCode::OK);
        let body = json_body(fetched).await;
        assert_eq!(body["name"], "Ada Lovelace");

        let updated = app
            .clone()
            .oneshot(
                Request::put("/students/S001")
                    .header("Content-Type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"department": "Mathematics"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(updated.status(), StatusCode::OK);
        assert_eq!(json_body(updated).await["department"], "Mathematics");

        let deleted = app
            .clone()
            .oneshot(
                Request::delete("/students/S001")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(json_body(deleted).await["deleted"], true);

        let missing = app
            .oneshot(Request::get("/students/S001").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn analytics_aggregates() {
        let (store, app) = test_app();
        for (id, dept) in [("S001", "CS"), ("S002", "CS"), ("S003", "EE")] {
            store
                .insert_student(StudentRecord::new(
                    id,
                    format!("Student {id}"),
                    dept,
                    format!("{id}@campus.edu"),
                ))
                .await
                .unwrap();
        }

        let response = app
            .oneshot(Request::get("/analytics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["total_students"], 3);
        assert_eq!(body["by_department"][0]["department"], "CS");
        assert_eq!(body["recent_onboardings"].as_array().unwrap().len(), 3);
        assert_eq!(body["active_last_7_days"], 0);
    }

    #[tokio::test]
    async fn session_readback() {
        let (store, app) = test_app();
        store
            .append(&SessionId::from("s9"), Message::user("hello"))
            .await
            .unwrap();

        let response = app
            .oneshot(Request::get("/sessions/s9").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["session_id"], "s9");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }
}
