//! Integration tests: serve a fake PrivateGPT over HTTP on a free port and drive the real
//! client and a chat surface against it. The server task is left running when a test ends.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use lib::api::{
    ApiError, Backend, ChatMessage, ChatRequest, ChunksRequest, PgptClient, StreamEvent,
};
use lib::bootstrap;
use lib::completion::{Outcome, SessionState};
use lib::error::ClientError;
use lib::events::SurfaceEvent;
use lib::files::FileCatalog;
use lib::mode::Mode;
use lib::registry::ClientRegistry;
use lib::storage::{JsonFileStore, KvStore};
use lib::surface::{Sent, Surface, SurfaceKind};

#[derive(Default)]
struct Fake {
    generation_bodies: Mutex<Vec<Value>>,
    chunk_bodies: Mutex<Vec<Value>>,
    deleted: Mutex<Vec<String>>,
    uploads: Mutex<Vec<String>>,
    fail_generation: AtomicBool,
    truncate_stream: AtomicBool,
}

fn source_chunk() -> Value {
    json!({
        "object": "context.chunk",
        "score": 0.8,
        "document": {
            "object": "ingest.document",
            "doc_id": "a1",
            "doc_metadata": { "file_name": "a.pdf", "page_label": "2" }
        },
        "text": "relevant text"
    })
}

fn sse_body(finished: bool) -> String {
    let frames = [
        json!({ "choices": [{ "delta": { "content": "Hel" } }] }),
        json!({ "choices": [{ "delta": { "content": "lo" } }] }),
        json!({ "choices": [{ "delta": { "content": "" }, "sources": [source_chunk()] }] }),
    ];
    let mut body: String = frames
        .iter()
        .map(|f| format!("data: {}\r\n\r\n", f))
        .collect();
    if finished {
        body.push_str("data: [DONE]\r\n\r\n");
    }
    body
}

async fn generation(State(fake): State<Arc<Fake>>, Json(body): Json<Value>) -> impl IntoResponse {
    fake.generation_bodies.lock().unwrap().push(body);
    if fake.fail_generation.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "model not loaded").into_response();
    }
    let finished = !fake.truncate_stream.load(Ordering::SeqCst);
    ([(header::CONTENT_TYPE, "text/event-stream")], sse_body(finished)).into_response()
}

async fn chunks(State(fake): State<Arc<Fake>>, Json(body): Json<Value>) -> Json<Value> {
    fake.chunk_bodies.lock().unwrap().push(body);
    Json(json!({ "object": "list", "data": [source_chunk()] }))
}

async fn ingest_list(State(fake): State<Arc<Fake>>) -> Json<Value> {
    let deleted = fake.deleted.lock().unwrap().clone();
    let docs: Vec<Value> = [("a1", "a.pdf"), ("a2", "a.pdf"), ("b1", "b.pdf")]
        .into_iter()
        .filter(|(id, _)| !deleted.iter().any(|d| d.as_str() == *id))
        .map(|(id, name)| json!({ "doc_id": id, "doc_metadata": { "file_name": name } }))
        .collect();
    Json(json!({ "object": "list", "data": docs }))
}

async fn ingest_file(
    State(fake): State<Arc<Fake>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with("multipart/form-data") {
        return (StatusCode::UNPROCESSABLE_ENTITY, "expected multipart").into_response();
    }
    fake.uploads
        .lock()
        .unwrap()
        .push(String::from_utf8_lossy(&body).into_owned());
    Json(json!({
        "object": "list",
        "data": [{ "doc_id": "n1", "doc_metadata": { "file_name": "notes.txt" } }]
    }))
    .into_response()
}

async fn ingest_delete(State(fake): State<Arc<Fake>>, Path(doc_id): Path<String>) -> StatusCode {
    fake.deleted.lock().unwrap().push(doc_id);
    StatusCode::OK
}

async fn serve() -> (String, Arc<Fake>) {
    let fake = Arc::new(Fake::default());
    let app = Router::new()
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .route("/v1/chat/completions", post(generation))
        .route("/v1/completions", post(generation))
        .route("/v1/chunks", post(chunks))
        .route("/v1/ingest/list", get(ingest_list))
        .route("/v1/ingest/file", post(ingest_file))
        .route("/v1/ingest/:doc_id", delete(ingest_delete))
        .with_state(fake.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let port = listener.local_addr().expect("local_addr").port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://127.0.0.1:{}", port), fake)
}

fn temp_state_path() -> std::path::PathBuf {
    std::env::temp_dir()
        .join(format!("pgpt-it-{}", uuid::Uuid::new_v4()))
        .join("state.json")
}

#[tokio::test]
async fn chat_stream_yields_deltas_then_sources() {
    let (url, fake) = serve().await;
    let client = PgptClient::new(Some(format!("{}/", url)));
    assert!(client.health().await.unwrap().is_ok());

    let mut rx = client
        .chat_stream(ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            use_context: true,
            include_sources: true,
            context_filter: None,
        })
        .await
        .unwrap();
    let mut text = String::new();
    let mut sources = Vec::new();
    while let Some(event) = rx.recv().await {
        match event.unwrap() {
            StreamEvent::Delta(d) => text.push_str(&d),
            StreamEvent::Sources(s) => sources = s,
        }
    }
    assert_eq!(text, "Hello");
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].file_name(), Some("a.pdf"));

    let body = fake.generation_bodies.lock().unwrap()[0].clone();
    assert_eq!(body["stream"], true);
    assert_eq!(body["messages"][0]["content"], "hi");
    assert!(body.get("context_filter").is_none());
}

#[tokio::test]
async fn error_status_surfaces_as_api_error() {
    let (url, fake) = serve().await;
    fake.fail_generation.store(true, Ordering::SeqCst);
    let client = PgptClient::new(Some(url));
    let err = client
        .chat_stream(ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            use_context: false,
            include_sources: false,
            context_filter: None,
        })
        .await
        .err()
        .unwrap();
    match err {
        ApiError::Api(message) => {
            assert!(message.contains("500"));
            assert!(message.contains("model not loaded"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn chunks_and_ingest_endpoints() {
    let (url, fake) = serve().await;
    let client = PgptClient::new(Some(url));

    let chunks = client
        .chunks_retrieval(ChunksRequest {
            text: "find".to_string(),
            context_filter: None,
            limit: Some(4),
        })
        .await
        .unwrap();
    assert_eq!(chunks[0].page_label(), Some("2"));
    assert_eq!(fake.chunk_bodies.lock().unwrap()[0]["limit"], 4);

    assert_eq!(client.list_ingested().await.unwrap().len(), 3);
    let docs = client
        .ingest_file("notes.txt", b"remember this".to_vec())
        .await
        .unwrap();
    assert_eq!(docs[0].file_name(), Some("notes.txt"));
    let upload = fake.uploads.lock().unwrap()[0].clone();
    assert!(upload.contains("name=\"file\""));
    assert!(upload.contains("filename=\"notes.txt\""));
    assert!(upload.contains("remember this"));

    client.delete_ingested("b1").await.unwrap();
    assert_eq!(*fake.deleted.lock().unwrap(), vec!["b1"]);
}

#[tokio::test]
async fn chat_surface_scopes_query_to_selected_file() {
    let (url, fake) = serve().await;
    let state_path = temp_state_path();
    let kv: Arc<dyn KvStore> = Arc::new(JsonFileStore::open(&state_path).await);
    let registry = Arc::new(ClientRegistry::new());
    bootstrap::connect(&registry, kv.as_ref(), Some(url.as_str()))
        .await
        .unwrap();

    let catalog = FileCatalog::new(registry.clone());
    let files = catalog.refresh().await.unwrap();
    assert_eq!(files.len(), 2);

    let surface = Surface::open(SurfaceKind::Chat, registry.clone(), kv.clone())
        .await
        .unwrap();
    surface.set_mode(Mode::Query).await.unwrap();
    surface.toggle_file("a.pdf").await.unwrap();

    let Some(Sent::Streaming(ticket)) = surface.send("what is in a?", &files).await.unwrap()
    else {
        panic!("expected a streaming send");
    };
    let Outcome::Finished(reply) = ticket.outcome().await else {
        panic!("expected the response to finish");
    };
    assert_eq!(reply.content, "Hello");
    assert_eq!(reply.sources.as_ref().map(Vec::len), Some(1));

    let body = fake.generation_bodies.lock().unwrap()[0].clone();
    assert_eq!(body["use_context"], true);
    assert_eq!(body["include_sources"], true);
    assert_eq!(body["context_filter"]["docs_ids"], json!(["a1", "a2"]));

    // A fresh store over the same file sees the address, settings, and log.
    let reopened: Arc<dyn KvStore> = Arc::new(JsonFileStore::open(&state_path).await);
    let surface = Surface::open(SurfaceKind::Chat, Arc::new(ClientRegistry::new()), reopened.clone())
        .await
        .unwrap();
    assert_eq!(surface.settings().await.mode, Mode::Query);
    assert_eq!(surface.conversation().len().await, 2);
    let handle = bootstrap::connect(&ClientRegistry::new(), reopened.as_ref(), None)
        .await
        .unwrap();
    assert_eq!(handle.base_url(), url);
}

#[tokio::test]
async fn deleting_a_file_prunes_selection() {
    let (url, fake) = serve().await;
    let kv: Arc<dyn KvStore> = Arc::new(JsonFileStore::open(temp_state_path()).await);
    let registry = Arc::new(ClientRegistry::new());
    bootstrap::connect(&registry, kv.as_ref(), Some(url.as_str()))
        .await
        .unwrap();
    let catalog = FileCatalog::new(registry.clone());
    catalog.refresh().await.unwrap();
    let surface = Surface::open(SurfaceKind::Prompt, registry, kv).await.unwrap();
    surface.toggle_file("a.pdf").await.unwrap();

    let remaining = surface.delete_file(&catalog, "a.pdf").await.unwrap();
    assert_eq!(*fake.deleted.lock().unwrap(), vec!["a1", "a2"]);
    assert_eq!(remaining.len(), 1);
    assert!(surface.settings().await.selection.is_empty());
}

async fn connected_chat_surface(url: &str) -> Surface {
    let kv: Arc<dyn KvStore> = Arc::new(JsonFileStore::open(temp_state_path()).await);
    let registry = Arc::new(ClientRegistry::new());
    bootstrap::connect(&registry, kv.as_ref(), Some(url))
        .await
        .unwrap();
    Surface::open(SurfaceKind::Chat, registry, kv).await.unwrap()
}

#[tokio::test]
async fn stream_cut_before_done_is_not_committed() {
    let (url, fake) = serve().await;
    fake.truncate_stream.store(true, Ordering::SeqCst);
    let surface = connected_chat_surface(&url).await;

    let Some(Sent::Streaming(ticket)) = surface.send("q", &[]).await.unwrap() else {
        panic!("expected a streaming send");
    };
    assert!(matches!(
        ticket.outcome().await,
        Outcome::Failed(ClientError::StreamFailure(_))
    ));
    assert_eq!(
        surface.conversation().messages().await,
        vec![lib::conversation::Message::user("q")]
    );
}

#[tokio::test]
async fn rejected_generation_fails_the_session() {
    let (url, fake) = serve().await;
    fake.fail_generation.store(true, Ordering::SeqCst);
    let surface = connected_chat_surface(&url).await;
    let mut events = surface.subscribe();

    let Some(Sent::Streaming(ticket)) = surface.send("q", &[]).await.unwrap() else {
        panic!("expected a streaming send");
    };
    let Outcome::Failed(ClientError::StreamFailure(ApiError::Api(message))) =
        ticket.outcome().await
    else {
        panic!("expected an api failure");
    };
    assert!(message.contains("500"));
    assert_eq!(surface.session().state().await, SessionState::Idle);
    assert_eq!(surface.conversation().len().await, 1);

    let mut failed = false;
    while let Ok(event) = events.try_recv() {
        failed |= matches!(event, SurfaceEvent::Failed(_));
    }
    assert!(failed);
}
