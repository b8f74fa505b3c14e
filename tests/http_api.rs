//! HTTP API tests: the router is served on an ephemeral port over
//! in-process services (hash embeddings, memory index, scripted LLM).

use anyhow::Result;
use async_trait::async_trait;
use building_assistant::config::{ChunkingConfig, RetrievalConfig, ServerConfig};
use building_assistant::embedding::HashProvider;
use building_assistant::llm::{ChatMessage, ChatModel, FunctionCall, Role, ToolCall, ToolSpec};
use building_assistant::predict::HeuristicPredictor;
use building_assistant::rag::DocumentAssistant;
use building_assistant::sensors::MockSensorSource;
use building_assistant::server::router;
use building_assistant::services::Services;
use building_assistant::store::MemoryIndex;
use building_assistant::tools::ToolRegistry;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Replays scripted replies, then answers "ok". Counts every call.
#[derive(Default)]
struct ScriptedChat {
    replies: Mutex<VecDeque<ChatMessage>>,
    calls: AtomicUsize,
}

impl ScriptedChat {
    fn with_replies(replies: Vec<ChatMessage>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> Result<ChatMessage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.replies.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| ChatMessage::assistant("ok")))
    }
}

fn services(llm: Arc<ScriptedChat>) -> Services {
    let assistant = Arc::new(DocumentAssistant::new(
        Arc::new(HashProvider::new(64)),
        Arc::new(MemoryIndex::new()),
        ChunkingConfig::default(),
        RetrievalConfig::default(),
        16,
    ));
    Services {
        assistant,
        llm,
        sensors: Arc::new(MockSensorSource::default()),
        predictor: Arc::new(HeuristicPredictor),
        tools: Arc::new(ToolRegistry::with_builtins()),
        sql_url: "sqlite::memory:".to_string(),
        max_rows: 20,
        max_iterations: 10,
    }
}

/// Serve the router on 127.0.0.1:0 and return its base URL.
async fn spawn_server(services: Services) -> String {
    let app = router(services, &ServerConfig::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn minimal_pdf_with_phrase(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

const MAINTENANCE_CSV: &str = "equipment_id,task,interval\n\
    HVAC-01,Replace air filters,every 3 months\n\
    CHILLER-02,Clean condenser coils,every 12 months\n";

async fn upload(base: &str, filename: &str, bytes: Vec<u8>) -> reqwest::Response {
    let form = Form::new().part("file", Part::bytes(bytes).file_name(filename.to_string()));
    reqwest::Client::new()
        .post(format!("{}/upload-document", base))
        .multipart(form)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn healthz_is_ok() {
    let base = spawn_server(services(Arc::new(ScriptedChat::default()))).await;
    let body: Value = reqwest::get(format!("{}/healthz", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn upload_csv_reports_chunks() {
    let base = spawn_server(services(Arc::new(ScriptedChat::default()))).await;

    let resp = upload(&base, "maintenance.csv", MAINTENANCE_CSV.as_bytes().to_vec()).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"status": "success", "chunks": 2, "file_type": ".csv"}));
}

#[tokio::test]
async fn upload_pdf_is_accepted() {
    let base = spawn_server(services(Arc::new(ScriptedChat::default()))).await;

    let pdf = minimal_pdf_with_phrase("chiller oil check");
    let resp = upload(&base, "Chiller Manual.PDF", pdf).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["file_type"], ".pdf");
    assert!(body["chunks"].as_u64().unwrap() >= 1, "body={}", body);
}

#[tokio::test]
async fn pdf_answer_cites_first_page() {
    let llm = Arc::new(ScriptedChat::with_replies(vec![ChatMessage::assistant(
        "Check the chiller oil monthly.",
    )]));
    let base = spawn_server(services(llm.clone())).await;

    let pdf = minimal_pdf_with_phrase("chiller oil check");
    let resp = upload(&base, "Chiller Manual.PDF", pdf).await;
    assert_eq!(resp.status(), 200);

    let body: Value = reqwest::Client::new()
        .post(format!("{}/ask", base))
        .json(&json!({"query": "when is the chiller oil check", "k": 1}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["answer"], "Check the chiller oil monthly.");
    let citations = body["citations"].as_array().unwrap();
    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0]["source"], "Chiller Manual.PDF");
    assert_eq!(citations[0]["page"], 0);
    assert!(citations[0]["snippet"]
        .as_str()
        .unwrap()
        .contains("chiller oil check"));
    assert_eq!(llm.calls(), 1);
}

#[tokio::test]
async fn upload_rejects_other_formats() {
    let base = spawn_server(services(Arc::new(ScriptedChat::default()))).await;

    let resp = upload(&base, "notes.txt", b"hello".to_vec()).await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unsupported_format");
}

#[tokio::test]
async fn upload_corrupt_pdf_is_unprocessable() {
    let base = spawn_server(services(Arc::new(ScriptedChat::default()))).await;

    let resp = upload(&base, "broken.pdf", b"not a valid pdf".to_vec()).await;
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "extraction_failed");
}

#[tokio::test]
async fn upload_without_file_field_is_bad_request() {
    let base = spawn_server(services(Arc::new(ScriptedChat::default()))).await;

    let form = Form::new().text("comment", "no file here");
    let resp = reqwest::Client::new()
        .post(format!("{}/upload-document", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn short_query_gets_greeting_without_llm() {
    let llm = Arc::new(ScriptedChat::default());
    let base = spawn_server(services(llm.clone())).await;

    let body: Value = reqwest::Client::new()
        .post(format!("{}/ask", base))
        .json(&json!({"query": "hello there"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["answer"], "Hello! How can I assist you today?");
    assert_eq!(body["citations"], json!([]));
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn ask_on_empty_index() {
    let llm = Arc::new(ScriptedChat::default());
    let base = spawn_server(services(llm.clone())).await;

    let body: Value = reqwest::Client::new()
        .post(format!("{}/ask", base))
        .json(&json!({"query": "How often are filters replaced?"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["answer"], "No documents ingested yet.");
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn ask_returns_answer_with_citations() {
    let llm = Arc::new(ScriptedChat::with_replies(vec![ChatMessage::assistant(
        "Replace the air filters every 3 months.",
    )]));
    let base = spawn_server(services(llm.clone())).await;
    upload(&base, "maintenance.csv", MAINTENANCE_CSV.as_bytes().to_vec()).await;

    let body: Value = reqwest::Client::new()
        .post(format!("{}/ask", base))
        .json(&json!({"query": "How often should HVAC-01 air filters be replaced?", "k": 1}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["answer"], "Replace the air filters every 3 months.");
    let citations = body["citations"].as_array().unwrap();
    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0]["source"], "maintenance.csv");
    assert_eq!(citations[0]["page"], -1);
    assert!(citations[0]["snippet"].as_str().unwrap().contains("HVAC-01"));
    assert_eq!(llm.calls(), 1);
}

#[tokio::test]
async fn equipment_health_known_and_unknown() {
    let base = spawn_server(services(Arc::new(ScriptedChat::default()))).await;

    let resp = reqwest::get(format!("{}/health/HVAC-01", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["equipment_id"], "HVAC-01");
    assert_eq!(body["sensors"]["vibration"], 0.21);
    let p = body["failure_probability"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&p));

    let resp = reqwest::get(format!("{}/health/BOILER-99", base)).await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
    assert!(body["error"]["message"].as_str().unwrap().contains("BOILER-99"));
}

#[tokio::test]
async fn agent_uses_tools_then_answers() {
    let tool_step = ChatMessage {
        role: Role::Assistant,
        content: None,
        tool_calls: vec![ToolCall {
            id: "call_1".to_string(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: "sensor_live_data".to_string(),
                arguments: r#"{"equipment_id":"CHILLER-02"}"#.to_string(),
            },
        }],
        tool_call_id: None,
    };
    let llm = Arc::new(ScriptedChat::with_replies(vec![
        tool_step,
        ChatMessage::assistant("CHILLER-02 reads 45 degrees."),
    ]));
    let base = spawn_server(services(llm.clone())).await;

    let body: Value = reqwest::Client::new()
        .post(format!("{}/agent", base))
        .json(&json!({"question": "What is CHILLER-02 reading?"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"answer": "CHILLER-02 reads 45 degrees."}));
    assert_eq!(llm.calls(), 2);
}

#[tokio::test]
async fn agent_rejects_empty_question() {
    let llm = Arc::new(ScriptedChat::default());
    let base = spawn_server(services(llm.clone())).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/agent", base))
        .json(&json!({"question": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(llm.calls(), 0);
}
