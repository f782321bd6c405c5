mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use common::{RecordingSink, SinkCall};
use foundry_chat::{
    AgentChunk, ChatService, FoundryAgent, FoundryClient, RelayConfig, RemoteAgent, ResponseMode,
    ThreadId, TurnStatus,
};

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl Recorded {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }
}

struct Reply {
    status: u16,
    content_type: &'static str,
    headers: Vec<(&'static str, String)>,
    body: String,
    /// Stop writing at this body offset for this long.
    pause: Option<(usize, Duration)>,
}

impl Reply {
    fn json(value: serde_json::Value) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            headers: Vec::new(),
            body: value.to_string(),
            pause: None,
        }
    }

    fn sse(events: &[(&str, serde_json::Value)]) -> Self {
        let mut body = String::new();
        for (event, data) in events {
            body.push_str(&format!("event: {event}\ndata: {data}\n\n"));
        }
        body.push_str("event: done\ndata: [DONE]\n\n");
        Self {
            status: 200,
            content_type: "text/event-stream",
            headers: Vec::new(),
            body,
            pause: None,
        }
    }

    fn error(status: u16, code: &str, message: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            headers: Vec::new(),
            body: serde_json::json!({"error": {"code": code, "message": message}}).to_string(),
            pause: None,
        }
    }

    /// Hold back the last event named `event` for `pause`.
    fn pause_before_last(mut self, event: &str, pause: Duration) -> Self {
        self.pause = self
            .body
            .rfind(&format!("event: {event}\n"))
            .map(|at| (at, pause));
        self
    }
}

type Handler = Arc<dyn Fn(&Recorded) -> Reply + Send + Sync>;

/// A one-request-per-connection HTTP/1.1 stub.
struct StubServer {
    base: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl StubServer {
    async fn start(handler: impl Fn(&Recorded) -> Reply + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = Arc::new(handler);
        let log = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let handler = Arc::clone(&handler);
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let _ = handle(socket, handler, log).await;
                });
            }
        });
        Self {
            base: format!("http://{addr}/api/projects/demo"),
            requests,
        }
    }

    fn config(&self) -> RelayConfig {
        RelayConfig::new(&self.base, "test-key", "asst_1")
            .unwrap()
            .with_poll_interval(Duration::from_millis(10))
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

async fn handle(
    mut socket: TcpStream,
    handler: Handler,
    log: Arc<Mutex<Vec<Recorded>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split(' ');
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    let length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();

    let recorded = Recorded {
        method,
        target,
        headers,
        body,
    };
    let reply = handler(&recorded);
    log.lock().unwrap().push(recorded);

    let mut response = format!(
        "HTTP/1.1 {} Stub\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n",
        reply.status,
        reply.content_type,
        reply.body.len()
    );
    for (name, value) in &reply.headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    socket.write_all(response.as_bytes()).await?;
    let body = reply.body.as_bytes();
    match reply.pause {
        Some((at, pause)) => {
            socket.write_all(&body[..at]).await?;
            socket.flush().await?;
            tokio::time::sleep(pause).await;
            socket.write_all(&body[at..]).await?;
        }
        None => socket.write_all(body).await?,
    }
    socket.shutdown().await
}

fn thread_json(id: &str) -> serde_json::Value {
    serde_json::json!({"id": id, "object": "thread", "created_at": 1700000000, "metadata": {}})
}

fn run_json(status: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "run_1",
        "object": "thread.run",
        "thread_id": "thread_1",
        "assistant_id": "asst_1",
        "status": status,
        "created_at": 1700000010,
    })
}

fn message_json(role: &str, text: &str, created_at: i64) -> serde_json::Value {
    let run_id = (role == "assistant").then_some("run_1");
    serde_json::json!({
        "id": "msg_1",
        "object": "thread.message",
        "thread_id": "thread_1",
        "role": role,
        "content": [{"type": "text", "text": {"value": text, "annotations": []}}],
        "created_at": created_at,
        "run_id": run_id,
    })
}

fn delta_json(text: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "msg_2",
        "object": "thread.message.delta",
        "delta": {"content": [{"index": 0, "type": "text", "text": {"value": text}}]},
    })
}

fn streaming_handler(request: &Recorded) -> Reply {
    match (request.method.as_str(), request.path()) {
        ("POST", "/api/projects/demo/threads") => Reply::json(thread_json("thread_1")),
        ("POST", "/api/projects/demo/threads/thread_1/messages") => {
            Reply::json(message_json("user", "Hello", 1700000005))
        }
        ("POST", "/api/projects/demo/threads/thread_1/runs") => Reply::sse(&[
            ("thread.run.created", run_json("queued")),
            ("thread.run.in_progress", run_json("in_progress")),
            ("thread.message.delta", delta_json("Hi")),
            ("thread.message.delta", delta_json(" there!")),
            ("thread.run.completed", run_json("completed")),
        ]),
        _ => Reply::error(404, "not_found", "no such route"),
    }
}

#[tokio::test]
async fn create_thread_posts_with_credentials() {
    let server = StubServer::start(streaming_handler).await;
    let client = FoundryClient::new(&server.config()).unwrap();
    let thread = client.create_thread().await.unwrap();
    assert_eq!(thread.id, ThreadId::new("thread_1"));

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(
        requests[0].target,
        "/api/projects/demo/threads?api-version=v1"
    );
    assert_eq!(
        requests[0].header("authorization"),
        Some("Bearer test-key")
    );
    assert_eq!(requests[0].body, "{}");
}

#[tokio::test]
async fn streamed_run_becomes_chunks() {
    let server = StubServer::start(streaming_handler).await;
    let agent = FoundryAgent::from_config(&server.config()).unwrap();
    let thread = agent.create_thread().await.unwrap();
    let chunks: Vec<AgentChunk> = agent
        .stream_response(&thread, "Hello")
        .await
        .unwrap()
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;
    assert_eq!(
        chunks,
        vec![
            AgentChunk::Started {
                run_id: "run_1".to_string()
            },
            AgentChunk::Text("Hi".to_string()),
            AgentChunk::Text(" there!".to_string()),
            AgentChunk::Complete,
        ]
    );

    let requests = server.requests();
    let message: serde_json::Value = serde_json::from_str(&requests[1].body).unwrap();
    assert_eq!(message["role"], "user");
    assert_eq!(message["content"], "Hello");
    let run: serde_json::Value = serde_json::from_str(&requests[2].body).unwrap();
    assert_eq!(run["assistant_id"], "asst_1");
    assert_eq!(run["stream"], true);
    assert_eq!(requests[2].header("accept"), Some("text/event-stream"));
}

#[tokio::test]
async fn chat_service_over_http() {
    let server = StubServer::start(streaming_handler).await;
    let agent = Arc::new(FoundryAgent::from_config(&server.config()).unwrap());
    let service = ChatService::new(agent);
    let session = service.start_session();

    let mut sink = RecordingSink::default();
    let turn = service.handle_message(&session, "Hello", &mut sink).await;
    assert_eq!(turn.status(), TurnStatus::Complete);
    assert_eq!(
        sink.calls.iter().map(|(_, c)| c.clone()).collect::<Vec<_>>(),
        vec![
            SinkCall::Append("Hi".to_string()),
            SinkCall::Append(" there!".to_string()),
            SinkCall::Finished(TurnStatus::Complete, None),
        ]
    );
    assert_eq!(
        service.session(&session).unwrap().thread_id,
        Some(ThreadId::new("thread_1"))
    );
}

#[tokio::test]
async fn streamed_reply_may_outlast_the_request_timeout() {
    let server = StubServer::start(|request: &Recorded| {
        if request.path().ends_with("/runs") {
            Reply::sse(&[
                ("thread.run.created", run_json("queued")),
                ("thread.message.delta", delta_json("Hi")),
                ("thread.message.delta", delta_json(" there")),
                ("thread.run.completed", run_json("completed")),
            ])
            .pause_before_last("thread.message.delta", Duration::from_millis(1500))
        } else {
            streaming_handler(request)
        }
    })
    .await;
    let config = server
        .config()
        .with_request_timeout(Duration::from_millis(500))
        .with_turn_timeout(Duration::from_secs(10));
    let agent = Arc::new(FoundryAgent::from_config(&config).unwrap());
    let service = ChatService::new(agent).with_turn_timeout(config.turn_timeout);
    let session = service.start_session();

    let mut sink = RecordingSink::default();
    let turn = service.handle_message(&session, "Hello", &mut sink).await;
    assert_eq!(turn.status(), TurnStatus::Complete, "{:?}", turn.error());
    assert_eq!(sink.appends(), vec!["Hi", " there"]);
    assert_eq!(sink.finished(), vec![TurnStatus::Complete]);
}

#[tokio::test]
async fn plain_requests_still_time_out() {
    let server = StubServer::start(|_: &Recorded| {
        let mut reply = Reply::json(thread_json("thread_1"));
        reply.pause = Some((0, Duration::from_secs(5)));
        reply
    })
    .await;
    let config = server.config().with_request_timeout(Duration::from_millis(200));
    let client = FoundryClient::new(&config).unwrap();
    let err = client.create_thread().await.unwrap_err();
    assert!(err.is_timeout(), "{err:?}");
}

#[tokio::test]
async fn failed_run_event_fails_the_stream() {
    let server = StubServer::start(|request: &Recorded| {
        if request.path().ends_with("/runs") {
            let mut failed = run_json("failed");
            failed["last_error"] =
                serde_json::json!({"code": "server_error", "message": "model overloaded"});
            Reply::sse(&[
                ("thread.run.created", run_json("queued")),
                ("thread.message.delta", delta_json("par")),
                ("thread.run.failed", failed),
            ])
        } else {
            streaming_handler(request)
        }
    })
    .await;
    let agent = FoundryAgent::from_config(&server.config()).unwrap();
    let chunks: Vec<_> = agent
        .stream_response(&ThreadId::new("thread_1"), "Hello")
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(chunks.len(), 3);
    assert_eq!(
        chunks[1].as_ref().unwrap(),
        &AgentChunk::Text("par".to_string())
    );
    let err = chunks[2].as_ref().unwrap_err();
    assert!(err.is_run_failed());
    assert!(err.to_string().contains("model overloaded"));
}

#[tokio::test]
async fn poll_mode_fetches_the_run_reply() {
    let server = StubServer::start(|request: &Recorded| {
        match (request.method.as_str(), request.path()) {
            ("POST", "/api/projects/demo/threads/thread_1/messages") => {
                Reply::json(message_json("user", "Hello", 1700000005))
            }
            ("POST", "/api/projects/demo/threads/thread_1/runs") => {
                Reply::json(run_json("queued"))
            }
            ("GET", "/api/projects/demo/threads/thread_1/runs/run_1") => {
                Reply::json(run_json("completed"))
            }
            ("GET", "/api/projects/demo/threads/thread_1/messages") => Reply::json(
                serde_json::json!({
                    "object": "list",
                    "data": [
                        message_json("assistant", "Polled reply", 1700000020),
                        message_json("user", "Hello", 1700000005),
                    ],
                    "has_more": false,
                }),
            ),
            _ => Reply::error(404, "not_found", "no such route"),
        }
    })
    .await;
    let config = server.config().with_mode(ResponseMode::Poll);
    let agent = FoundryAgent::from_config(&config).unwrap();
    let chunks: Vec<AgentChunk> = agent
        .stream_response(&ThreadId::new("thread_1"), "Hello")
        .await
        .unwrap()
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;
    assert_eq!(
        chunks,
        vec![
            AgentChunk::Started {
                run_id: "run_1".to_string()
            },
            AgentChunk::Text("Polled reply".to_string()),
            AgentChunk::Complete,
        ]
    );

    let requests = server.requests();
    let run: serde_json::Value = serde_json::from_str(&requests[1].body).unwrap();
    assert!(run.get("stream").is_none());
    let list = requests.last().unwrap();
    assert!(list.target.contains("run_id=run_1"));
    assert!(list.target.contains("order=desc"));
}

#[tokio::test]
async fn error_statuses_map_to_error_kinds() {
    let server = StubServer::start(|request: &Recorded| match request.path() {
        "/api/projects/demo/threads" => Reply::error(401, "unauthorized", "bad key"),
        _ => Reply {
            headers: vec![("retry-after", "7".to_string())],
            ..Reply::error(429, "rate_limited", "slow down")
        },
    })
    .await;
    let client = FoundryClient::new(&server.config()).unwrap();

    let err = client.create_thread().await.unwrap_err();
    assert!(err.is_authentication());
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("bad key"));

    let err = client
        .get_run(&ThreadId::new("thread_1"), "run_1")
        .await
        .unwrap_err();
    assert!(err.is_rate_limit());
    assert!(err.is_retryable());
}

#[tokio::test]
async fn cancel_run_posts_to_the_run() {
    let server = StubServer::start(|_: &Recorded| Reply::json(run_json("cancelling"))).await;
    let agent = FoundryAgent::from_config(&server.config()).unwrap();
    agent
        .cancel_run(&ThreadId::new("thread_1"), "run_1")
        .await
        .unwrap();
    let requests = server.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(
        requests[0].path(),
        "/api/projects/demo/threads/thread_1/runs/run_1/cancel"
    );
}
