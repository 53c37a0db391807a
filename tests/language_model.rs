use meshcord::bridge::conversation::{ConversationTurn, Role};
use meshcord::config::LlmConfig;
use meshcord::llm::{LanguageModel, OllamaClient, UpstreamError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Answer one HTTP request with `status` and `body`; yields the request body it received.
async fn one_shot_server(status: u16, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}/api/chat", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        let request_body = loop {
            let n = socket.read(&mut buf).await.unwrap();
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(split) = text.find("\r\n\r\n") {
                let length = text[..split]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if raw.len() >= split + 4 + length {
                    break text[split + 4..split + 4 + length].to_string();
                }
            }
            assert!(n > 0, "client closed before sending a full request");
        };
        let response = format!(
            "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        request_body
    });
    (endpoint, handle)
}

fn client(endpoint: &str) -> OllamaClient {
    OllamaClient::new(&LlmConfig {
        endpoint: endpoint.to_string(),
        model: "tiny".to_string(),
        max_tokens: 64,
        ..Default::default()
    })
}

fn prompt() -> Vec<ConversationTurn> {
    vec![
        ConversationTurn::new(Role::System, "Be brief."),
        ConversationTurn::new(Role::User, "hello"),
    ]
}

#[tokio::test]
async fn completion_posts_history_and_reads_content() {
    let (endpoint, server) =
        one_shot_server(200, r#"{"model":"tiny","message":{"role":"assistant","content":"hi there"},"done":true}"#).await;

    let reply = client(&endpoint).complete(&prompt()).await.unwrap();
    assert_eq!(reply, "hi there");

    let sent: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
    assert_eq!(sent["model"], "tiny");
    assert_eq!(sent["stream"], false);
    assert_eq!(sent["options"]["max_tokens"], 64);
    assert_eq!(sent["messages"][0]["role"], "system");
    assert_eq!(sent["messages"][1]["content"], "hello");
}

#[tokio::test]
async fn error_status_is_an_upstream_failure() {
    let (endpoint, server) = one_shot_server(503, r#"{"error":"model loading"}"#).await;
    let err = client(&endpoint).complete(&prompt()).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Status { status: 503 }));
    server.await.unwrap();
}

#[tokio::test]
async fn missing_content_is_malformed() {
    let (endpoint, server) = one_shot_server(200, r#"{"done":true}"#).await;
    let err = client(&endpoint).complete(&prompt()).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Malformed(_)));
    server.await.unwrap();
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}/api/chat", listener.local_addr().unwrap());
    drop(listener);

    let err = client(&endpoint).complete(&prompt()).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Transport(_)));
}
