//! End-to-end conversations against a mock completion API and SQLite.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatgate_core::{Error, ProviderError, Role};
use chatgate_providers::{OpenAIClient, TiktokenTokenizer};
use chatgate_session::{
    AnswerOptions, ConversationStore, ProvisionOptions, SessionManager, SqliteConversationStore,
    TurnOutcome,
};

fn completion(content: &str) -> serde_json::Value {
    json!({
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 20, "completion_tokens": 8, "total_tokens": 28 }
    })
}

fn setup(server: &MockServer, db: &TempDir) -> (SessionManager, Arc<SqliteConversationStore>) {
    let store = Arc::new(
        SqliteConversationStore::open(
            db.path().join("conversations.db"),
            "chat",
            ProvisionOptions::default(),
        )
        .unwrap(),
    );
    let client = Arc::new(OpenAIClient::new().with_base_url(server.uri()));
    let manager = SessionManager::new(store.clone(), client, Arc::new(TiktokenTokenizer::new()))
        .with_defaults(AnswerOptions::new().with_api_key("sk-test"));
    (manager, store)
}

#[tokio::test]
async fn test_follow_up_question_carries_history() {
    let server = MockServer::start().await;
    let db = TempDir::new().unwrap();

    // The follow-up also mentions France, so it must win on priority
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("Germany"))
        .and(body_string_contains("Paris"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            "The capital of Germany is Berlin.",
        )))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("France"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            "The capital of France is Paris.",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let (manager, store) = setup(&server, &db);

    let first = manager
        .answer("s1", "What is the capital of France?", "gpt-3.5-turbo", AnswerOptions::new())
        .await
        .unwrap();
    assert!(first.messages[1].content.contains("Paris"));

    let second = manager
        .answer("s1", "What is the capital of Germany?", "gpt-3.5-turbo", AnswerOptions::new())
        .await
        .unwrap();
    assert!(second.messages[3].content.contains("Berlin"));
    assert_eq!(second.total_tokens, 28);

    let stored = store.get("s1").await.unwrap().unwrap();
    assert_eq!(stored.messages.len(), 4);
    assert_eq!(stored.messages[2].role, Role::User);
    assert!(stored.last_update.is_some());
}

#[tokio::test]
async fn test_streamed_reply_survives_reopen() {
    let server = MockServer::start().await;
    let db = TempDir::new().unwrap();

    let body = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
                data: {\"choices\":[{\"delta\":{\"content\":\"The capital of \"}}]}\n\n\
                data: {\"choices\":[{\"delta\":{\"content\":\"France is Paris.\"}}]}\n\n\
                data: [DONE]\n\n";

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "stream": true, "max_tokens": 50 })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    {
        let (manager, _store) = setup(&server, &db);
        let mut reply = manager
            .answer_stream("s1", "What is the capital of France?", "gpt-3.5-turbo", AnswerOptions::new(), None)
            .await
            .unwrap();
        let completion = reply.completion();

        let mut raw = Vec::new();
        while let Some(chunk) = reply.next().await {
            raw.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(String::from_utf8(raw).unwrap(), body);
        assert!(matches!(completion.wait().await, TurnOutcome::Persisted(_)));
    }

    let (manager, _store) = setup(&server, &db);
    let record = manager.history("s1").await.unwrap().unwrap();
    assert_eq!(record.messages[1].content, "The capital of France is Paris.");
    assert!(record.messages[1].token.unwrap() > 0);
    assert!(record.total_tokens > u64::from(record.messages[1].token.unwrap()));
}

#[tokio::test]
async fn test_rejected_request_stores_nothing() {
    let server = MockServer::start().await;
    let db = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "message": "Incorrect API key provided" }
        })))
        .mount(&server)
        .await;

    let (manager, store) = setup(&server, &db);
    let err = manager
        .answer("s1", "What is the capital of France?", "gpt-3.5-turbo", AnswerOptions::new())
        .await
        .unwrap_err();

    match err {
        Error::Provider(ProviderError::ApiError { status, message, .. }) => {
            assert_eq!(status, 401);
            assert_eq!(message, "Incorrect API key provided");
        }
        other => panic!("expected ApiError, got {other:?}"),
    }
    assert!(store.get("s1").await.unwrap().is_none());
}
