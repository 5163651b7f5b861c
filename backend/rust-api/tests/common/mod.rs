#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use examprep_api::{
    config::{Config, SessionsConfig},
    create_router,
    middlewares::auth::{JwtClaims, JwtService},
    models::{AnswerKey, AnswerValue, QuestionType, QuizDefinition, QuizQuestion},
    services::{catalog::InMemoryCatalog, AppState},
    utils::clock::ManualClock,
};

pub const JWT_SECRET: &str = "test-secret";
pub const QUIZ_ID: &str = "quiz-geo";
pub const METRICS_AUTH: &str = "metrics:secret";

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub clock: Arc<ManualClock>,
    pub catalog: Arc<InMemoryCatalog>,
}

pub fn test_config() -> Config {
    Config {
        mongo_uri: "mongodb://localhost:27017".to_string(),
        mongo_database: "examprep_test".to_string(),
        redis_uri: None,
        jwt_secret: JWT_SECRET.to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        metrics_auth: Some(METRICS_AUTH.to_string()),
        sessions: SessionsConfig::default(),
    }
}

/// App over in-memory storage with a 600 s, three-question quiz allowing two attempts.
///
/// Answer keys: q1 = "b", q2 = 42, q3 = ["a", "c"].
pub async fn create_test_app() -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let catalog = Arc::new(InMemoryCatalog::new());
    catalog
        .insert_quiz(QuizDefinition {
            quiz_id: QUIZ_ID.to_string(),
            time_limit_seconds: 600,
            passing_score: 60.0,
            max_attempts: Some(2),
            questions: vec![
                question("q1", QuestionType::SingleChoice),
                question("q2", QuestionType::Numeric),
                question("q3", QuestionType::MultipleChoice),
            ],
        })
        .await;
    set_key(&catalog, "q1", QuestionType::SingleChoice, AnswerValue::Text("b".to_string())).await;
    set_key(&catalog, "q2", QuestionType::Numeric, AnswerValue::Number(42.0)).await;
    set_key(
        &catalog,
        "q3",
        QuestionType::MultipleChoice,
        AnswerValue::List(vec![
            AnswerValue::Text("a".to_string()),
            AnswerValue::Text("c".to_string()),
        ]),
    )
    .await;

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
    ));
    let state = Arc::new(AppState::in_memory(
        test_config(),
        catalog.clone(),
        clock.clone(),
    ));

    TestApp {
        router: create_router(state.clone()),
        state,
        clock,
        catalog,
    }
}

fn question(id: &str, kind: QuestionType) -> QuizQuestion {
    QuizQuestion {
        question_id: id.to_string(),
        kind,
    }
}

pub async fn set_key(catalog: &InMemoryCatalog, id: &str, kind: QuestionType, value: AnswerValue) {
    catalog
        .insert_answer_key(AnswerKey {
            question_id: id.to_string(),
            kind,
            correct_answer: value,
        })
        .await;
}

pub fn token_for(user_id: &str) -> String {
    JwtService::new(JWT_SECRET)
        .generate_token(&JwtClaims::new(user_id, "student", 3600))
        .unwrap()
}

pub fn admin_token(user_id: &str) -> String {
    JwtService::new(JWT_SECRET)
        .generate_token(&JwtClaims::new(user_id, "admin", 3600))
        .unwrap()
}

impl TestApp {
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).to_string())
            })
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request("GET", uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request("POST", uri, Some(token), Some(body)).await
    }

    pub async fn post_empty(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request("POST", uri, Some(token), None).await
    }

    /// Creates a session for `QUIZ_ID` and returns its id.
    pub async fn create_session(&self, token: &str) -> String {
        let (status, body) = self
            .post(
                "/api/v1/sessions",
                token,
                serde_json::json!({ "quiz_id": QUIZ_ID }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {}", body);
        body["session_id"].as_str().unwrap().to_string()
    }

    pub async fn start_session(&self, token: &str) -> String {
        let session_id = self.create_session(token).await;
        let (status, body) = self
            .post_empty(&format!("/api/v1/sessions/{}/start", session_id), token)
            .await;
        assert_eq!(status, StatusCode::OK, "start failed: {}", body);
        session_id
    }
}
