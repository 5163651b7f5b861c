use axum::http::StatusCode;
use chrono::{Duration, SecondsFormat};
use serde_json::json;

mod common;

use common::{create_test_app, token_for};

#[tokio::test]
async fn test_offline_answer_before_deadline_is_scored() {
    let app = create_test_app().await;
    let token = token_for("alice");
    let session_id = app.start_session(&token).await;
    let base = format!("/api/v1/sessions/{}", session_id);

    app.clock.advance_secs(60);
    let (status, _) = app
        .post(
            &format!("{}/answer", base),
            &token,
            json!({ "question_id": "q1", "selected_answer": "b", "client_seq": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // Client goes offline and answers q2 locally
    app.clock.advance_secs(120);
    let recorded_at = app.clock_now_rfc3339();

    app.clock.advance_secs(500);
    let (status, body) = app
        .post(
            &format!("{}/sync", base),
            &token,
            json!({
                "device_info": { "device_id": "tablet-7" },
                "events": [{
                    "type": "answer",
                    "question_id": "q2",
                    "selected_answer": 42,
                    "client_seq": 2,
                    "recorded_at": recorded_at
                }]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "sync failed: {}", body);
    assert_eq!(body["accepted_count"], 1);
    assert_eq!(body["results"][0]["status"], "applied");
    assert_eq!(body["session"]["status"], "expired");
    assert_eq!(body["session"]["score"]["correct_count"], 2);

    let (_, answers) = app.get(&format!("{}/answers", base), &token).await;
    assert_eq!(answers.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_late_sync_rescores_an_expired_session() {
    let app = create_test_app().await;
    let token = token_for("alice");
    let session_id = app.start_session(&token).await;
    let base = format!("/api/v1/sessions/{}", session_id);

    let before_deadline = app.clock_now_rfc3339_plus(Duration::seconds(300));
    let after_deadline = app.clock_now_rfc3339_plus(Duration::seconds(650));

    app.clock.advance_secs(700);
    let (_, snapshot) = app.get(&base, &token).await;
    assert_eq!(snapshot["status"], "expired");
    assert_eq!(snapshot["score"]["correct_count"], 0);

    let (status, body) = app
        .post(
            &format!("{}/sync", base),
            &token,
            json!({
                "answers": [
                    { "type": "answer", "question_id": "q3", "selected_answer": ["a", "c"],
                      "client_seq": 4, "recorded_at": after_deadline },
                    { "type": "answer", "question_id": "q1", "selected_answer": "b",
                      "client_seq": 3, "recorded_at": before_deadline }
                ]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted_count"], 1);
    assert_eq!(body["rejected_count"], 1);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["client_seq"], 3);
    assert_eq!(results[0]["status"], "applied");
    assert_eq!(results[1]["status"], "rejected");
    assert_eq!(results[1]["reason"], "after_deadline");
    assert_eq!(body["session"]["score"]["correct_count"], 1);
}

#[tokio::test]
async fn test_resent_batch_is_idempotent() {
    let app = create_test_app().await;
    let token = token_for("alice");
    let session_id = app.start_session(&token).await;
    let base = format!("/api/v1/sessions/{}", session_id);
    let recorded_at = app.clock_now_rfc3339();

    let batch = json!({
        "events": [
            { "type": "answer", "question_id": "q1", "selected_answer": "a",
              "client_seq": 1, "recorded_at": recorded_at },
            { "type": "flag", "question_id": "q1", "client_seq": 2, "recorded_at": recorded_at },
            { "type": "answer", "question_id": "q4", "selected_answer": "a",
              "client_seq": 3, "recorded_at": recorded_at }
        ],
        "current_question_index": 1
    });

    let (status, first) = app.post(&format!("{}/sync", base), &token, batch.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["results"][0]["status"], "applied");
    assert_eq!(first["results"][1]["status"], "applied");
    // Unknown question is rejected on its own without failing the batch
    assert_eq!(first["results"][2]["status"], "rejected");
    assert_eq!(first["session"]["current_question_index"], 1);
    assert_eq!(first["session"]["flagged_count"], 1);

    let (status, second) = app.post(&format!("{}/sync", base), &token, batch).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["results"][0]["status"], "duplicate");
    assert_eq!(second["results"][1]["status"], "duplicate");
    assert_eq!(second["session"]["answered_count"], 1);
}

#[tokio::test]
async fn test_sync_against_paused_session_rejects_everything() {
    let app = create_test_app().await;
    let token = token_for("alice");
    let session_id = app.start_session(&token).await;
    let base = format!("/api/v1/sessions/{}", session_id);
    let recorded_at = app.clock_now_rfc3339();
    app.post_empty(&format!("{}/pause", base), &token).await;

    let (status, body) = app
        .post(
            &format!("{}/sync", base),
            &token,
            json!({ "events": [{ "type": "answer", "question_id": "q1",
                "selected_answer": "b", "client_seq": 1, "recorded_at": recorded_at }] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rejected_count"], 1);
    assert_eq!(body["results"][0]["accepted"], false);
    assert_eq!(body["session"]["status"], "paused");
    assert_eq!(body["session"]["answered_count"], 0);
}

#[tokio::test]
async fn test_sync_by_another_user_is_forbidden() {
    let app = create_test_app().await;
    let session_id = app.start_session(&token_for("alice")).await;

    let (status, _) = app
        .post(
            &format!("/api/v1/sessions/{}/sync", session_id),
            &token_for("mallory"),
            json!({ "events": [] }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

trait ClockExt {
    fn clock_now_rfc3339(&self) -> String;
    fn clock_now_rfc3339_plus(&self, offset: Duration) -> String;
}

impl ClockExt for common::TestApp {
    fn clock_now_rfc3339(&self) -> String {
        self.clock_now_rfc3339_plus(Duration::zero())
    }

    fn clock_now_rfc3339_plus(&self, offset: Duration) -> String {
        use examprep_api::utils::clock::Clock;
        (self.clock.now() + offset).to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}
