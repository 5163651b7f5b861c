use axum::http::StatusCode;
use serde_json::json;

mod common;

use common::{create_test_app, token_for};

#[tokio::test]
async fn test_submitted_answer_is_listed() {
    let app = create_test_app().await;
    let token = token_for("alice");
    let session_id = app.start_session(&token).await;
    let base = format!("/api/v1/sessions/{}", session_id);

    let (status, ack) = app
        .post(
            &format!("{}/answer", base),
            &token,
            json!({ "question_id": "q1", "selected_answer": "b", "client_seq": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["accepted"], true);
    assert_eq!(ack["effect"], "applied");
    assert_eq!(ack["session_status"], "in_progress");
    assert_eq!(ack["question_id"], "q1");

    let (status, answers) = app.get(&format!("{}/answers", base), &token).await;
    assert_eq!(status, StatusCode::OK);
    let answers = answers.as_array().unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0]["question_id"], "q1");
    assert_eq!(answers[0]["selected_answer"], "b");
    assert_eq!(answers[0]["client_seq"], 1);
}

#[tokio::test]
async fn test_older_client_seq_does_not_overwrite() {
    let app = create_test_app().await;
    let token = token_for("alice");
    let session_id = app.start_session(&token).await;
    let base = format!("/api/v1/sessions/{}", session_id);

    let (status, newer) = app
        .post(
            &format!("{}/answer", base),
            &token,
            json!({ "question_id": "q2", "selected_answer": 42, "client_seq": 5 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(newer["effect"], "applied");

    let (status, older) = app
        .post(
            &format!("{}/answer", base),
            &token,
            json!({ "question_id": "q2", "selected_answer": 7, "client_seq": 3 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(older["accepted"], true);
    assert_eq!(older["effect"], "duplicate");
    assert_eq!(older["version"], newer["version"]);

    let (_, answers) = app.get(&format!("{}/answers", base), &token).await;
    assert_eq!(answers[0]["selected_answer"], 42.0);
    assert_eq!(answers[0]["client_seq"], 5);
}

#[tokio::test]
async fn test_answer_shape_is_validated() {
    let app = create_test_app().await;
    let token = token_for("alice");
    let session_id = app.start_session(&token).await;
    let base = format!("/api/v1/sessions/{}", session_id);

    let (status, body) = app
        .post(
            &format!("{}/answer", base),
            &token,
            json!({ "question_id": "q3", "selected_answer": "a", "client_seq": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    assert_eq!(body["question_id"], "q3");

    let (status, body) = app
        .post(
            &format!("{}/answer", base),
            &token,
            json!({ "question_id": "q9", "selected_answer": "a", "client_seq": 2 }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, _) = app
        .post(
            &format!("{}/answer", base),
            &token,
            json!({ "question_id": "q1", "selected_answer": "a", "client_seq": 0 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, answers) = app.get(&format!("{}/answers", base), &token).await;
    assert!(answers.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_answers_require_a_running_session() {
    let app = create_test_app().await;
    let token = token_for("alice");
    let session_id = app.create_session(&token).await;
    let base = format!("/api/v1/sessions/{}", session_id);
    let answer = json!({ "question_id": "q1", "selected_answer": "b", "client_seq": 1 });

    let (status, body) = app.post(&format!("{}/answer", base), &token, answer.clone()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");

    app.post_empty(&format!("{}/start", base), &token).await;
    app.post_empty(&format!("{}/pause", base), &token).await;
    let (status, _) = app.post(&format!("{}/answer", base), &token, answer).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_flag_and_skip_are_independent_of_the_answer() {
    let app = create_test_app().await;
    let token = token_for("alice");
    let session_id = app.start_session(&token).await;
    let base = format!("/api/v1/sessions/{}", session_id);

    app.post(
        &format!("{}/answer", base),
        &token,
        json!({ "question_id": "q1", "selected_answer": "b", "client_seq": 2 }),
    )
    .await;

    let (status, ack) = app
        .post(&format!("{}/flag/q1", base), &token, json!({ "client_seq": 1 }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["effect"], "applied");

    let (status, _) = app
        .post(&format!("{}/skip/q2", base), &token, json!({ "client_seq": 3 }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, answers) = app.get(&format!("{}/answers", base), &token).await;
    let answers = answers.as_array().unwrap();
    assert_eq!(answers.len(), 2);
    let q1 = answers.iter().find(|a| a["question_id"] == "q1").unwrap();
    assert_eq!(q1["flagged"], true);
    assert_eq!(q1["selected_answer"], "b");
    let q2 = answers.iter().find(|a| a["question_id"] == "q2").unwrap();
    assert_eq!(q2["skipped"], true);

    let (_, snapshot) = app.get(&base, &token).await;
    assert_eq!(snapshot["flagged_count"], 1);
    assert_eq!(snapshot["answered_count"], 1);

    let (status, ack) = app
        .post(
            &format!("{}/flag/q1", base),
            &token,
            json!({ "flagged": false, "client_seq": 4 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["effect"], "applied");
    let (_, snapshot) = app.get(&base, &token).await;
    assert_eq!(snapshot["flagged_count"], 0);
}

#[tokio::test]
async fn test_plain_answer_after_flag_keeps_the_flag() {
    let app = create_test_app().await;
    let token = token_for("alice");
    let session_id = app.start_session(&token).await;
    let base = format!("/api/v1/sessions/{}", session_id);

    let (status, _) = app
        .post(&format!("{}/flag/q2", base), &token, json!({ "client_seq": 1 }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, ack) = app
        .post(
            &format!("{}/answer", base),
            &token,
            json!({ "question_id": "q2", "selected_answer": 42, "client_seq": 2 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["effect"], "applied");

    let (_, answers) = app.get(&format!("{}/answers", base), &token).await;
    let q2 = answers
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["question_id"] == "q2")
        .unwrap()
        .clone();
    assert_eq!(q2["flagged"], true);
    assert_eq!(q2["selected_answer"], 42.0);

    let (_, snapshot) = app.get(&base, &token).await;
    assert_eq!(snapshot["flagged_count"], 1);
}

#[tokio::test]
async fn test_navigation_moves_the_current_question() {
    let app = create_test_app().await;
    let token = token_for("alice");
    let session_id = app.start_session(&token).await;
    let base = format!("/api/v1/sessions/{}", session_id);

    let (status, _) = app
        .post(
            &format!("{}/navigate", base),
            &token,
            json!({ "question_index": 2, "client_seq": 4 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, ack) = app
        .post(
            &format!("{}/navigate", base),
            &token,
            json!({ "question_index": 1, "client_seq": 2 }),
        )
        .await;
    assert_eq!(ack["effect"], "duplicate");

    let (status, _) = app
        .post(
            &format!("{}/navigate", base),
            &token,
            json!({ "question_index": 3, "client_seq": 5 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, snapshot) = app.get(&base, &token).await;
    assert_eq!(snapshot["current_question_index"], 2);
}

#[tokio::test]
async fn test_final_submission_completes_the_session() {
    let app = create_test_app().await;
    let token = token_for("alice");
    let session_id = app.start_session(&token).await;
    let base = format!("/api/v1/sessions/{}", session_id);

    app.post(
        &format!("{}/answer", base),
        &token,
        json!({ "question_id": "q1", "selected_answer": "b", "client_seq": 1 }),
    )
    .await;

    // Not every question is answered yet, so the session keeps running
    let (_, ack) = app
        .post(
            &format!("{}/answer", base),
            &token,
            json!({ "question_id": "q2", "selected_answer": 42, "client_seq": 2, "final_submission": true }),
        )
        .await;
    assert_eq!(ack["session_status"], "in_progress");

    let (status, ack) = app
        .post(
            &format!("{}/answer", base),
            &token,
            json!({ "question_id": "q3", "selected_answer": ["c", "a"], "client_seq": 3, "final_submission": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["session_status"], "completed");

    let (_, snapshot) = app.get(&base, &token).await;
    assert_eq!(snapshot["score"]["correct_count"], 3);
    assert_eq!(snapshot["score"]["score"], 100.0);
}
