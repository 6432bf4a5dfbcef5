use assert_matches::assert_matches;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, header_regex, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_utils::test_utils::TestConfig;
use video_session_cell::models::{
    NewSessionParticipant, NewVideoSession, ParticipantIdentity, ParticipantType, StatusPatch,
    VideoSessionError, VideoSessionStatus,
};
use video_session_cell::services::{SessionKey, SupabaseVideoSessionStore, VideoSessionStore};

fn session_row(id: Uuid, status: &str) -> Value {
    json!({
        "id": id,
        "session_id": "sess-1",
        "room_name": "session-sess-1",
        "room_sid": null,
        "status": status,
        "started_at": null,
        "ended_at": null,
        "participant_count": 0,
        "max_participants": 2,
        "recording_sid": null,
        "recording_url": null,
        "created_at": "2024-05-01T10:00:00Z",
        "updated_at": "2024-05-01T10:00:00Z"
    })
}

fn participant_row(video_session_id: Uuid, joined: bool) -> Value {
    let joined_at = if joined { json!("2024-05-01T10:00:00Z") } else { Value::Null };
    json!({
        "id": Uuid::new_v4(),
        "video_session_id": video_session_id,
        "user_id": "c1",
        "user_type": "client",
        "identity": "client-c1",
        "joined_at": joined_at,
        "left_at": null,
        "connection_duration_seconds": null,
        "access_token_issued_at": null,
        "access_token_expires_at": null,
        "created_at": "2024-05-01T09:59:00Z"
    })
}

fn store_for(server: &MockServer) -> SupabaseVideoSessionStore {
    let config = TestConfig::default().with_supabase_url(server.uri()).to_app_config();
    SupabaseVideoSessionStore::for_user(&config, "user-token")
}

#[tokio::test]
async fn find_session_filters_by_key_and_forwards_token() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path("/rest/v1/video_sessions"))
        .and(query_param("room_name", "eq.session-sess-1"))
        .and(header("Authorization", "Bearer user-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([session_row(id, "active")])))
        .mount(&server)
        .await;

    let session = store_for(&server)
        .find_session(SessionKey::RoomName("session-sess-1"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(session.id, id);
    assert_eq!(session.status, VideoSessionStatus::Active);
}

#[tokio::test]
async fn insert_if_absent_reads_back_existing_row() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rest/v1/video_sessions"))
        .and(query_param("on_conflict", "session_id"))
        .and(header_regex("Prefer", "resolution=ignore-duplicates"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/video_sessions"))
        .and(query_param("session_id", "eq.sess-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([session_row(id, "scheduled")])))
        .expect(1)
        .mount(&server)
        .await;

    let session = store_for(&server)
        .insert_session_if_absent(&NewVideoSession::for_session("sess-1"))
        .await
        .unwrap();

    assert_eq!(session.id, id);
}

#[tokio::test]
async fn compare_and_set_filters_on_expected_status() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/video_sessions"))
        .and(query_param("session_id", "eq.sess-1"))
        .and(query_param("status", "eq.active"))
        .and(body_partial_json(json!({ "status": "completed" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let patch = StatusPatch {
        status: VideoSessionStatus::Completed,
        started_at: None,
        ended_at: Some(Utc::now()),
    };
    let written = store_for(&server)
        .compare_and_set_status(SessionKey::SessionId("sess-1"), VideoSessionStatus::Active, &patch)
        .await
        .unwrap();

    assert!(!written);
}

#[tokio::test]
async fn decrement_uses_clamped_counter_rpc() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/decrement_participant_count"))
        .and(body_partial_json(json!({ "p_video_session_id": id })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(0)))
        .mount(&server)
        .await;

    assert_eq!(store_for(&server).decrement_participant_count(id).await.unwrap(), 0);
}

#[tokio::test]
async fn filter_values_are_percent_encoded() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path("/rest/v1/video_sessions"))
        .and(query_param("session_id", "eq.sess-1#x"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([session_row(id, "active")])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/video_sessions"))
        .and(query_param("session_id", "eq.a&status=eq.active"))
        .and(query_param("status", "eq.scheduled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/video_session_participants"))
        .and(query_param("user_id", "eq.c1&user_id=eq.c2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);

    let session = store
        .find_session(SessionKey::SessionId("sess-1#x"))
        .await
        .unwrap();
    assert!(session.is_some());

    let patch = StatusPatch {
        status: VideoSessionStatus::Active,
        started_at: Some(Utc::now()),
        ended_at: None,
    };
    let written = store
        .compare_and_set_status(
            SessionKey::SessionId("a&status=eq.active"),
            VideoSessionStatus::Scheduled,
            &patch,
        )
        .await
        .unwrap();
    assert!(!written);

    let participant = store.find_participant(id, "c1&user_id=eq.c2").await.unwrap();
    assert!(participant.is_none());
}

#[tokio::test]
async fn duplicate_participant_is_reported_as_duplicate_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/video_session_participants"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_string(r#"{"code":"23505","message":"duplicate key value"}"#),
        )
        .mount(&server)
        .await;

    let participant = NewSessionParticipant {
        video_session_id: Uuid::new_v4(),
        user_id: "c1".to_string(),
        user_type: ParticipantType::Client,
        identity: "client-c1".to_string(),
        access_token_issued_at: Utc::now(),
        access_token_expires_at: Utc::now(),
    };

    assert_matches!(
        store_for(&server).insert_participant(&participant).await,
        Err(VideoSessionError::DuplicateRecord { .. })
    );
}

#[tokio::test]
async fn connect_goes_through_single_rpc() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/connect_participant"))
        .and(body_partial_json(json!({
            "p_video_session_id": id,
            "p_user_id": "c1",
            "p_user_type": "client",
            "p_identity": "client-c1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(1)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/connect_participant"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Null))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let identity = ParticipantIdentity::new(ParticipantType::Client, "c1");

    assert_eq!(store.connect_participant(id, &identity, Utc::now()).await.unwrap(), Some(1));
    assert_eq!(store.connect_participant(id, &identity, Utc::now()).await.unwrap(), None);
}

#[tokio::test]
async fn refreshed_credential_patches_token_columns() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/video_session_participants"))
        .and(query_param("video_session_id", format!("eq.{}", id)))
        .and(query_param("user_id", "eq.c1"))
        .and(body_partial_json(json!({ "access_token_expires_at": "2024-05-01T11:00:00Z" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let participant = NewSessionParticipant {
        video_session_id: id,
        user_id: "c1".to_string(),
        user_type: ParticipantType::Client,
        identity: "client-c1".to_string(),
        access_token_issued_at: "2024-05-01T10:00:00Z".parse().unwrap(),
        access_token_expires_at: "2024-05-01T11:00:00Z".parse().unwrap(),
    };

    store_for(&server)
        .refresh_participant_credential(&participant)
        .await
        .unwrap();
}

#[tokio::test]
async fn leaving_without_open_connection_writes_nothing() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path("/rest/v1/video_session_participants"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([participant_row(id, false)])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/video_session_participants"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let left = store_for(&server)
        .mark_participant_left(id, "c1", Utc::now())
        .await
        .unwrap();

    assert!(left.is_none());
}

#[tokio::test]
async fn server_errors_are_persistence_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/video_sessions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;

    assert_matches!(
        store_for(&server).find_session(SessionKey::SessionId("sess-1")).await,
        Err(VideoSessionError::PersistenceFailure { .. })
    );
}
