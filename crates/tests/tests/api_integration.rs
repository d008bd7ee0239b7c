use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use relay_api::{build_app, build_router, compute_signature, ApiState, SIGNATURE_HEADER};
use relay_core::{
    help_text, CardAction, DialogueScript, LookupRecord, OutboundMessage, RelayConfig,
};
use relay_dispatcher::testing::{RecordingGateway, ScriptedAssistant, StaticRecordStore};
use relay_dispatcher::{Collaborators, DispatchSettings, Dispatcher};
use relay_observability::AppMetrics;
use relay_storage::{SessionSettings, SessionStore, Store};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "integration-secret";

struct TestApp {
    router: Router,
    gateway: Arc<RecordingGateway>,
    assistant: Arc<ScriptedAssistant>,
}

fn test_app(assistant: ScriptedAssistant, records: StaticRecordStore) -> TestApp {
    test_app_with(assistant, records, DispatchSettings::default())
}

fn test_app_with(
    assistant: ScriptedAssistant,
    records: StaticRecordStore,
    settings: DispatchSettings,
) -> TestApp {
    let gateway = Arc::new(RecordingGateway::new());
    let assistant = Arc::new(assistant);
    let dispatcher = Dispatcher::new(
        Arc::new(DialogueScript::builtin()),
        SessionStore::new(Arc::new(Store::memory()), SessionSettings::default()),
        Collaborators {
            gateway: gateway.clone(),
            assistant: assistant.clone(),
            records: Arc::new(records),
        },
        AppMetrics::shared(),
        settings,
    );
    TestApp {
        router: build_router(ApiState::new(dispatcher, SECRET)),
        gateway,
        assistant,
    }
}

fn default_app() -> TestApp {
    test_app(
        ScriptedAssistant::answering("I'm listening."),
        StaticRecordStore::new(),
    )
}

fn message_event(event_id: &str, user_id: &str, text: &str) -> Value {
    json!({
        "type": "message",
        "mode": "active",
        "timestamp": 1_700_000_000_000_u64,
        "webhookEventId": event_id,
        "replyToken": format!("token-{event_id}"),
        "source": { "type": "user", "userId": user_id },
        "message": { "id": event_id, "type": "text", "text": text },
        "deliveryContext": { "isRedelivery": false }
    })
}

fn signed_webhook(events: Vec<Value>) -> Request<Body> {
    let body = json!({ "destination": "Ubot", "events": events }).to_string();
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .header(
            SIGNATURE_HEADER,
            compute_signature(SECRET, body.as_bytes()).unwrap(),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn say(app: &TestApp, user_id: &str, text: &str) {
    let event_id = Uuid::new_v4().to_string();
    let response = app
        .router
        .clone()
        .oneshot(signed_webhook(vec![message_event(&event_id, user_id, text)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

fn text_of(message: &OutboundMessage) -> String {
    match message {
        OutboundMessage::PlainText(text) => text.clone(),
        OutboundMessage::Card(card) => card.title.clone(),
    }
}

#[tokio::test]
async fn app_builds_from_configuration() {
    let env: HashMap<&str, &str> = HashMap::from([
        ("RELAY_LINE_ACCESS_TOKEN", "token"),
        ("RELAY_LINE_CHANNEL_SECRET", SECRET),
        ("RELAY_OPENAI_API_KEY", "sk-test"),
        ("RELAY_RECORD_STORE_URL", "https://records.invalid/exec"),
    ]);
    let config =
        RelayConfig::from_lookup(|key| env.get(key).map(|value| value.to_string())).unwrap();
    let app = build_app(&config).await.expect("app should build");

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "ok");
}

#[tokio::test]
async fn bad_signature_is_rejected_before_dispatch() {
    let app = default_app();
    let body = json!({ "events": [message_event("e1", "U1", "talk")] }).to_string();
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header(SIGNATURE_HEADER, "bm90LWEtc2lnbmF0dXJl")
        .body(Body::from(body))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.gateway.replies().is_empty());
}

#[tokio::test]
async fn webhook_acknowledges_with_success_status() {
    let app = default_app();
    let response = app
        .router
        .clone()
        .oneshot(signed_webhook(vec![message_event("e1", "U1", "hello")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let ack: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(ack, json!({ "status": "success" }));
}

#[tokio::test]
async fn survey_trigger_sends_both_form_links() {
    let app = default_app();
    say(&app, "U1", "survey").await;

    let replies = app.gateway.replies();
    assert_eq!(replies.len(), 1);
    match &replies[0].1 {
        OutboundMessage::Card(card) => {
            let urls: Vec<&str> = card
                .buttons
                .iter()
                .filter_map(|button| match &button.action {
                    CardAction::Uri(url) => Some(url.as_str()),
                    CardAction::Message(_) => None,
                })
                .collect();
            assert_eq!(urls.len(), 2);
            assert!(urls.iter().all(|url| url.starts_with("https://")));
        }
        other => panic!("expected form card, got {other:?}"),
    }
}

#[tokio::test]
async fn talk_flow_walks_prompts_closes_and_restarts() {
    let app = default_app();
    let script = DialogueScript::builtin();
    let talk = &script.topics["talk"];

    say(&app, "U1", "talk").await;
    for answer in 0..talk.prompts.len() {
        say(&app, "U1", &format!("answer {answer}")).await;
    }

    let replies = app.gateway.replies();
    assert_eq!(replies.len(), talk.prompts.len() + 1);
    for (index, prompt) in talk.prompts.iter().enumerate() {
        assert_eq!(text_of(&replies[index].1), prompt.text);
    }
    assert_eq!(
        text_of(&replies[talk.prompts.len()].1),
        talk.closing
    );

    say(&app, "U1", "talk").await;
    assert_eq!(
        text_of(&app.gateway.last_reply().unwrap()),
        talk.prompts[0].text
    );
    assert!(app.assistant.calls().is_empty());
}

#[tokio::test]
async fn lookup_reports_grouped_scores() {
    let records = vec![
        LookupRecord {
            category: "Depression".to_string(),
            score: Some(12.0),
            recorded_at: Some("2024-05-02".to_string()),
            fields: BTreeMap::new(),
        },
        LookupRecord {
            category: "stress".to_string(),
            score: Some(7.5),
            recorded_at: None,
            fields: BTreeMap::new(),
        },
    ];
    let app = test_app(
        ScriptedAssistant::failing(),
        StaticRecordStore::new().with_records("Alice", records),
    );

    say(&app, "U1", "show info of Alice").await;

    let report = text_of(&app.gateway.last_reply().unwrap());
    assert!(report.contains("Alice"));
    assert!(report.contains("== depression =="));
    assert!(report.contains("score: 12"));
    assert!(report.contains("== stress =="));
    assert!(report.contains("score: 7.50"));
}

#[tokio::test]
async fn lookup_for_unknown_name_says_so() {
    let app = default_app();
    say(&app, "U1", "Show info of Nobody").await;
    assert_eq!(
        text_of(&app.gateway.last_reply().unwrap()),
        relay_core::not_found_text("Nobody")
    );
}

#[tokio::test]
async fn redelivered_event_is_handled_once() {
    let app = default_app();
    say(&app, "U1", "talk").await;

    for _ in 0..2 {
        let mut event = message_event("evt-answer", "U1", "my answer");
        event["deliveryContext"]["isRedelivery"] = json!(true);
        let response = app
            .router
            .clone()
            .oneshot(signed_webhook(vec![event]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let script = DialogueScript::builtin();
    let replies = app.gateway.replies();
    assert_eq!(replies.len(), 2);
    assert_eq!(text_of(&replies[1].1), script.topics["talk"].prompts[1].text);
}

#[tokio::test]
async fn unroutable_events_are_acknowledged_silently() {
    let app = default_app();
    let mut standby = message_event("e1", "U1", "talk");
    standby["mode"] = json!("standby");
    let mut sticker = message_event("e2", "U1", "");
    sticker["message"] = json!({ "id": "e2", "type": "sticker", "packageId": "1" });
    let follow = json!({
        "type": "follow",
        "mode": "active",
        "replyToken": "token-follow",
        "source": { "type": "user", "userId": "U1" }
    });

    let response = app
        .router
        .clone()
        .oneshot(signed_webhook(vec![standby, sticker, follow]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.gateway.replies().is_empty());
    assert!(app.assistant.calls().is_empty());
}

#[tokio::test]
async fn assistant_outage_replies_with_help() {
    let app = test_app(ScriptedAssistant::failing(), StaticRecordStore::new());
    say(&app, "U1", "what should I do today?").await;

    let expected = help_text(&DialogueScript::builtin().trigger_phrases());
    assert_eq!(
        app.gateway.last_reply(),
        Some(OutboundMessage::PlainText(expected))
    );
}

#[tokio::test]
async fn risky_message_alerts_the_admin() {
    let app = test_app_with(
        ScriptedAssistant::answering("You're not alone."),
        StaticRecordStore::new(),
        DispatchSettings {
            admin_user_id: Some("Uadmin".to_string()),
            ..DispatchSettings::default()
        },
    );
    say(&app, "U7", "sometimes I want to die").await;

    let pushes = app.gateway.pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].0, "Uadmin");
    assert!(text_of(&pushes[0].1).contains("U7"));
    assert_eq!(app.gateway.replies().len(), 1);
}

#[tokio::test]
async fn users_in_one_batch_keep_separate_dialogues() {
    let app = default_app();
    let response = app
        .router
        .clone()
        .oneshot(signed_webhook(vec![
            message_event("a1", "UA", "talk"),
            message_event("b1", "UB", "relax"),
            message_event("a2", "UA", "fine"),
        ]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let script = DialogueScript::builtin();
    let replies = app.gateway.replies();
    assert_eq!(replies.len(), 3);

    let for_handle = |token: &str| {
        replies
            .iter()
            .find(|(handle, _)| handle == token)
            .map(|(_, message)| text_of(message))
    };
    assert_eq!(
        for_handle("token-a2"),
        Some(script.topics["talk"].prompts[1].text.clone())
    );
    assert_eq!(
        for_handle("token-b1"),
        Some(script.topics["relax"].prompts[0].text.clone())
    );
}
