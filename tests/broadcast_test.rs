//! Templates and owner broadcasts.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::TestApp;
use kyozo::auth::Realm;

#[tokio::test]
async fn broadcast_renders_names_and_counts_outcomes() {
    let app = TestApp::new().await;
    let owner = app.seed_user("owner@example.com");
    let ana = app.seed_user("ana@example.com");
    let demo = app.seed_community(&owner, "kyozo-demo");
    app.add_member(&ana, &demo.id);
    let token = app.token_for(&owner, Realm::Main);

    let (status, template) = app
        .post_json(
            "/api/broadcast-templates",
            Some(&token),
            json!({ "name": "Welcome", "subject": "Hi {{name}}", "message": "Glad you're here, {{name}}." }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, report) = app
        .post_json(
            "/api/communities/kyozo-demo/broadcast",
            Some(&token),
            json!({ "channel": "email", "templateId": template["id"], "memberIds": [ana] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report, json!({ "sent": 1, "failed": 0, "skipped": 0 }));

    let sent = app.email.sent.lock().unwrap();
    assert_eq!(sent[0].subject.as_deref(), Some("Hi ana"));
    assert_eq!(sent[0].text.as_deref(), Some("Glad you're here, ana."));
}

#[tokio::test]
async fn whatsapp_broadcast_skips_members_without_phone() {
    let app = TestApp::new().await;
    let owner = app.seed_user("owner@example.com");
    let demo = app.seed_community(&owner, "kyozo-demo");
    app.add_member(&app.seed_user("nophone@example.com"), &demo.id);
    let token = app.token_for(&owner, Realm::Main);

    let (status, report) = app
        .post_json(
            "/api/communities/kyozo-demo/broadcast",
            Some(&token),
            json!({ "channel": "whatsapp", "message": "Meetup tonight" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["sent"], 0);
    assert_eq!(report["skipped"], 2);
}

#[tokio::test]
async fn members_cannot_broadcast() {
    let app = TestApp::new().await;
    let owner = app.seed_user("owner@example.com");
    let member = app.seed_user("member@example.com");
    let demo = app.seed_community(&owner, "kyozo-demo");
    app.add_member(&member, &demo.id);
    let token = app.token_for(&member, Realm::Community);

    let (status, _) = app
        .post_json(
            "/api/communities/kyozo-demo/broadcast",
            Some(&token),
            json!({ "channel": "email", "subject": "Hey", "message": "Spam" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(app.email.count(), 0);
}
