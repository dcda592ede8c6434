use reqwest::StatusCode;

use wiremock::matchers::{any, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use listgate::domain::{SignupId, SignupState};
use listgate::repo::SignupStore;

use crate::helpers::{TestApp, WHITELISTED_GROUP};

async fn mount_email_ok(server: &MockServer, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/email"))
        .respond_with(ResponseTemplate::new(200))
        .expect(expected)
        .mount(server)
        .await;
}

fn signup_id(email: &str, group: &str) -> SignupId {
    SignupId::derive(&email.parse().unwrap(), &group.parse().unwrap())
}

#[tokio::test]
async fn signup_sends_confirmation_email_with_link_to_this_host() {
    let app = TestApp::spawn().await;
    mount_email_ok(&app.email_server, 1).await;

    let res = app.post_signup("alice@example.com", WHITELISTED_GROUP).await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let link = app.confirmation_link().await;
    assert_eq!(link.host_str(), Some("127.0.0.1"));
    assert!(link.path().starts_with("/signups/confirm/"));

    let record = app
        .store
        .get(&signup_id("alice@example.com", WHITELISTED_GROUP))
        .await
        .unwrap()
        .expect("No signup record was created");
    assert_eq!(record.state, SignupState::Pending);
}

#[tokio::test]
async fn signup_for_unknown_group_is_rejected_without_email() {
    let app = TestApp::spawn().await;
    // Any call to the transport would be a bug
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&app.email_server)
        .await;

    let res = app.post_signup("alice@example.com", "secret-list").await;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let record = app
        .store
        .get(&signup_id("alice@example.com", "secret-list"))
        .await
        .unwrap();
    assert!(record.is_none());
}

#[tokio::test]
async fn invalid_email_is_rejected() {
    let app = TestApp::spawn().await;

    let res = app.post_signup("not-an-email", WHITELISTED_GROUP).await;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_signup_reuses_record_and_sends_one_email() {
    let app = TestApp::spawn().await;
    mount_email_ok(&app.email_server, 1).await;

    let first = app.post_signup("alice@example.com", WHITELISTED_GROUP).await;
    let second = app.post_signup("alice@example.com", WHITELISTED_GROUP).await;

    // Responses are indistinguishable
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    assert_eq!(second.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn clicking_the_link_adds_the_member() {
    let app = TestApp::spawn().await;
    mount_email_ok(&app.email_server, 1).await;
    Mock::given(method("POST"))
        .and(path(format!("/groups/{}/members", WHITELISTED_GROUP)))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.directory_server)
        .await;

    app.post_signup("alice@example.com", WHITELISTED_GROUP).await;
    let link = app.confirmation_link().await;

    let res = app.get_url(&link).await;
    assert_eq!(res.status(), StatusCode::OK);

    let record = app
        .store
        .get(&signup_id("alice@example.com", WHITELISTED_GROUP))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.state, SignupState::Applied);
}

#[tokio::test]
async fn confirming_twice_conflicts_without_second_directory_call() {
    let app = TestApp::spawn().await;
    mount_email_ok(&app.email_server, 1).await;
    Mock::given(method("POST"))
        .and(path(format!("/groups/{}/members", WHITELISTED_GROUP)))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.directory_server)
        .await;

    app.post_signup("alice@example.com", WHITELISTED_GROUP).await;
    let link = app.confirmation_link().await;

    assert_eq!(app.get_url(&link).await.status(), StatusCode::OK);
    assert_eq!(app.get_url(&link).await.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn directory_outage_leaves_the_link_usable() {
    let app = TestApp::spawn().await;
    mount_email_ok(&app.email_server, 1).await;
    // First membership call fails transiently, the retry lands
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&app.directory_server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.directory_server)
        .await;

    app.post_signup("alice@example.com", WHITELISTED_GROUP).await;
    let link = app.confirmation_link().await;

    assert_eq!(
        app.get_url(&link).await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(app.get_url(&link).await.status(), StatusCode::OK);

    let record = app
        .store
        .get(&signup_id("alice@example.com", WHITELISTED_GROUP))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.state, SignupState::Applied);
}

#[tokio::test]
async fn garbage_token_is_unauthorized() {
    let app = TestApp::spawn().await;

    let res = app.confirm_path("not-a-real-token").await;

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn email_transport_failure_surfaces_but_record_remains() {
    let app = TestApp::spawn().await;
    Mock::given(method("POST"))
        .and(path("/email"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&app.email_server)
        .await;

    let res = app.post_signup("alice@example.com", WHITELISTED_GROUP).await;
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

    // Record survives so a resend can follow
    let record = app
        .store
        .get(&signup_id("alice@example.com", WHITELISTED_GROUP))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.state, SignupState::Pending);
}
