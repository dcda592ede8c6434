use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use reqwest::{Client, Response};

use secrecy::Secret;

use serde_json::json;

use url::Url;

use wiremock::MockServer;

use listgate::app;
use listgate::client::{EmailClient, GoogleDirectoryClient};
use listgate::crypto::SigningKey;
use listgate::domain::Whitelist;
use listgate::repo::InMemorySignupStore;
use listgate::workflow::WorkflowEngine;

pub const WHITELISTED_GROUP: &str = "eng-list";

pub struct TestApp {
    addr: String,

    pub client: Client,
    pub email_server: MockServer,
    pub directory_server: MockServer,
    pub store: Arc<InMemorySignupStore>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        use rand::{distributions::Alphanumeric, Rng};

        let email_server = MockServer::start().await;
        let directory_server = MockServer::start().await;

        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to listen on random port");
        let port = listener.local_addr().unwrap().port();
        let addr = format!("http://127.0.0.1:{}", port);

        let secret: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let signing_key = SigningKey::new(&Secret::new(secret)).unwrap();

        let email_client = EmailClient::new(
            "no-reply@example.com".parse().unwrap(),
            1,
            Duration::from_secs(2),
            Url::parse(&email_server.uri()).unwrap(),
            Secret::new("test-email-token".to_string()).into(),
        )
        .unwrap();

        let directory_client = GoogleDirectoryClient::new(
            Duration::from_secs(2),
            Url::parse(&format!("{}/", directory_server.uri())).unwrap(),
            Secret::new("test-directory-token".to_string()),
        )
        .unwrap();

        let store = Arc::new(InMemorySignupStore::new());

        let engine = WorkflowEngine::new(
            store.clone(),
            Arc::new(directory_client),
            Arc::new(email_client),
            signing_key,
            Whitelist::new([WHITELISTED_GROUP.parse().unwrap()]),
            ChronoDuration::hours(1),
            Url::parse(&format!("{}/", addr)).unwrap(),
        );

        let server = app::run(listener, Arc::new(engine), Duration::from_secs(60))
            .expect("Failed to start test app");
        tokio::spawn(server);

        Self {
            addr,
            client: Client::new(),
            email_server,
            directory_server,
            store,
        }
    }

    pub async fn health_check(&self) -> reqwest::Result<Response> {
        self.client
            .get(format!("{}/health_check", self.addr))
            .send()
            .await
    }

    pub async fn post_signup(&self, email: &str, group: &str) -> Response {
        self.client
            .post(format!("{}/signups", self.addr))
            .json(&json!({ "email": email, "group": group }))
            .send()
            .await
            .expect("Failed to execute signup request")
    }

    pub async fn get_url(&self, url: &Url) -> Response {
        self.client
            .get(url.clone())
            .send()
            .await
            .expect("Failed to execute confirmation request")
    }

    pub async fn confirm_path(&self, token: &str) -> Response {
        self.client
            .get(format!("{}/signups/confirm/{}", self.addr, token))
            .send()
            .await
            .expect("Failed to execute confirmation request")
    }

    /// Extract the confirmation link from the last email the mock transport
    /// accepted
    pub async fn confirmation_link(&self) -> Url {
        let request = self
            .email_server
            .received_requests()
            .await
            .unwrap()
            .pop()
            .expect("No email was sent");

        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        let text = body["TextBody"].as_str().unwrap();

        let links: Vec<_> = linkify::LinkFinder::new()
            .links(text)
            .filter(|link| *link.kind() == linkify::LinkKind::Url)
            .collect();
        assert_eq!(links.len(), 1);

        Url::parse(links[0].as_str()).unwrap()
    }
}
