use std::net::TcpListener;
use std::sync::Arc;

use anyhow::Context;

use sqlx::PgPool;

use listgate::app;
use listgate::client::{EmailClient, GoogleDirectoryClient};
use listgate::crypto::SigningKey;
use listgate::repo::PgSignupStore;
use listgate::settings::Settings;
use listgate::telemetry;
use listgate::workflow::WorkflowEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = telemetry::create_subscriber("info", std::io::stdout);
    telemetry::set_subscriber(subscriber)?;

    let settings = Settings::load().context("Failed to load settings")?;

    let pool = PgPool::connect_with(settings.database.with_db())
        .await
        .context("Failed to connect to database")?;
    sqlx::migrate!()
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    let signing_key = SigningKey::new(settings.app.secret_key())?;
    let whitelist = settings.directory.whitelist();
    anyhow::ensure!(!whitelist.is_empty(), "Group whitelist is empty");

    let email_client = EmailClient::new(
        settings.email.sender(),
        settings.signup.ttl_hours(),
        settings.email.api_timeout(),
        settings.email.api_base_url(),
        settings.email.api_auth_token().into(),
    )?;

    let directory_client = GoogleDirectoryClient::new(
        settings.directory.api_timeout(),
        settings.directory.api_base_url(),
        settings.directory.api_auth_token(),
    )?;
    directory_client
        .preflight(&whitelist)
        .await
        .context("Whitelisted groups are not accessible")?;

    let engine = WorkflowEngine::new(
        Arc::new(PgSignupStore::new(pool)),
        Arc::new(directory_client),
        Arc::new(email_client),
        signing_key,
        whitelist,
        settings.signup.ttl(),
        settings.app.public_url(),
    );

    let listener = TcpListener::bind(settings.app.addr())?;

    app::run(listener, Arc::new(engine), settings.signup.maintenance_interval())?
        .await
        .context("Failed to run app")
}
