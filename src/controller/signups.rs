use actix_web::dev::HttpServiceFactory;
use actix_web::http::StatusCode;
use actix_web::{get, post, web, HttpResponse, Responder, ResponseError};

use serde::{Deserialize, Serialize};

use thiserror::Error;

use crate::crypto::TokenError;
use crate::domain::{EmailAddress, GroupId};
use crate::workflow::{SignupError, WorkflowEngine};

/// JSON body for a new signup request
#[derive(Debug, Deserialize)]
pub struct NewSignupRequest {
    email: String,
    group: String,
    /// Force a fresh confirmation email for an already-pending signup
    #[serde(default)]
    resend: bool,
}

#[derive(Debug, Serialize)]
struct SignupResponse {
    message: String,
}

/// Create endpoint for new signup requests.
///
/// The success response reads the same whether the signup was just created or
/// was already pending, so it reveals nothing about existing membership.
#[tracing::instrument(name = "Create a signup request", skip(engine, body))]
#[post("")]
async fn create(
    engine: web::Data<WorkflowEngine>,
    body: web::Json<NewSignupRequest>,
) -> Result<impl Responder, RestError> {
    let body = body.into_inner();
    let email: EmailAddress = body.email.parse().map_err(RestError::Parse)?;
    let group: GroupId = body.group.parse().map_err(RestError::Parse)?;

    engine
        .request_subscription(email.clone(), group, body.resend)
        .await?;

    Ok(HttpResponse::Accepted().json(SignupResponse {
        message: format!("Confirmation email sent to '{}'", email),
    }))
}

/// Confirmation endpoint, reached by clicking the emailed link
#[tracing::instrument(name = "Confirm a signup by token", skip_all)]
#[get("/confirm/{token}", name = "confirm_signup")]
async fn confirm(
    engine: web::Data<WorkflowEngine>,
    path: web::Path<(String,)>,
) -> Result<impl Responder, RestError> {
    let (token,) = path.into_inner();

    engine.confirm_subscription(&token).await?;

    Ok(HttpResponse::Ok().json(SignupResponse {
        message: "Subscription confirmed".to_string(),
    }))
}

#[derive(Debug, Error)]
pub enum RestError {
    #[error("Failed to parse request: {0}")]
    Parse(String),

    #[error(transparent)]
    Signup(#[from] SignupError),
}

impl ResponseError for RestError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Parse(_) => StatusCode::BAD_REQUEST,
            Self::Signup(err) => match err {
                SignupError::NotWhitelisted => StatusCode::BAD_REQUEST,
                SignupError::Token(TokenError::Expired) => StatusCode::GONE,
                SignupError::Token(_) => StatusCode::UNAUTHORIZED,
                SignupError::NotFound => StatusCode::NOT_FOUND,
                SignupError::AlreadyExpired => StatusCode::GONE,
                SignupError::AlreadyTerminal => StatusCode::CONFLICT,
                SignupError::RetryableExternalFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
                SignupError::PermanentExternalFailure(_) | SignupError::Notifier(_) => {
                    StatusCode::BAD_GATEWAY
                }
                SignupError::IssueToken(_) | SignupError::Store(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

/// Signup API endpoints
pub fn scope() -> impl HttpServiceFactory {
    web::scope("/signups").service(create).service(confirm)
}
