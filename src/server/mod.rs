//! The user-facing JSON web server. Requests are decoded and classified on
//! the blocking thread pool; the predictor is injected as shared app data.

use crate::config::Settings;
use crate::predictor::Predictor;
use actix_cors::Cors;
use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{middleware, web, App, HttpRequest, HttpResponse, HttpServer, ResponseError};
use protocol::ErrorResponse;
use tracing::info;

pub mod protocol;
pub mod routes;

/// Message returned when the request has no `image` key
pub const NO_IMAGE: &str = "No image provided";

/// Header naming the path that produced a prediction (`model` or `heuristic`)
pub const SOURCE_HEADER: &str = "x-prediction-source";

/// Shared request state
#[derive(Debug, Clone)]
pub struct AppState {
    pub predictor: Predictor,
}

#[derive(Debug)]
pub struct WebError {
    status: StatusCode,
    err: anyhow::Error,
}

impl WebError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        WebError {
            status: StatusCode::BAD_REQUEST,
            err: anyhow::anyhow!(msg),
        }
    }
}

impl std::fmt::Display for WebError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.err)
    }
}

impl ResponseError for WebError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .json(ErrorResponse {
                error: self.to_string(),
            })
    }

    fn status_code(&self) -> StatusCode {
        self.status
    }
}

impl From<anyhow::Error> for WebError {
    fn from(err: anyhow::Error) -> WebError {
        WebError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            err,
        }
    }
}

impl From<crate::preprocess::PreprocessError> for WebError {
    fn from(err: crate::preprocess::PreprocessError) -> Self {
        WebError::from(anyhow::Error::new(err))
    }
}

impl From<actix_web::error::BlockingError> for WebError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        WebError::from(anyhow::anyhow!("{err}"))
    }
}

/// JSON extractor settings: body size limit, and malformed bodies answered
/// with `{"error": ...}` instead of actix's plain text
pub fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(|err: JsonPayloadError, _req: &HttpRequest| {
            let response = WebError::bad_request(err.to_string()).error_response();
            InternalError::from_response(err, response).into()
        })
}

/// Allow cross-origin requests from anywhere
pub fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allow_any_method()
        .allow_any_header()
}

/// Serve until shut down
pub async fn run(settings: Settings, predictor: Predictor) -> std::io::Result<()> {
    let state = web::Data::new(AppState { predictor });
    let json_limit = settings.server.json_limit;
    let addr = settings.bind_addr();

    info!(
        "listening on {addr} with {} worker(s), predictor mode {:?}",
        settings.server.workers,
        state.predictor.mode()
    );

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(json_config(json_limit))
            .wrap(cors())
            .wrap(middleware::Logger::default())
            .configure(routes::configure)
    })
    .workers(settings.server.workers.max(1))
    .bind(addr)?
    .run()
    .await
}
