//! HTTP routes: image prediction and a liveness probe

use super::protocol::{HealthResponse, PredictRequest, PredictResponse};
use super::{AppState, WebError, NO_IMAGE, SOURCE_HEADER};
use crate::predictor::Prediction;
use crate::preprocess;
use actix_web::{get, post, web, HttpResponse, Responder};
use tracing::{debug, info};

type Result<T> = std::result::Result<T, WebError>;

/// Register every route on an app
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(predict).service(health);
}

/// Classify a base 64 image
#[post("/api/predict")]
pub async fn predict(
    req: web::Json<PredictRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    debug!("got request {:?}", req);
    let image = req
        .into_inner()
        .image
        .ok_or_else(|| WebError::bad_request(NO_IMAGE))?;

    // Decoding and inference are CPU bound, keep them off the async workers
    let prediction = web::block(move || -> Result<Prediction> {
        let tensor = preprocess::load_b64_image(&image)?;
        Ok(state.predictor.predict(&tensor))
    })
    .await??;

    info!(
        "served prediction: {} ({:.3}) via {}",
        prediction.verdict,
        prediction.confidence,
        prediction.source.label()
    );

    Ok(HttpResponse::Ok()
        .insert_header((SOURCE_HEADER, prediction.source.label()))
        .json(PredictResponse::from(&prediction)))
}

/// Liveness probe. Does not look at the model.
#[get("/api/health")]
pub async fn health() -> impl Responder {
    web::Json(HealthResponse { status: "healthy" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_JSON_LIMIT;
    use crate::heuristic::{CONFIDENCE_SPAN, MIN_CONFIDENCE};
    use crate::predictor::{Classifier, Predictor};
    use crate::preprocess::test::{noise_png, solid_png, to_b64};
    use crate::preprocess::ImageTensor;
    use crate::server::{cors, json_config};
    use crate::torch::InferenceError;
    use actix_web::http::header::{self, ContentType};
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::{json, Value};
    use std::sync::Arc;

    macro_rules! app {
        ($predictor:expr) => {
            app!($predictor, DEFAULT_JSON_LIMIT)
        };
        ($predictor:expr, $limit:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new(AppState {
                        predictor: $predictor,
                    }))
                    .app_data(json_config($limit))
                    .wrap(cors())
                    .configure(configure),
            )
            .await
        };
    }

    fn post(body: Value) -> test::TestRequest {
        test::TestRequest::post().uri("/api/predict").set_json(body)
    }

    #[derive(Debug)]
    struct Positive;

    impl Classifier for Positive {
        fn classify(&self, _image: &ImageTensor) -> std::result::Result<Vec<f64>, InferenceError> {
            Ok(vec![0.1, 0.9])
        }
    }

    #[derive(Debug)]
    struct Failing;

    impl Classifier for Failing {
        fn classify(&self, _image: &ImageTensor) -> std::result::Result<Vec<f64>, InferenceError> {
            Err(InferenceError::Poisoned)
        }
    }

    #[actix_web::test]
    async fn test_health() {
        let app = app!(Predictor::heuristic());
        let req = test::TestRequest::get().uri("/api/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"status": "healthy"}));
    }

    #[actix_web::test]
    async fn test_health_ignores_model() {
        let app = app!(Predictor::model_first(Arc::new(Failing)));
        let req = test::TestRequest::get().uri("/api/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_missing_image() {
        let app = app!(Predictor::heuristic());
        for body in [json!({}), json!({"picture": "AAAA"}), json!({"image": null})] {
            let resp = test::call_service(&app, post(body).to_request()).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body, json!({"error": "No image provided"}));
        }
    }

    #[actix_web::test]
    async fn test_heuristic_prediction() {
        let app = app!(Predictor::heuristic());
        for png in [
            solid_png(20, 20, [0, 0, 0]),
            solid_png(64, 16, [255, 255, 255]),
            solid_png(3, 7, [120, 30, 200]),
            noise_png(100, 100),
        ] {
            let resp =
                test::call_service(&app, post(json!({"image": to_b64(&png)})).to_request()).await;
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(resp.headers().get(SOURCE_HEADER).unwrap(), "heuristic");

            let body: Value = test::read_body_json(resp).await;
            let prediction = body["prediction"].as_str().unwrap();
            assert!(prediction == "TB Detected" || prediction == "TB Not Detected");
            let confidence = body["confidence"].as_f64().unwrap();
            assert!((MIN_CONFIDENCE..=MIN_CONFIDENCE + CONFIDENCE_SPAN).contains(&confidence));
        }
    }

    #[actix_web::test]
    async fn test_deterministic() {
        let app = app!(Predictor::heuristic());
        let image = to_b64(&noise_png(40, 30));

        let first: Value =
            test::call_and_read_body_json(&app, post(json!({ "image": image })).to_request()).await;
        let second: Value =
            test::call_and_read_body_json(&app, post(json!({ "image": image })).to_request()).await;
        assert_eq!(first, second);
    }

    #[actix_web::test]
    async fn test_data_uri_prefix() {
        let app = app!(Predictor::heuristic());
        let image = to_b64(&noise_png(40, 30));
        let prefixed = format!("data:image/png;base64,{image}");

        let bare: Value =
            test::call_and_read_body_json(&app, post(json!({ "image": image })).to_request()).await;
        let uri: Value =
            test::call_and_read_body_json(&app, post(json!({ "image": prefixed })).to_request())
                .await;
        assert_eq!(bare, uri);
    }

    #[actix_web::test]
    async fn test_undecodable_input() {
        let app = app!(Predictor::heuristic());
        let not_an_image = to_b64(b"plain text, not pixels");
        for image in ["%%% not base64 %%%", not_an_image.as_str()] {
            let resp = test::call_service(&app, post(json!({ "image": image })).to_request()).await;
            assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
            let body: Value = test::read_body_json(resp).await;
            assert!(body["error"].is_string());
        }
    }

    #[actix_web::test]
    async fn test_malformed_body() {
        let app = app!(Predictor::heuristic());
        let req = test::TestRequest::post()
            .uri("/api/predict")
            .insert_header(ContentType::json())
            .set_payload("{\"image\": ")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].is_string());
    }

    #[actix_web::test]
    async fn test_payload_limit() {
        let app = app!(Predictor::heuristic(), 64);
        let image = to_b64(&noise_png(40, 30));
        let resp = test::call_service(&app, post(json!({ "image": image })).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_model_prediction() {
        let app = app!(Predictor::model_first(Arc::new(Positive)));
        let image = to_b64(&solid_png(10, 10, [50, 60, 70]));
        let resp = test::call_service(&app, post(json!({ "image": image })).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(SOURCE_HEADER).unwrap(), "model");
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"prediction": "TB Detected", "confidence": 0.9}));
    }

    #[actix_web::test]
    async fn test_model_failure_falls_back() {
        let image = to_b64(&solid_png(10, 10, [50, 60, 70]));

        let app = app!(Predictor::model_first(Arc::new(Failing)));
        let resp = test::call_service(&app, post(json!({ "image": image })).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(SOURCE_HEADER).unwrap(), "heuristic");
        let fallback: Value = test::read_body_json(resp).await;

        let app = app!(Predictor::heuristic());
        let heuristic: Value =
            test::call_and_read_body_json(&app, post(json!({ "image": image })).to_request()).await;
        assert_eq!(fallback, heuristic);
    }

    #[actix_web::test]
    async fn test_cors() {
        let app = app!(Predictor::heuristic());
        let req = test::TestRequest::get()
            .uri("/api/health")
            .insert_header((header::ORIGIN, "http://localhost:8080"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }
}
