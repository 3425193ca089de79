use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection},
    http::{HeaderMap, HeaderName, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::pipeline::{ConvertedImage, IngestPipeline};
use crate::storage::Tenant;

pub const DOMAIN_HEADER: &str = "domain";

/// Where a route takes its tenant from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DomainSource {
    Header,
    HeaderOrDefault,
}

#[derive(Clone, Copy, Debug)]
pub struct RouteVariant {
    pub path: &'static str,
    pub category: &'static str,
    pub domain: DomainSource,
}

pub const ROUTES: &[RouteVariant] = &[
    RouteVariant {
        path: "/image/banner",
        category: "banner",
        domain: DomainSource::Header,
    },
    RouteVariant {
        path: "/image/product",
        category: "products",
        domain: DomainSource::Header,
    },
    RouteVariant {
        path: "/upload",
        category: "uploads",
        domain: DomainSource::HeaderOrDefault,
    },
];

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestPipeline>,
    pub default_domain: Arc<str>,
}

impl AppState {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            pipeline: Arc::new(IngestPipeline::new(config)),
            default_domain: Arc::from(config.default_domain.as_str()),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    image_url: String,
}

pub fn router(state: AppState, config: &IngestConfig) -> Router {
    let mut router = ROUTES.iter().copied().fold(Router::<AppState>::new(), |router, variant| {
        router.route(
            variant.path,
            post(
                move |State(state): State<AppState>,
                      headers: HeaderMap,
                      multipart: Result<Multipart, MultipartRejection>| {
                    handle_upload(variant, state, headers, multipart)
                },
            ),
        )
    });
    router = router.layer(DefaultBodyLimit::max(config.effective_body_limit()));
    if config.serve_static {
        router = router.fallback_service(ServeDir::new(&config.media_root));
    }
    router
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(DOMAIN_HEADER)])
}

async fn handle_upload(
    variant: RouteVariant,
    state: AppState,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    match upload(variant, &state, &headers, multipart).await {
        Ok(image) => (
            StatusCode::OK,
            Json(UploadResponse {
                image_url: image.url,
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

async fn upload(
    variant: RouteVariant,
    state: &AppState,
    headers: &HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> IngestResult<ConvertedImage> {
    let tenant = resolve_tenant(variant.domain, headers, &state.default_domain)?;
    // Not a multipart body at all: nothing could have carried an image.
    let mut multipart = multipart.map_err(|rejection| {
        tracing::debug!(error = %rejection.body_text(), "multipart extraction rejected");
        IngestError::MissingFile
    })?;
    state
        .pipeline
        .ingest(tenant, variant.category, &mut multipart)
        .await
}

/// Tenant resolution happens before the body is touched.
pub fn resolve_tenant(
    source: DomainSource,
    headers: &HeaderMap,
    default_domain: &str,
) -> IngestResult<Tenant> {
    let header = match headers.get(DOMAIN_HEADER) {
        Some(value) => Some(value.to_str().map_err(|_| {
            IngestError::InvalidDomain(String::from_utf8_lossy(value.as_bytes()).into_owned())
        })?),
        None => None,
    };
    match header {
        Some(value) if !value.trim().is_empty() => Tenant::parse(value),
        _ if source == DomainSource::HeaderOrDefault => Tenant::parse(default_domain),
        _ => Err(IngestError::MissingDomain),
    }
}
