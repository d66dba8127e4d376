//! HTTP front end.
//!
//! Every path that is not a fixed route is treated as a package identifier.

pub mod error;
pub mod metrics;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use unpkg_core::{LocalTarget, Resolution, Unpkg};
use unpkg_schema::PackageRef;

use crate::listing;
use error::ApiError;
use metrics::Metrics;

/// Content types that differ from the extension-based guess.
const CONTENT_TYPE_OVERRIDES: &[(&str, &str)] = &[("md", "text/x-markdown")];

const BANNER: &str = concat!("unpkg ", env!("CARGO_PKG_VERSION"), "\n");

/// Characters escaped when an identifier is written back into a `Location`.
const PATH_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone)]
struct AppState {
    unpkg: Arc<Unpkg>,
    metrics: Option<Metrics>,
}

/// Build the router. `/metrics` is only mounted when `metrics` is given.
pub fn router(unpkg: Arc<Unpkg>, metrics: Option<Metrics>) -> Router {
    let mut router = Router::new()
        .route("/", get(|| async { BANNER }))
        .route("/healthz", get(|| async { BANNER }));
    if metrics.is_some() {
        router = router.route("/metrics", get(render_metrics));
    }

    router
        .fallback(serve_package)
        .with_state(AppState { unpkg, metrics })
        .layer(TraceLayer::new_for_http())
}

/// Serve until Ctrl-C, then stop background tasks.
pub async fn serve(app: Unpkg, listen: SocketAddr, metrics: Option<Metrics>) -> Result<()> {
    let app = Arc::new(app);
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind to address: {listen}"))?;
    let addr = listener
        .local_addr()
        .context("Failed to get local addr")?;
    info!(%addr, cache_dir = %app.cache_dir().display(), "Serving packages");

    axum::serve(listener, router(Arc::clone(&app), metrics))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    app.shutdown().await;
    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    let Some(metrics) = state.metrics else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match metrics.render() {
        Ok((content_type, body)) => ([(header::CONTENT_TYPE, content_type)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn serve_package(State(state): State<AppState>, req: Request) -> Response {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let path = percent_decode_str(req.uri().path())
        .decode_utf8_lossy()
        .into_owned();
    let pkg_ref = match PackageRef::parse(&path) {
        Ok(r) => r,
        Err(e) => return ApiError::from(e).into_response(),
    };

    if let Some(metrics) = &state.metrics {
        metrics.record_request(&pkg_ref.name);
    }

    match state.unpkg.resolve_and_ensure_local(&pkg_ref).await {
        Ok(Resolution::Redirect(to)) => redirect_to(&to.canonical()),
        Ok(Resolution::Local(target)) => serve_local(&pkg_ref, &target, req).await,
        Err(e) => ApiError(e).into_response(),
    }
}

async fn serve_local(pkg_ref: &PackageRef, target: &LocalTarget, req: Request) -> Response {
    let Ok(meta) = tokio::fs::metadata(&target.path).await else {
        return not_found(pkg_ref);
    };

    if meta.is_dir() {
        if !target.is_directory {
            return redirect_to(&format!("{}/", pkg_ref.canonical()));
        }
        return match listing::render(&target.path).await {
            Ok(body) => (
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => ApiError::from(e).into_response(),
        };
    }

    if target.is_directory {
        return not_found(pkg_ref);
    }

    serve_file(&target.path, req).await
}

async fn serve_file(path: &Path, req: Request) -> Response {
    let mut res = match ServeFile::new(path).oneshot(req).await {
        Ok(res) => res.map(Body::new),
        Err(never) => match never {},
    };

    let ext = path
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or_default();
    if let Some((_, content_type)) = CONTENT_TYPE_OVERRIDES
        .iter()
        .find(|(e, _)| e.eq_ignore_ascii_case(ext))
    {
        res.headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(*content_type));
    }
    res
}

fn redirect_to(identifier: &str) -> Response {
    let location = format!("/{}", utf8_percent_encode(identifier, PATH_ESCAPE));
    Redirect::temporary(&location).into_response()
}

fn not_found(pkg_ref: &PackageRef) -> Response {
    (
        StatusCode::NOT_FOUND,
        format!("Cannot find {}\n", pkg_ref.canonical()),
    )
        .into_response()
}
