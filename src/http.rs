use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;

use crate::error::Error;
use crate::options::{self, ChartFilters, FilterRequest};
use crate::processor::WbrResult;
use crate::WbrService;

type SharedService = Arc<WbrService>;

/// Error body `{error, details, error_type}` with a status chosen by kind.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            Error::ConfigNotFound { .. } => StatusCode::NOT_FOUND,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> Value {
        json!({
            "error": self.0.message(),
            "details": self.0.details(),
            "error_type": self.0.error_type(),
        })
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct CascadeRequest {
    pub shopping: Option<String>,
    pub ramo: Option<String>,
    pub categoria: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InstagramRequest {
    pub data_referencia: Option<String>,
    pub shopping: Option<String>,
    pub limit: Option<u32>,
}

pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/api/v1/wbr/filters/options", get(filter_options))
        .route("/api/v1/wbr/filters/filtered-options", get(filtered_options))
        .route("/api/v1/wbr/filters/available-dates", get(available_dates))
        .route("/api/v1/wbr/instagram/kpis", get(instagram_kpis))
        .route("/api/v1/wbr/instagram/top-posts", get(instagram_top_posts))
        .route("/api/v1/wbr/page/:page_id", get(page))
        .route("/api/v1/wbr/page/:page_id/config", get(page_config))
        .route("/api/v1/wbr/:chart_id", get(chart))
        .with_state(service)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(service: SharedService, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(service)).await
}

async fn chart(
    State(service): State<SharedService>,
    Path(chart_id): Path<String>,
    Query(request): Query<FilterRequest>,
) -> ApiResult<WbrResult> {
    let filters = ChartFilters::resolve_for_chart(service.executor(), &request, &chart_id).await?;
    let result = service
        .generate(&chart_id, filters.as_ref(), request.data_referencia.as_deref())
        .await?;
    Ok(Json(result))
}

async fn page(
    State(service): State<SharedService>,
    Path(page_id): Path<String>,
    Query(request): Query<FilterRequest>,
) -> ApiResult<Map<String, Value>> {
    let filters = ChartFilters::resolve(service.executor(), &request).await?;
    let result = service
        .generate_page(&page_id, &filters, request.data_referencia.as_deref())
        .await?;
    Ok(Json(result))
}

async fn page_config(
    State(service): State<SharedService>,
    Path(page_id): Path<String>,
) -> ApiResult<Value> {
    Ok(Json(service.page_config(&page_id)?))
}

async fn filter_options(State(service): State<SharedService>) -> ApiResult<options::FilterOptions> {
    Ok(Json(options::filter_options(service.executor()).await?))
}

async fn filtered_options(
    State(service): State<SharedService>,
    Query(request): Query<CascadeRequest>,
) -> ApiResult<options::FilteredOptions> {
    let result = options::filtered_options(
        service.executor(),
        request.shopping.as_deref(),
        request.ramo.as_deref(),
        request.categoria.as_deref(),
    )
    .await?;
    Ok(Json(result))
}

async fn available_dates(
    State(service): State<SharedService>,
) -> ApiResult<options::AvailableDates> {
    Ok(Json(options::available_dates(service.executor()).await?))
}

async fn instagram_kpis(
    State(service): State<SharedService>,
    Query(request): Query<InstagramRequest>,
) -> ApiResult<options::InstagramKpis> {
    let result = options::instagram_kpis(
        service.executor(),
        request.data_referencia.as_deref(),
        request.shopping.as_deref(),
    )
    .await?;
    Ok(Json(result))
}

async fn instagram_top_posts(
    State(service): State<SharedService>,
    Query(request): Query<InstagramRequest>,
) -> ApiResult<options::TopPosts> {
    let result = options::instagram_top_posts(
        service.executor(),
        request.data_referencia.as_deref(),
        request.shopping.as_deref(),
        request.limit.unwrap_or(options::DEFAULT_TOP_POSTS),
    )
    .await?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::ConfigLoader;
    use crate::logger::NullLogger;
    use crate::storage::SqliteExecutor;

    async fn service(dir: &tempfile::TempDir) -> SharedService {
        let charts = dir.path().join("charts");
        let pages = dir.path().join("pages");
        std::fs::create_dir_all(&charts).unwrap();
        std::fs::create_dir_all(&pages).unwrap();
        std::fs::write(
            charts.join("vendas.json"),
            r#"{"grafico_id":"vendas","tabela":"vendas","colunas":{"data":"dt","valor":"total"},
                "filtros":{},"agrupamento":"mensal"}"#,
        )
        .unwrap();
        std::fs::write(pages.join("empty.json"), r#"{"page_id":"empty","graficos":[]}"#).unwrap();

        let db = SqliteExecutor::open_in_memory().await.unwrap();
        db.execute_batch(
            "CREATE TABLE vendas (dt TEXT, total REAL, shopping TEXT);
             INSERT INTO vendas VALUES ('2025-01-05', 100, 'SCIB'), ('2025-01-06', 7, 'SBI');",
        )
        .await
        .unwrap();
        Arc::new(WbrService::new(
            ConfigLoader::new(dir.path()).unwrap(),
            Arc::new(db),
            Arc::new(MemoryCache::new()),
            Arc::new(NullLogger),
        ))
    }

    #[test]
    fn test_status_mapping() {
        let not_found = ApiError(Error::ConfigNotFound {
            id: "x".into(),
            config_path: None,
        });
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert_eq!(not_found.body()["error_type"], "ConfigNotFoundException");
        assert_eq!(
            ApiError(Error::BadRequest("no charts".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(Error::invalid_config("bad")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let response = ApiError(Error::unexpected("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_chart_handler_applies_shopping() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;
        let request = FilterRequest {
            data_referencia: Some("2025-01-10".into()),
            shopping: Some("SCIB".into()),
            ..FilterRequest::default()
        };
        let Json(result) = chart(State(svc), Path("vendas".into()), Query(request))
            .await
            .unwrap();
        assert_eq!(result.meses_cy.metric_value.values().sum::<f64>(), 100.0);
    }

    #[tokio::test]
    async fn test_chart_handler_ignores_rgm_dimensions_for_other_charts() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;
        let request = FilterRequest {
            data_referencia: Some("2025-01-10".into()),
            ramo: Some("Moda".into()),
            ..FilterRequest::default()
        };
        let Json(result) = chart(State(svc), Path("vendas".into()), Query(request))
            .await
            .unwrap();
        assert_eq!(result.meses_cy.metric_value.values().sum::<f64>(), 107.0);
    }

    #[tokio::test]
    async fn test_instagram_handlers() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        let err = instagram_kpis(State(svc.clone()), Query(InstagramRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        // Schemas are not attached here, so the lookup is a server error.
        let err = instagram_top_posts(State(svc), Query(InstagramRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body()["error_type"], "QueryExecutionException");
    }

    #[tokio::test]
    async fn test_handlers_surface_errors() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        let err = chart(
            State(svc.clone()),
            Path("missing".into()),
            Query(FilterRequest::default()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = page(State(svc.clone()), Path("empty".into()), Query(FilterRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let Json(raw) = page_config(State(svc), Path("empty".into())).await.unwrap();
        assert_eq!(raw["page_id"], "empty");
    }

    #[tokio::test]
    async fn test_router_builds() {
        let dir = tempfile::tempdir().unwrap();
        let _router = router(service(&dir).await);
    }
}
