use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use utoipa::IntoParams;
use utoipa::ToSchema;

use super::Acknowledged;
use super::JsonBody;
use super::PathParam;
use crate::error::InternalError;
use crate::error::PalletmapError;
use crate::error::Result;
use crate::models::Pallet;
use crate::models::PalletGeometry;
use crate::models::pallet::ArticlesError;
use crate::models::pallet::GeometryError;
use crate::models::pallet::parse_articles;
use crate::store::PalletStore as _;
use crate::store::Store;

#[derive(Debug, thiserror::Error)]
pub enum PalletError {
    #[error("Pallet {id} not found")]
    NotFound { id: i64 },
    #[error(transparent)]
    InvalidGeometry(#[from] GeometryError),
    #[error(transparent)]
    InvalidArticles(#[from] ArticlesError),
    #[error("Missing 'article' parameter")]
    MissingArticle,
}

impl PalletmapError for PalletError {
    fn get_status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvalidGeometry(_) | Self::InvalidArticles(_) | Self::MissingArticle => {
                StatusCode::BAD_REQUEST
            }
        }
    }

    fn get_type(&self) -> &str {
        match self {
            Self::NotFound { .. } => "pallets:NotFound",
            Self::InvalidGeometry(_) => "pallets:InvalidGeometry",
            Self::InvalidArticles(_) => "pallets:InvalidArticles",
            Self::MissingArticle => "pallets:MissingArticle",
        }
    }

    fn context(&self) -> HashMap<String, Value> {
        match self {
            Self::NotFound { id } => [("id".to_owned(), json!(id))].into(),
            Self::InvalidGeometry(GeometryError::NotANumber { field }) => {
                [("field".to_owned(), json!(field))].into()
            }
            Self::InvalidArticles(ArticlesError::InvalidEntry { index }) => {
                [("index".to_owned(), json!(index))].into()
            }
            _ => Default::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub(in crate::views) struct CreatedPallet {
    id: i64,
    name: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub(in crate::views) struct ArticlesForm {
    /// Article codes, `null` and blank entries are dropped
    articles: Vec<Option<String>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub(in crate::views) struct ArticlesResponse {
    ok: bool,
    articles: Vec<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub(in crate::views) struct SearchParams {
    /// The article code to look for
    article: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub(in crate::views) struct SearchResponse {
    article: String,
    matches: Vec<Pallet>,
}

/// List all pallets with their articles
#[utoipa::path(
    get, path = "/api/pallets", tag = "pallets",
    responses(
        (status = 200, description = "Pallets ordered by id", body = Vec<Pallet>),
        (status = 404, description = "The store does not persist pallets", body = InternalError),
    )
)]
pub(in crate::views) async fn list(State(store): State<Arc<Store>>) -> Result<Json<Vec<Pallet>>> {
    Ok(Json(store.pallets()?.list_pallets().await?))
}

/// Create a pallet
///
/// Its name derives from the number of existing pallets.
#[utoipa::path(
    post, path = "/api/pallets", tag = "pallets",
    request_body = PalletGeometry,
    responses(
        (status = 200, description = "The created pallet", body = CreatedPallet),
        (status = 400, description = "Invalid coordinates", body = InternalError),
        (status = 404, description = "The store does not persist pallets", body = InternalError),
    )
)]
pub(in crate::views) async fn create(
    State(store): State<Arc<Store>>,
    JsonBody(body): JsonBody,
) -> Result<Json<CreatedPallet>> {
    let pallets = store.pallets()?;
    let geometry = PalletGeometry::from_json(&body).map_err(PalletError::from)?;
    let Pallet { id, name, .. } = pallets.create_pallet(geometry).await?;
    Ok(Json(CreatedPallet { id, name }))
}

/// Delete a pallet and its placements
#[utoipa::path(
    delete, path = "/api/pallets/{id}", tag = "pallets",
    params(("id" = i64, Path, description = "The pallet id")),
    responses(
        (status = 200, description = "The pallet was deleted", body = Acknowledged),
        (status = 400, description = "The id is not an integer", body = InternalError),
        (status = 404, description = "The pallet does not exist", body = InternalError),
    )
)]
pub(in crate::views) async fn delete(
    State(store): State<Arc<Store>>,
    PathParam(id): PathParam<i64>,
) -> Result<Json<Acknowledged>> {
    if !store.pallets()?.delete_pallet(id).await? {
        return Err(PalletError::NotFound { id }.into());
    }
    Ok(Acknowledged::ok())
}

/// Replace the articles of a pallet
///
/// Codes are trimmed and deduplicated, the normalized list is returned.
#[utoipa::path(
    put, path = "/api/pallets/{id}/articles", tag = "pallets",
    params(("id" = i64, Path, description = "The pallet id")),
    request_body = ArticlesForm,
    responses(
        (status = 200, description = "The stored articles", body = ArticlesResponse),
        (status = 400, description = "'articles' is not a list of codes or the id is not an integer", body = InternalError),
        (status = 404, description = "The pallet does not exist", body = InternalError),
    )
)]
pub(in crate::views) async fn set_articles(
    State(store): State<Arc<Store>>,
    PathParam(id): PathParam<i64>,
    JsonBody(body): JsonBody,
) -> Result<Json<ArticlesResponse>> {
    let pallets = store.pallets()?;
    let articles = parse_articles(&body).map_err(PalletError::from)?;
    let articles = pallets
        .set_articles(id, articles)
        .await?
        .ok_or(PalletError::NotFound { id })?;
    Ok(Json(ArticlesResponse { ok: true, articles }))
}

/// Find the pallets holding an article
#[utoipa::path(
    get, path = "/api/search", tag = "pallets",
    params(SearchParams),
    responses(
        (status = 200, description = "Pallets holding the article", body = SearchResponse),
        (status = 400, description = "Missing or blank article", body = InternalError),
    )
)]
pub(in crate::views) async fn search(
    State(store): State<Arc<Store>>,
    Query(SearchParams { article }): Query<SearchParams>,
) -> Result<Json<SearchResponse>> {
    let article = article
        .map(|article| article.trim().to_owned())
        .filter(|article| !article.is_empty())
        .ok_or(PalletError::MissingArticle)?;
    let matches = store.pallets()?.find_by_article(&article).await?;
    Ok(Json(SearchResponse { article, matches }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::views::test_app::TestApp;
    use crate::views::test_app::TestAppBuilder;

    async fn create_pallet(app: &TestApp, geometry: Value) -> CreatedPallet {
        app.fetch(app.post("/api/pallets").json(&geometry))
            .await
            .assert_status(StatusCode::OK)
            .json_into()
    }

    async fn list_pallets(app: &TestApp) -> Vec<Pallet> {
        app.fetch(app.get("/api/pallets"))
            .await
            .assert_status(StatusCode::OK)
            .json_into()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn created_pallet_round_trips() {
        let app = TestAppBuilder::default_app();
        let created = create_pallet(
            &app,
            json!({ "x": 0.125, "y": "0.5", "w": 0.2, "h": 0.05 }),
        )
        .await;
        assert_eq!(created.name, "Pall 1");

        let pallets = list_pallets(&app).await;
        assert_eq!(
            pallets,
            vec![Pallet {
                id: created.id,
                name: "Pall 1".into(),
                x: 0.125,
                y: 0.5,
                w: 0.2,
                h: 0.05,
                articles: vec![],
            }]
        );
    }

    #[rstest]
    #[case::x_out_of_range(json!({ "x": 1.5, "y": 0, "w": 0.1, "h": 0.1 }))]
    #[case::zero_width(json!({ "x": 0, "y": 0, "w": 0, "h": 0.1 }))]
    #[case::negative_height(json!({ "x": 0, "y": 0, "w": 0.1, "h": -0.1 }))]
    #[case::missing_field(json!({ "x": 0, "y": 0, "w": 0.1 }))]
    #[case::not_a_number(json!({ "x": "left", "y": 0, "w": 0.1, "h": 0.1 }))]
    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn invalid_geometry_persists_nothing(#[case] geometry: Value) {
        let app = TestAppBuilder::default_app();
        let response: Value = app
            .fetch(app.post("/api/pallets").json(&geometry))
            .await
            .assert_status(StatusCode::BAD_REQUEST)
            .json_into();
        assert_eq!(response["type"], json!("pallets:InvalidGeometry"));
        assert!(list_pallets(&app).await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn articles_are_normalized() {
        let app = TestAppBuilder::default_app();
        let pallet = create_pallet(&app, json!({ "x": 0, "y": 0, "w": 0.1, "h": 0.1 })).await;

        let request = app
            .put(&format!("/api/pallets/{}/articles", pallet.id))
            .json(&json!({ "articles": ["A", " A ", "B", null, "", "A"] }));
        let response: ArticlesResponse = app
            .fetch(request)
            .await
            .assert_status(StatusCode::OK)
            .json_into();
        assert!(response.ok);
        assert_eq!(response.articles, vec!["A", "B"]);
        assert_eq!(list_pallets(&app).await[0].articles, vec!["A", "B"]);
    }

    #[rstest]
    #[case::not_a_list(json!({ "articles": "A" }))]
    #[case::missing(json!({}))]
    #[case::nested(json!({ "articles": [["A"]] }))]
    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn invalid_articles(#[case] body: Value) {
        let app = TestAppBuilder::default_app();
        let pallet = create_pallet(&app, json!({ "x": 0, "y": 0, "w": 0.1, "h": 0.1 })).await;
        let request = app
            .put(&format!("/api/pallets/{}/articles", pallet.id))
            .json(&body);
        let response: Value = app
            .fetch(request)
            .await
            .assert_status(StatusCode::BAD_REQUEST)
            .json_into();
        assert_eq!(response["type"], json!("pallets:InvalidArticles"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn unknown_pallet() {
        let app = TestAppBuilder::default_app();
        let request = app
            .put("/api/pallets/42/articles")
            .json(&json!({ "articles": ["A"] }));
        let response: Value = app
            .fetch(request)
            .await
            .assert_status(StatusCode::NOT_FOUND)
            .json_into();
        assert_eq!(response["type"], json!("pallets:NotFound"));
        assert_eq!(response["context"], json!({ "id": 42 }));

        app.fetch(app.delete("/api/pallets/42"))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn non_numeric_ids_are_rejected_as_json() {
        let app = TestAppBuilder::default_app();
        let response: Value = app
            .fetch(app.delete("/api/pallets/abc"))
            .await
            .assert_status(StatusCode::BAD_REQUEST)
            .json_into();
        assert_eq!(response["type"], json!("request:InvalidPath"));
        assert_eq!(response["error"], json!("Invalid path parameter"));

        let request = app
            .put("/api/pallets/1.5/articles")
            .json(&json!({ "articles": ["A"] }));
        let response: Value = app
            .fetch(request)
            .await
            .assert_status(StatusCode::BAD_REQUEST)
            .json_into();
        assert_eq!(response["type"], json!("request:InvalidPath"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn deleted_pallet_is_no_longer_found() {
        let app = TestAppBuilder::default_app();
        let kept = create_pallet(&app, json!({ "x": 0, "y": 0, "w": 0.1, "h": 0.1 })).await;
        let deleted = create_pallet(&app, json!({ "x": 0.5, "y": 0.5, "w": 0.1, "h": 0.1 })).await;
        for (id, articles) in [(kept.id, json!(["shared"])), (deleted.id, json!(["shared", "gone"]))] {
            app.fetch(
                app.put(&format!("/api/pallets/{id}/articles"))
                    .json(&json!({ "articles": articles })),
            )
            .await
            .assert_status(StatusCode::OK);
        }

        let response: Value = app
            .fetch(app.delete(&format!("/api/pallets/{}", deleted.id)))
            .await
            .assert_status(StatusCode::OK)
            .json_into();
        assert_eq!(response, json!({ "ok": true }));

        let search: SearchResponse = app
            .fetch(app.get("/api/search?article=gone"))
            .await
            .assert_status(StatusCode::OK)
            .json_into();
        assert_eq!(search.article, "gone");
        assert!(search.matches.is_empty());

        let search: SearchResponse = app
            .fetch(app.get("/api/search?article=%20shared%20"))
            .await
            .assert_status(StatusCode::OK)
            .json_into();
        assert_eq!(search.article, "shared");
        assert_eq!(search.matches.len(), 1);
        assert_eq!(search.matches[0].id, kept.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn names_may_repeat_after_a_deletion() {
        let app = TestAppBuilder::default_app();
        let first = create_pallet(&app, json!({ "x": 0, "y": 0, "w": 0.1, "h": 0.1 })).await;
        create_pallet(&app, json!({ "x": 0, "y": 0, "w": 0.1, "h": 0.1 })).await;
        app.fetch(app.delete(&format!("/api/pallets/{}", first.id)))
            .await
            .assert_status(StatusCode::OK);
        let third = create_pallet(&app, json!({ "x": 0, "y": 0, "w": 0.1, "h": 0.1 })).await;
        assert_eq!(third.name, "Pall 2");
        let names: Vec<String> = list_pallets(&app)
            .await
            .into_iter()
            .map(|pallet| pallet.name)
            .collect();
        assert_eq!(names, vec!["Pall 2", "Pall 2"]);
    }

    #[rstest]
    #[case::missing("/api/search")]
    #[case::blank("/api/search?article=%20%20")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn search_requires_an_article(#[case] path: &str) {
        let app = TestAppBuilder::default_app();
        let response: Value = app
            .fetch(app.get(path))
            .await
            .assert_status(StatusCode::BAD_REQUEST)
            .json_into();
        assert_eq!(response["type"], json!("pallets:MissingArticle"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn file_store_has_no_pallets() {
        let app = TestAppBuilder::new().file_store().build();
        let response: Value = app
            .fetch(app.get("/api/pallets"))
            .await
            .assert_status(StatusCode::NOT_FOUND)
            .json_into();
        assert_eq!(response["type"], json!("store:Unsupported"));
        assert_eq!(response["context"], json!({ "store": "file" }));

        app.fetch(app.post("/api/pallets").json(&json!({ "x": 0, "y": 0, "w": 0.1, "h": 0.1 })))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
