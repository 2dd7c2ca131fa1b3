//! 知識記事のハンドラー
//!
//! 閲覧は誰でも可能。作成・更新・削除は管理者のみ。

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use burn::tensor::backend::Backend;

use crate::recognition::{Article, ArticleUpdate};
use crate::server::handlers::{fail, ok, request_id, require_admin, store_status, ApiResult};
use crate::server::{AppState, ArticleListParams, CreateArticleRequest};

/// 公開中の記事一覧（更新の新しい順）
pub async fn list_articles<B: Backend>(
    State(state): State<AppState<B>>,
    Query(params): Query<ArticleListParams>,
) -> ApiResult<Vec<Article>> {
    let req_id = request_id();
    let store = state.service.store();

    let articles = match params.title.as_deref().map(str::trim) {
        Some(title) if !title.is_empty() => store.search_articles(title),
        _ => store.published_articles(),
    };
    ok(StatusCode::OK, articles, &req_id)
}

/// 記事詳細（論理削除済みは 404）
pub async fn get_article<B: Backend>(
    State(state): State<AppState<B>>,
    Path(id): Path<u64>,
) -> ApiResult<Article> {
    let req_id = request_id();

    match state.service.store().published_article(id) {
        Ok(article) => ok(StatusCode::OK, article, &req_id),
        Err(e) => fail(store_status(&e), &e.to_string(), &req_id),
    }
}

pub async fn create_article<B: Backend>(
    State(state): State<AppState<B>>,
    headers: HeaderMap,
    Json(payload): Json<CreateArticleRequest>,
) -> ApiResult<Article> {
    let req_id = request_id();

    let admin = match require_admin(&state, &headers) {
        Ok(user) => user,
        Err((status, message)) => return fail(status, &message, &req_id),
    };

    match state
        .service
        .store()
        .create_article(admin.id, &payload.title, &payload.content)
    {
        Ok(article) => {
            tracing::info!(article_id = article.id, author = admin.id, "記事を作成しました");
            ok(StatusCode::CREATED, article, &req_id)
        }
        Err(e) => fail(store_status(&e), &e.to_string(), &req_id),
    }
}

pub async fn update_article<B: Backend>(
    State(state): State<AppState<B>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    Json(payload): Json<ArticleUpdate>,
) -> ApiResult<Article> {
    let req_id = request_id();

    if let Err((status, message)) = require_admin(&state, &headers) {
        return fail(status, &message, &req_id);
    }

    match state.service.store().update_article(id, payload) {
        Ok(article) => ok(StatusCode::OK, article, &req_id),
        Err(e) => fail(store_status(&e), &e.to_string(), &req_id),
    }
}

/// 記事の論理削除
pub async fn delete_article<B: Backend>(
    State(state): State<AppState<B>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> ApiResult<u64> {
    let req_id = request_id();

    if let Err((status, message)) = require_admin(&state, &headers) {
        return fail(status, &message, &req_id);
    }

    match state.service.store().delete_article(id) {
        Ok(()) => {
            tracing::info!(article_id = id, "記事を削除しました");
            ok(StatusCode::OK, id, &req_id)
        }
        Err(e) => fail(store_status(&e), &e.to_string(), &req_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::testing::TestBackend;
    use crate::recognition::service::tests::service;
    use crate::recognition::Role;
    use crate::server::USER_ID_HEADER;
    use axum::http::HeaderValue;

    fn state_with_users(dir: &std::path::Path) -> (AppState<TestBackend>, u64, u64) {
        let state = AppState::new(service(dir, &[0.0, 0.0, 4.0]));
        let store = state.service.store();
        let admin = store.register_user("editor", Role::Admin).unwrap();
        let user = store.register_user("reader", Role::User).unwrap();
        (state, admin.id, user.id)
    }

    fn as_user(user_id: u64) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from(user_id));
        headers
    }

    fn draft(title: &str) -> CreateArticleRequest {
        CreateArticleRequest {
            title: title.into(),
            content: "Rinse before recycling".into(),
        }
    }

    #[tokio::test]
    async fn test_only_admin_writes_articles() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _, user) = state_with_users(dir.path());

        let (status, _) =
            create_article(State(state.clone()), HeaderMap::new(), Json(draft("Glass"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) =
            create_article(State(state.clone()), as_user(user), Json(draft("Glass"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = delete_article(State(state.clone()), Path(1), as_user(user)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        assert!(state.service.store().published_articles().is_empty());
    }

    #[tokio::test]
    async fn test_article_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let (state, admin, _) = state_with_users(dir.path());

        let (status, Json(body)) =
            create_article(State(state.clone()), as_user(admin), Json(draft("Glass"))).await;
        assert_eq!(status, StatusCode::CREATED);
        let glass = body.data.unwrap();
        let (_, Json(body)) =
            create_article(State(state.clone()), as_user(admin), Json(draft("Batteries"))).await;
        let batteries = body.data.unwrap();

        let (_, Json(body)) = list_articles(
            State(state.clone()),
            Query(ArticleListParams::default()),
        )
        .await;
        let ids: Vec<u64> = body.data.unwrap().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![batteries.id, glass.id]);

        let (status, Json(body)) = update_article(
            State(state.clone()),
            Path(glass.id),
            as_user(admin),
            Json(ArticleUpdate {
                title: Some("Glass jars".into()),
                content: None,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.data.unwrap().title, "Glass jars");

        let (_, Json(body)) = list_articles(
            State(state.clone()),
            Query(ArticleListParams {
                title: Some("jars".into()),
            }),
        )
        .await;
        assert_eq!(body.data.unwrap().len(), 1);

        let (status, _) =
            delete_article(State(state.clone()), Path(glass.id), as_user(admin)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = get_article(State(state.clone()), Path(glass.id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, Json(body)) = get_article(State(state), Path(batteries.id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.data.unwrap().author_username.as_deref(), Some("editor"));
    }

    #[tokio::test]
    async fn test_blank_article_title_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (state, admin, _) = state_with_users(dir.path());

        let (status, Json(body)) =
            create_article(State(state), as_user(admin), Json(draft("  "))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.error.unwrap().contains("title"));
    }
}
