//! HTTP API サーバー
//!
//! 画像認識・文字認識・履歴・ポイント照会のエンドポイントに加え、
//! 知識記事、景品交換、管理者向けのユーザー管理を提供する。

mod admin;
mod articles;
mod handlers;
mod rewards;

pub use admin::*;
pub use articles::*;
pub use handlers::*;
pub use rewards::*;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recognition::{
    GarbageItem, HistoryRecord, ImageRecognition, RecognitionService, Redemption, TextRecognition,
    UserStatus,
};

/// サーバーのエラー
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Bind error: {0}")]
    Bind(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// APIレスポンスの共通形式
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub request_id: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, request_id: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            request_id: request_id.to_string(),
        }
    }

    pub fn error(message: &str, request_id: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.to_string()),
            request_id: request_id.to_string(),
        }
    }
}

/// ヘルスチェック
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub model_loaded: bool,
    pub users_count: usize,
    pub catalog_size: usize,
}

// =============================================================================
// Request/Response DTOs
// =============================================================================

/// 一般ユーザー登録（権限は指定できない）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUserRequest {
    pub username: String,
}

/// 管理者作成
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAdminRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStatusRequest {
    pub status: UserStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateArticleRequest {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArticleListParams {
    /// タイトルの部分一致
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedeemResponse {
    pub user_id: u64,
    pub remaining_points: i64,
    pub redemption: Redemption,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedemptionHistoryResponse {
    pub user_id: u64,
    pub redemptions: Vec<Redemption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsResponse {
    pub user_id: u64,
    pub username: String,
    pub points: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextQueryRequest {
    pub query: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TextSearchParams {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryParams {
    /// 論理削除済みも含める（管理者のみ有効）
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextSearchResponse {
    pub query: String,
    pub items: Vec<GarbageItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    pub user_id: u64,
    pub records: Vec<HistoryRecord>,
}

pub type ImageRecognitionResponse = ImageRecognition;
pub type TextRecognitionResponse = TextRecognition;

/// ハンドラー間で共有する状態
pub struct AppState<B: Backend> {
    pub service: Arc<RecognitionService<B>>,
    pub started_at: Instant,
}

impl<B: Backend> AppState<B> {
    pub fn new(service: RecognitionService<B>) -> Self {
        Self {
            service: Arc::new(service),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl<B: Backend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            started_at: self.started_at,
        }
    }
}

/// ルーティング
pub fn router<B: Backend>(state: AppState<B>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_check::<B>))
        .route("/api/users", post(register_user::<B>))
        .route("/api/users/:id/points", get(user_points::<B>))
        .route("/api/recognize/image", post(recognize_image::<B>))
        .route(
            "/api/recognize/text",
            get(search_text::<B>).post(recognize_text::<B>),
        )
        .route(
            "/api/history/:id",
            get(list_history::<B>).delete(delete_history::<B>),
        )
        .route(
            "/api/articles",
            get(list_articles::<B>).post(create_article::<B>),
        )
        .route(
            "/api/articles/:id",
            get(get_article::<B>)
                .put(update_article::<B>)
                .delete(delete_article::<B>),
        )
        .route(
            "/api/rewards",
            get(list_rewards::<B>).post(create_reward::<B>),
        )
        .route("/api/rewards/:id/redeem", post(redeem_reward::<B>))
        .route("/api/redemptions", get(my_redemptions::<B>))
        .route("/api/redemptions/:user_id", get(user_redemptions::<B>))
        .route(
            "/api/admin/users",
            get(list_users::<B>).post(create_admin::<B>),
        )
        .route("/api/admin/users/:id/status", put(update_user_status::<B>))
        .route("/static/uploads/:name", get(serve_upload::<B>))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// サーバーを起動し、終了まで待つ
pub async fn serve<B: Backend>(
    state: AppState<B>,
    addr: SocketAddr,
    max_body_bytes: usize,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("{}: {}", addr, e)))?;
    tracing::info!("HTTPサーバーを起動しました: http://{}", addr);

    axum::serve(listener, router(state, max_body_bytes)).await?;
    Ok(())
}
