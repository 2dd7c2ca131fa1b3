//! 画像・文字によるごみ認識の業務ロジック
//!
//! 画像認識: アップロード保存 → 分類 → ポイント加算と履歴記録。
//! 分類に失敗した場合はポイントも履歴も変更しない。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use burn::tensor::backend::Backend;
use serde::Serialize;
use thiserror::Error;

use crate::ml::{ClassifyError, ModelLoader};
use crate::model::AppConfig;
use crate::recognition::store::{GarbageItem, MemoryStore, NewHistory, QueryType, StoreError};
use crate::recognition::uploads::{save_upload, UploadError};

/// 文字検索の最大件数
pub const TEXT_SEARCH_LIMIT: usize = 10;

/// 文字認識で該当品目が無いときの分類
///
/// 履歴に保存される値。既存の履歴データと同じ文字列を使う。
pub const NOT_FOUND_CATEGORY: &str = "未找到";

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error("classification timed out after {0:?}")]
    Timeout(Duration),

    #[error("classification task failed: {0}")]
    Task(String),

    #[error("query must not be empty")]
    EmptyQuery,
}

/// 画像認識の結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRecognition {
    pub category: String,
    pub probability: f64,
    pub image_url: String,
    pub history_id: u64,
    pub points: i64,
}

/// 文字認識（履歴あり）の結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextRecognition {
    pub query: String,
    pub item: Option<GarbageItem>,
    pub result_category: String,
    pub history_id: u64,
    pub points: i64,
}

/// 認識サービスの設定
#[derive(Debug, Clone)]
pub struct RecognitionSettings {
    pub upload_dir: PathBuf,
    pub public_base_url: String,
    pub points_per_recognition: i64,
    pub inference_timeout: Duration,
}

impl From<&AppConfig> for RecognitionSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            upload_dir: config.server.upload_dir.clone(),
            public_base_url: config.server.public_base_url.clone(),
            points_per_recognition: config.points.per_recognition,
            inference_timeout: Duration::from_secs(config.server.inference_timeout_secs),
        }
    }
}

/// 認識サービス
pub struct RecognitionService<B: Backend> {
    loader: Arc<ModelLoader<B>>,
    store: Arc<MemoryStore>,
    settings: RecognitionSettings,
}

impl<B: Backend> RecognitionService<B> {
    pub fn new(
        loader: Arc<ModelLoader<B>>,
        store: Arc<MemoryStore>,
        settings: RecognitionSettings,
    ) -> Self {
        Self {
            loader,
            store,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn loader(&self) -> &Arc<ModelLoader<B>> {
        &self.loader
    }

    pub fn settings(&self) -> &RecognitionSettings {
        &self.settings
    }

    /// 保存済みファイル名の公開URL
    pub fn public_url(&self, file_name: &str) -> String {
        format!(
            "{}/{}",
            self.settings.public_base_url.trim_end_matches('/'),
            file_name
        )
    }

    /// 画像認識
    ///
    /// 分類はブロッキング処理のため専用スレッドで行い、設定のタイムアウトで打ち切る。
    pub async fn recognize_image(
        &self,
        user_id: u64,
        original_filename: Option<&str>,
        bytes: &[u8],
    ) -> Result<ImageRecognition, RecognitionError> {
        self.store.user(user_id)?;

        let stored = save_upload(&self.settings.upload_dir, original_filename, bytes)?;

        let loader = Arc::clone(&self.loader);
        let path = stored.path.clone();
        let task = tokio::task::spawn_blocking(move || loader.try_classify_image(&path));

        let outcome = match tokio::time::timeout(self.settings.inference_timeout, task).await {
            Ok(Ok(result)) => result.map_err(RecognitionError::from),
            Ok(Err(join_error)) => Err(RecognitionError::Task(join_error.to_string())),
            Err(_) => Err(RecognitionError::Timeout(self.settings.inference_timeout)),
        };

        let classification = match outcome {
            Ok(classification) => classification,
            Err(e) => {
                tracing::warn!(user_id, file = %stored.file_name, "画像認識に失敗しました: {}", e);
                // タイムアウト時は分類スレッドがまだ読んでいる
                if !matches!(e, RecognitionError::Timeout(_)) {
                    std::fs::remove_file(&stored.path).ok();
                }
                return Err(e);
            }
        };

        let image_url = self.public_url(&stored.file_name);
        let (user, record) = self.store.award_and_record(
            user_id,
            self.settings.points_per_recognition,
            NewHistory {
                query_type: QueryType::Image,
                query_content: image_url.clone(),
                result_category: classification.label.clone(),
            },
        )?;

        tracing::info!(
            user_id,
            category = %classification.label,
            probability = classification.probability,
            "画像認識に成功しました"
        );

        Ok(ImageRecognition {
            category: classification.label,
            probability: classification.probability,
            image_url,
            history_id: record.id,
            points: user.points,
        })
    }

    /// 文字検索（履歴なし）
    pub fn search_text(&self, query: &str) -> Result<Vec<GarbageItem>, RecognitionError> {
        if query.trim().is_empty() {
            return Err(RecognitionError::EmptyQuery);
        }
        Ok(self.store.search_items(query, TEXT_SEARCH_LIMIT))
    }

    /// 文字認識（最初の一致を採用し、ポイント加算と履歴記録を行う）
    pub fn recognize_text(
        &self,
        user_id: u64,
        query: &str,
    ) -> Result<TextRecognition, RecognitionError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RecognitionError::EmptyQuery);
        }

        let item = self.store.search_items(query, 1).into_iter().next();
        let result_category = item
            .as_ref()
            .map(|i| i.category.clone())
            .unwrap_or_else(|| NOT_FOUND_CATEGORY.to_string());

        let (user, record) = self.store.award_and_record(
            user_id,
            self.settings.points_per_recognition,
            NewHistory {
                query_type: QueryType::Text,
                query_content: query.to_string(),
                result_category: result_category.clone(),
            },
        )?;

        Ok(TextRecognition {
            query: query.to_string(),
            item,
            result_category,
            history_id: record.id,
            points: user.points,
        })
    }
}
