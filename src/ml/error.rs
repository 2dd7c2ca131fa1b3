use thiserror::Error;

/// 分類パイプラインのエラー
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// チェックポイントまたはクラス名ファイルが無い、もしくは整合しない
    #[error("model load error: {0}")]
    ModelLoad(String),

    /// 画像として読み込めないアップロード
    #[error("image decode error: {0}")]
    ImageDecode(String),

    /// 順伝播中の想定外の失敗
    #[error("inference error: {0}")]
    Inference(String),
}

impl ClassifyError {
    /// 利用者側で直せるエラーか（画像の差し替えで解決する）
    pub fn is_user_correctable(&self) -> bool {
        matches!(self, ClassifyError::ImageDecode(_))
    }

    pub(crate) fn model_load(err: impl std::fmt::Display) -> Self {
        ClassifyError::ModelLoad(err.to_string())
    }

    pub(crate) fn inference(err: impl std::fmt::Debug) -> Self {
        ClassifyError::Inference(format!("{:?}", err))
    }
}

impl From<image::ImageError> for ClassifyError {
    fn from(err: image::ImageError) -> Self {
        ClassifyError::ImageDecode(err.to_string())
    }
}
