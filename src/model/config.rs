//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、モデルファイル、HTTPサーバー、ポイント付与などをJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum DeviceType {
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
    /// WGPU (GPU) バックエンド（`gpu` feature が必要）
    Wgpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// チェックポイント（tar.gz）のパス
    pub checkpoint_path: PathBuf,
    /// クラス名ファイルのパス
    pub class_names_path: PathBuf,
    /// 起動時にモデルを読み込む（失敗したら起動を中止）
    #[serde(default = "default_true")]
    pub eager_load: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            checkpoint_path: PathBuf::from("model/garbage_classifier_resnet18.tar.gz"),
            class_names_path: PathBuf::from("model/class_names.txt"),
            eager_load: true,
        }
    }
}

/// HTTPサーバー設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// 待ち受けアドレス
    pub bind_address: SocketAddr,
    /// アップロード画像の保存先
    pub upload_dir: PathBuf,
    /// 保存した画像を公開するURLの接頭辞
    pub public_base_url: String,
    /// リクエストボディの上限（バイト）
    pub max_upload_bytes: usize,
    /// 推論1回あたりのタイムアウト（秒）
    pub inference_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 5000)),
            upload_dir: PathBuf::from("static/uploads"),
            public_base_url: "http://127.0.0.1:5000/static/uploads".to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
            inference_timeout_secs: 30,
        }
    }
}

/// ポイント付与設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointSettings {
    /// 認識成功1回あたりの付与ポイント
    pub per_recognition: i64,
}

impl Default for PointSettings {
    fn default() -> Self {
        Self { per_recognition: 1 }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// モデル設定
    #[serde(default)]
    pub model: ModelSettings,
    /// HTTPサーバー設定
    #[serde(default)]
    pub server: ServerSettings,
    /// ポイント設定
    #[serde(default)]
    pub points: PointSettings,
    /// ごみ品目カタログ（JSON）のパス
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    /// 景品カタログ（JSON）のパス
    #[serde(default)]
    pub rewards_path: Option<PathBuf>,
    /// 起動時に作成する管理者のユーザー名
    #[serde(default)]
    pub admins: Vec<String>,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 指定パスから設定を読み込む、存在しない場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    tracing::info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            tracing::info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定情報をログに出力
    pub fn display(&self) {
        tracing::info!("計算デバイス: {}", self.device_type);
        tracing::info!("チェックポイント: {}", self.model.checkpoint_path.display());
        tracing::info!("クラス名ファイル: {}", self.model.class_names_path.display());
        tracing::info!("待ち受け: {}", self.server.bind_address);
        tracing::info!("アップロード先: {}", self.server.upload_dir.display());
        tracing::info!("推論タイムアウト: {}秒", self.server.inference_timeout_secs);
        tracing::info!("付与ポイント: {}", self.points.per_recognition);
        if let Some(ref catalog) = self.catalog_path {
            tracing::info!("品目カタログ: {}", catalog.display());
        }
        if let Some(ref rewards) = self.rewards_path {
            tracing::info!("景品カタログ: {}", rewards.display());
        }
        if !self.admins.is_empty() {
            tracing::info!("管理者: {}", self.admins.join(", "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Cpu);
        assert_eq!(config.points.per_recognition, 1);
        assert!(config.model.eager_load);
        assert_eq!(config.server.bind_address.port(), 5000);
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.device_type, deserialized.device_type);
        assert_eq!(config.model.checkpoint_path, deserialized.model.checkpoint_path);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "points": { "per_recognition": 5 } }"#).unwrap();
        assert_eq!(config.points.per_recognition, 5);
        assert_eq!(config.server.max_upload_bytes, 10 * 1024 * 1024);
        assert!(config.admins.is_empty());
        assert!(config.rewards_path.is_none());
    }

    #[test]
    fn test_admins_from_file() {
        let config: AppConfig = serde_json::from_str(r#"{ "admins": ["root", "ops"] }"#).unwrap();
        assert_eq!(config.admins, vec!["root".to_string(), "ops".to_string()]);
    }

    #[test]
    fn test_load_or_default_with_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ broken").unwrap();

        let config = AppConfig::load_or_default(&path);
        assert_eq!(config.device_type, DeviceType::Cpu);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.catalog_path = Some(PathBuf::from("catalog.json"));
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.catalog_path, Some(PathBuf::from("catalog.json")));
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }
}
