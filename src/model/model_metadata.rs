//! モデルメタデータの定義と永続化
//!
//! tar.gz形式でモデルと関連するメタデータを保存・読み込みします。
//!
//! ## クラス順序
//! - `class_names[i]` はネットワーク出力ロジット `i` に対応する
//! - 重みとクラス名は必ず同じアーカイブに保存し、ずれを防ぐ

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 対応しているアーキテクチャ名
pub const ARCHITECTURE_RESNET18: &str = "resnet18";

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// ネットワーク構造（常に "resnet18"）
    pub architecture: String,

    /// 全クラスラベル（出力ロジット順）
    /// 例: ["battery", "cardboard", "glass"]
    pub class_names: Vec<String>,

    /// 出力層の幅
    pub num_classes: usize,

    /// ステム層のチャネル数（標準ResNet-18は64）
    #[serde(default = "default_base_channels")]
    pub base_channels: usize,

    /// 短辺のリサイズ先（ピクセル）
    #[serde(default = "default_resize_size")]
    pub resize_size: u32,

    /// 中央切り出しサイズ（正方形、ピクセル）
    #[serde(default = "default_crop_size")]
    pub crop_size: u32,

    /// 学習エポック数
    pub num_epochs: u32,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

fn default_base_channels() -> usize {
    64
}

fn default_resize_size() -> u32 {
    256
}

fn default_crop_size() -> u32 {
    224
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    ///
    /// 入力サイズは学習時の検証用前処理（256 → 224）を使用します。
    pub fn new(class_names: Vec<String>, base_channels: usize, num_epochs: u32) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            architecture: ARCHITECTURE_RESNET18.to_string(),
            num_classes: class_names.len(),
            class_names,
            base_channels,
            resize_size: default_resize_size(),
            crop_size: default_crop_size(),
            num_epochs,
            trained_at,
        }
    }

    /// 入力サイズを変更
    pub fn with_input_size(mut self, resize_size: u32, crop_size: u32) -> Self {
        self.resize_size = resize_size;
        self.crop_size = crop_size;
        self
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
