//! モデルメタデータを使用した推論設定
//!
//! チェックポイントのメタデータとクラス名ファイルを突き合わせ、推論に必要な情報をまとめます。

use std::path::Path;

use crate::ml::ClassifyError;
use crate::model::model_metadata::{ModelMetadata, ARCHITECTURE_RESNET18};
use crate::model::model_storage;

/// ImageNetの平均
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNetの標準偏差
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 推論用設定
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    /// 全クラスラベル（出力ロジット順）
    pub class_names: Vec<String>,

    /// ステム層のチャネル数
    pub base_channels: usize,

    /// 短辺のリサイズ先
    pub resize_size: u32,

    /// 中央切り出しサイズ
    pub crop_size: u32,

    /// チャネルごとの正規化パラメータ
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl InferenceConfig {
    /// メタデータとクラス名ファイルの内容からInferenceConfigを作成
    ///
    /// クラス名ファイル、`metadata.num_classes`、`metadata.class_names` の三者が
    /// 一致しない場合は `ModelLoad` エラー。
    pub fn from_metadata(
        metadata: &ModelMetadata,
        class_names: Vec<String>,
    ) -> Result<Self, ClassifyError> {
        if metadata.architecture != ARCHITECTURE_RESNET18 {
            return Err(ClassifyError::ModelLoad(format!(
                "unsupported architecture: {}",
                metadata.architecture
            )));
        }
        if class_names.is_empty() {
            return Err(ClassifyError::ModelLoad("class names file is empty".into()));
        }
        if class_names.len() != metadata.num_classes {
            return Err(ClassifyError::ModelLoad(format!(
                "class names file has {} labels but checkpoint declares {} classes",
                class_names.len(),
                metadata.num_classes
            )));
        }
        if !metadata.class_names.is_empty() && metadata.class_names != class_names {
            return Err(ClassifyError::ModelLoad(
                "class names file does not match the label order stored in the checkpoint".into(),
            ));
        }
        if metadata.crop_size == 0 || metadata.resize_size < metadata.crop_size {
            return Err(ClassifyError::ModelLoad(format!(
                "invalid input size: resize {} / crop {}",
                metadata.resize_size, metadata.crop_size
            )));
        }

        Ok(Self {
            class_names,
            base_channels: metadata.base_channels,
            resize_size: metadata.resize_size,
            crop_size: metadata.crop_size,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        })
    }

    /// チェックポイントとクラス名ファイルから推論設定を読み込む
    pub fn load(checkpoint_path: &Path, class_names_path: &Path) -> Result<Self, ClassifyError> {
        let class_names =
            model_storage::read_class_names(class_names_path).map_err(ClassifyError::model_load)?;
        let metadata =
            model_storage::load_metadata(checkpoint_path).map_err(ClassifyError::model_load)?;
        Self::from_metadata(&metadata, class_names)
    }

    /// クラス数
    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// クラスインデックスからラベルを取得
    pub fn class_index_to_label(&self, index: usize) -> Option<&str> {
        self.class_names.get(index).map(String::as_str)
    }

    /// ラベルからクラスインデックスを取得
    pub fn label_to_class_index(&self, label: &str) -> Option<usize> {
        self.class_names.iter().position(|l| l == label)
    }

    /// 設定情報をログに出力
    pub fn print_info(&self) {
        tracing::info!(
            classes = self.num_classes(),
            resize = self.resize_size,
            crop = self.crop_size,
            "推論設定: {}",
            self.class_names.join(", ")
        );
    }
}
