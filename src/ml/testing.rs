//! テスト用の小さなモデルと画像

use std::path::{Path, PathBuf};

use burn_ndarray::{NdArray, NdArrayDevice};
use image::{Rgb, RgbImage};

use crate::ml::{export_model, ModelConfig, ModelPaths};
use crate::model::ModelMetadata;

pub type TestBackend = NdArray<f32>;

pub const FIXTURE_LABELS: [&str; 3] = ["battery", "cardboard", "glass"];

/// 幅4チャネル・入力32pxのResNet-18を書き出す
///
/// 分類ヘッドは重みゼロで、ロジットは常に `head_bias` になる。
pub fn write_fixture_model(dir: &Path, head_bias: &[f32]) -> ModelPaths {
    let device = NdArrayDevice::Cpu;
    let labels: Vec<String> = FIXTURE_LABELS.iter().map(|s| s.to_string()).collect();

    let model = ModelConfig::new(labels.len())
        .with_base_channels(4)
        .init::<TestBackend>(&device)
        .with_constant_head(head_bias);
    let metadata = ModelMetadata::new(labels, 4, 1).with_input_size(36, 32);

    let paths = ModelPaths::new(
        dir.join("model/garbage_classifier_resnet18.tar.gz"),
        dir.join("model/class_names.txt"),
    );
    export_model(model, &metadata, &paths).unwrap();
    paths
}

/// 縦長のグラデーション画像を保存
pub fn write_photo(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    let img = RgbImage::from_fn(48, 64, |x, y| Rgb([(x * 5) as u8, (y * 3) as u8, 120]));
    img.save(&path).unwrap();
    path
}
