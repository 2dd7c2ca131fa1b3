//! 学習済みモデルの書き出し
//!
//! チェックポイントとクラス名ファイルは必ず同時に書き出す。

use anyhow::{Context, Result};
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};

use crate::ml::{ModelPaths, ResNet18};
use crate::model::{save_model_with_metadata, write_class_names, ModelMetadata};

/// モデルをチェックポイント（tar.gz）とクラス名ファイルに保存
///
/// FullPrecisionSettings で f32 のまま保存する。
pub fn export_model<B: Backend>(
    model: ResNet18<B>,
    metadata: &ModelMetadata,
    paths: &ModelPaths,
) -> Result<()> {
    if model.num_classes() != metadata.num_classes
        || metadata.class_names.len() != metadata.num_classes
    {
        anyhow::bail!(
            "出力層の幅 {} とクラス数 {}（ラベル {} 個）が一致しません",
            model.num_classes(),
            metadata.num_classes,
            metadata.class_names.len()
        );
    }

    let model_binary = BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みのシリアライズエラー: {:?}", e))?;

    save_model_with_metadata(&paths.checkpoint, metadata, &model_binary)
        .context("Failed to write checkpoint")?;
    write_class_names(&paths.class_names, &metadata.class_names)?;

    tracing::info!(
        checkpoint = %paths.checkpoint.display(),
        bytes = model_binary.len(),
        "モデルを保存しました"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::testing::{TestBackend, FIXTURE_LABELS};
    use crate::ml::ModelConfig;
    use crate::model::{load_metadata, read_class_names};
    use burn_ndarray::NdArrayDevice;

    #[test]
    fn test_export_writes_archive_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let labels: Vec<String> = FIXTURE_LABELS.iter().map(|s| s.to_string()).collect();
        let model = ModelConfig::new(3)
            .with_base_channels(4)
            .init::<TestBackend>(&NdArrayDevice::Cpu);
        let metadata = ModelMetadata::new(labels.clone(), 4, 7);
        let paths = ModelPaths::new(dir.path().join("m.tar.gz"), dir.path().join("c.txt"));

        export_model(model, &metadata, &paths).unwrap();

        assert_eq!(read_class_names(&paths.class_names).unwrap(), labels);
        assert_eq!(load_metadata(&paths.checkpoint).unwrap().num_epochs, 7);
    }

    #[test]
    fn test_export_rejects_mismatched_head() {
        let dir = tempfile::tempdir().unwrap();
        let model = ModelConfig::new(2)
            .with_base_channels(4)
            .init::<TestBackend>(&NdArrayDevice::Cpu);
        let metadata = ModelMetadata::new(vec!["a".into(), "b".into(), "c".into()], 4, 1);
        let paths = ModelPaths::new(dir.path().join("m.tar.gz"), dir.path().join("c.txt"));

        assert!(export_model(model, &metadata, &paths).is_err());
        assert!(!paths.checkpoint.exists());
    }
}
