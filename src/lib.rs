//! ごみ分別支援サービス
//!
//! ResNet-18 による画像分類と、品目カタログによる文字検索を HTTP API で提供する。

pub mod model;
pub mod ml;
pub mod recognition;
pub mod server;

use std::sync::Arc;

use anyhow::{Context, Result};
use burn::tensor::backend::Backend;

use crate::ml::{ModelLoader, ModelPaths};
use crate::model::{AppConfig, DeviceType};
use crate::recognition::{MemoryStore, RecognitionService, RecognitionSettings, Role};
use crate::server::AppState;

/// 設定に従ってサーバーを起動する
pub async fn run(config: AppConfig) -> Result<()> {
    match config.device_type {
        DeviceType::Cpu => {
            serve_with::<burn_ndarray::NdArray<f32>>(config, burn_ndarray::NdArrayDevice::Cpu).await
        }
        #[cfg(feature = "gpu")]
        DeviceType::Wgpu => {
            serve_with::<burn_wgpu::Wgpu>(config, burn_wgpu::WgpuDevice::DiscreteGpu(0)).await
        }
        #[cfg(not(feature = "gpu"))]
        DeviceType::Wgpu => {
            tracing::warn!("gpu 機能なしでビルドされているため CPU で推論します");
            serve_with::<burn_ndarray::NdArray<f32>>(config, burn_ndarray::NdArrayDevice::Cpu).await
        }
    }
}

/// 共有状態を組み立てる
///
/// `eager_load` ならここでモデルを読み込み、失敗したらエラーを返す。
/// 管理者は設定の `admins` からのみ作られる。
pub fn build_state<B: Backend>(config: &AppConfig, device: B::Device) -> Result<AppState<B>> {
    let store = MemoryStore::new();
    if let Some(catalog_path) = &config.catalog_path {
        store
            .load_catalog(catalog_path)
            .context("品目カタログの読み込みに失敗しました")?;
    }
    if let Some(rewards_path) = &config.rewards_path {
        store
            .load_rewards(rewards_path)
            .context("景品カタログの読み込みに失敗しました")?;
    }
    for name in &config.admins {
        let admin = store
            .register_user(name, Role::Admin)
            .with_context(|| format!("管理者を作成できません: {}", name))?;
        tracing::info!(user_id = admin.id, "管理者を作成しました: {}", admin.username);
    }

    let loader = ModelLoader::<B>::new(ModelPaths::from(&config.model), device);
    if config.model.eager_load {
        let classifier = loader
            .ensure_loaded()
            .context("モデルの読み込みに失敗しました")?;
        classifier.config().print_info();
    }

    std::fs::create_dir_all(&config.server.upload_dir).with_context(|| {
        format!(
            "アップロード先を作成できません: {}",
            config.server.upload_dir.display()
        )
    })?;

    let service = RecognitionService::new(
        Arc::new(loader),
        Arc::new(store),
        RecognitionSettings::from(config),
    );
    Ok(AppState::new(service))
}

async fn serve_with<B: Backend>(config: AppConfig, device: B::Device) -> Result<()> {
    tracing::info!("デバイス: {}", config.device_type);
    let state = build_state::<B>(&config, device)?;
    server::serve(state, config.server.bind_address, config.server.max_upload_bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::testing::{write_fixture_model, TestBackend};
    use burn_ndarray::NdArrayDevice;

    fn config_for(dir: &std::path::Path) -> AppConfig {
        let paths = write_fixture_model(dir, &[1.0, 0.0, 0.0]);
        let mut config = AppConfig::default();
        config.model.checkpoint_path = paths.checkpoint;
        config.model.class_names_path = paths.class_names;
        config.server.upload_dir = dir.join("uploads");
        config
    }

    #[test]
    fn test_build_state_eager_loads_model() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());

        let state = build_state::<TestBackend>(&config, NdArrayDevice::Cpu).unwrap();
        assert!(state.service.loader().is_loaded());
        assert!(dir.path().join("uploads").is_dir());
    }

    #[test]
    fn test_build_state_fails_fast_on_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(dir.path());
        config.model.checkpoint_path = dir.path().join("missing.tar.gz");

        assert!(build_state::<TestBackend>(&config, NdArrayDevice::Cpu).is_err());

        config.model.eager_load = false;
        let state = build_state::<TestBackend>(&config, NdArrayDevice::Cpu).unwrap();
        assert!(!state.service.loader().is_loaded());
    }

    #[test]
    fn test_build_state_loads_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(dir.path());
        let catalog = dir.path().join("catalog.json");
        std::fs::write(
            &catalog,
            r#"[{"name": "Newspaper", "category": "recyclable"}]"#,
        )
        .unwrap();
        config.catalog_path = Some(catalog);

        let state = build_state::<TestBackend>(&config, NdArrayDevice::Cpu).unwrap();
        assert_eq!(state.service.store().catalog_len(), 1);
    }

    #[test]
    fn test_build_state_seeds_admins_and_rewards() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(dir.path());
        let rewards = dir.path().join("rewards.json");
        std::fs::write(&rewards, r#"[{"name": "Tote bag", "points_cost": 3, "stock": 2}]"#)
            .unwrap();
        config.rewards_path = Some(rewards);
        config.admins = vec!["root".into()];

        let state = build_state::<TestBackend>(&config, NdArrayDevice::Cpu).unwrap();
        let store = state.service.store();
        let users = store.list_users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "root");
        assert!(users[0].is_admin());
        assert_eq!(store.available_rewards().len(), 1);

        config.admins = vec!["root".into(), "root".into()];
        assert!(build_state::<TestBackend>(&config, NdArrayDevice::Cpu).is_err());
    }
}
