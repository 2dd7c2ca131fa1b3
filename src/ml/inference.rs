//! モデル推論機能
//!
//! - [`Classifier`]: 読み込み済みのネットワークとクラス名を保持する不変オブジェクト
//! - [`ModelLoader`]: 初回利用時に一度だけ読み込み、以降は同じインスタンスを共有する

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use serde::Serialize;

use crate::ml::ml_model::{preprocess, top_class, ModelConfig, ResNet18, ResNet18Record};
use crate::ml::ClassifyError;
use crate::model::{load_model_with_metadata, read_class_names, InferenceConfig, ModelSettings};

/// モデルファイルの場所
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    /// チェックポイント（tar.gz: metadata.json + model.bin）
    pub checkpoint: PathBuf,
    /// クラス名ファイル（1行1ラベル）
    pub class_names: PathBuf,
}

impl ModelPaths {
    pub fn new(checkpoint: impl Into<PathBuf>, class_names: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint: checkpoint.into(),
            class_names: class_names.into(),
        }
    }
}

impl From<&ModelSettings> for ModelPaths {
    fn from(settings: &ModelSettings) -> Self {
        Self::new(&settings.checkpoint_path, &settings.class_names_path)
    }
}

/// 分類結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    /// 最大確率のクラス名
    pub label: String,
    /// そのクラスのsoftmax確率 [0, 1]
    pub probability: f64,
    /// 出力ロジットのインデックス
    pub class_index: usize,
}

/// 画像分類器
///
/// 読み込み後は変更されない。`burn` のモジュールは `Sync` ではないため Mutex で包む。
/// そのため同じ `Classifier` への推論呼び出しは1件ずつ直列に実行される。
/// 並列に推論したい場合は `Classifier` を複数読み込む必要がある。
pub struct Classifier<B: Backend> {
    model: Mutex<ResNet18<B>>,
    config: InferenceConfig,
    device: B::Device,
}

impl<B: Backend> Classifier<B> {
    /// モデルを読み込んで分類器を初期化
    ///
    /// クラス名ファイル、メタデータ、重みの出力幅がすべて一致しない場合は `ModelLoad`。
    pub fn load(paths: &ModelPaths, device: &B::Device) -> Result<Self, ClassifyError> {
        let class_names = read_class_names(&paths.class_names).map_err(ClassifyError::model_load)?;
        let (metadata, model_binary) =
            load_model_with_metadata(&paths.checkpoint).map_err(ClassifyError::model_load)?;

        let config = InferenceConfig::from_metadata(&metadata, class_names)?;

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record: ResNet18Record<B> = recorder
            .load(model_binary, device)
            .map_err(|e| ClassifyError::ModelLoad(format!("モデル重みの読み込みエラー: {:?}", e)))?;

        // 重みを載せる前に出力層の幅を確認する
        let [_, output_width] = record.fc.weight.val().dims();
        if output_width != config.num_classes() {
            return Err(ClassifyError::ModelLoad(format!(
                "checkpoint output layer has {} classes but {} class names were given",
                output_width,
                config.num_classes()
            )));
        }

        let model = ModelConfig::new(config.num_classes())
            .with_base_channels(config.base_channels)
            .init::<B>(device)
            .load_record(record);

        tracing::info!(
            checkpoint = %paths.checkpoint.display(),
            classes = config.num_classes(),
            "画像分類モデルを読み込みました"
        );

        Ok(Self::from_parts(model, config, device.clone()))
    }

    /// 構築済みのモデルから分類器を作る
    pub fn from_parts(model: ResNet18<B>, config: InferenceConfig, device: B::Device) -> Self {
        Self {
            model: Mutex::new(model),
            config,
            device,
        }
    }

    /// 全クラスの確率分布を計算
    ///
    /// 非Autodiffバックエンドのため勾配は記録されない。
    pub fn predict_distribution(&self, input: Tensor<B, 4>) -> Result<Vec<f32>, ClassifyError> {
        let probabilities = {
            let model = self
                .model
                .lock()
                .map_err(|e| ClassifyError::Inference(format!("model lock poisoned: {}", e)))?;
            model.probabilities(input)
        };

        let probabilities = probabilities
            .into_data()
            .to_vec::<f32>()
            .map_err(ClassifyError::inference)?;

        if probabilities.len() != self.config.num_classes() {
            return Err(ClassifyError::Inference(format!(
                "expected {} outputs, got {}",
                self.config.num_classes(),
                probabilities.len()
            )));
        }

        Ok(probabilities)
    }

    /// 予測を実行（最大確率のクラスとその確率）
    pub fn predict(&self, input: Tensor<B, 4>) -> Result<Classification, ClassifyError> {
        let probabilities = self.predict_distribution(input)?;

        let (class_index, probability) = top_class(&probabilities)
            .ok_or_else(|| ClassifyError::Inference("empty model output".into()))?;
        if !probability.is_finite() {
            return Err(ClassifyError::Inference(format!(
                "non-finite probability for class {}",
                class_index
            )));
        }

        let label = self
            .config
            .class_index_to_label(class_index)
            .ok_or_else(|| {
                ClassifyError::Inference(format!("クラスインデックス {} は範囲外です", class_index))
            })?
            .to_string();

        Ok(Classification {
            label,
            probability: probability as f64,
            class_index,
        })
    }

    /// 単一画像を分類
    pub fn classify_image<P: AsRef<Path>>(&self, image_path: P) -> Result<Classification, ClassifyError> {
        let input = preprocess::<B>(image_path.as_ref(), &self.config, &self.device)?;
        let result = self.predict(input)?;

        tracing::debug!(
            path = %image_path.as_ref().display(),
            label = %result.label,
            probability = result.probability,
            "画像を分類しました"
        );

        Ok(result)
    }

    /// 複数画像を順に分類
    pub fn classify_batch(
        &self,
        image_paths: &[impl AsRef<Path>],
    ) -> Result<Vec<Classification>, ClassifyError> {
        image_paths
            .iter()
            .map(|path| self.classify_image(path))
            .collect()
    }

    /// InferenceConfigへの参照を取得
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }
}

/// 分類器の遅延ローダー
///
/// 初回の [`ModelLoader::ensure_loaded`] で読み込み、プロセス終了まで保持する。
/// 同時に初回呼び出しが来ても読み込みは1回で、全員が同じインスタンスを受け取る。
/// 読み込み失敗はキャッシュしない（次の呼び出しで再試行する）。
pub struct ModelLoader<B: Backend> {
    paths: ModelPaths,
    device: B::Device,
    classifier: OnceLock<Arc<Classifier<B>>>,
    init_lock: Mutex<()>,
}

impl<B: Backend> ModelLoader<B> {
    pub fn new(paths: ModelPaths, device: B::Device) -> Self {
        Self {
            paths,
            device,
            classifier: OnceLock::new(),
            init_lock: Mutex::new(()),
        }
    }

    /// 読み込み済みならそのまま返し、未読み込みなら一度だけ読み込む
    pub fn ensure_loaded(&self) -> Result<Arc<Classifier<B>>, ClassifyError> {
        if let Some(classifier) = self.classifier.get() {
            return Ok(Arc::clone(classifier));
        }

        let _guard = self
            .init_lock
            .lock()
            .map_err(|e| ClassifyError::ModelLoad(format!("loader lock poisoned: {}", e)))?;

        // ロック待ちの間に他スレッドが読み込んでいる可能性がある
        if let Some(classifier) = self.classifier.get() {
            return Ok(Arc::clone(classifier));
        }

        let classifier = Arc::new(Classifier::load(&self.paths, &self.device)?);
        let _ = self.classifier.set(Arc::clone(&classifier));
        Ok(classifier)
    }

    /// 読み込み済みか
    pub fn is_loaded(&self) -> bool {
        self.classifier.get().is_some()
    }

    pub fn paths(&self) -> &ModelPaths {
        &self.paths
    }

    /// 画像を分類（エラー種別つき）
    pub fn try_classify_image<P: AsRef<Path>>(
        &self,
        image_path: P,
    ) -> Result<Classification, ClassifyError> {
        self.ensure_loaded()?.classify_image(image_path)
    }

    /// 画像を分類（失敗時は `(None, None)`）
    ///
    /// エラーはログに残し、呼び出し元には返さない。
    pub fn classify_image<P: AsRef<Path>>(&self, image_path: P) -> (Option<String>, Option<f64>) {
        match self.try_classify_image(image_path.as_ref()) {
            Ok(result) => (Some(result.label), Some(result.probability)),
            Err(e) => {
                tracing::error!(
                    path = %image_path.as_ref().display(),
                    "画像分類中にエラーが発生しました: {}",
                    e
                );
                (None, None)
            }
        }
    }
}
