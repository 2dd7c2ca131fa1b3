//! 機械学習モデルの共通定義
//!
//! ごみ画像分類用のResNet-18と、学習時と同一の前処理を提供します。

use std::path::Path;

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Tensor, TensorData},
};
use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageReader};

use crate::ml::ClassifyError;
use crate::model::InferenceConfig;

/// 各ステージのブロック数（ResNet-18）
const BLOCKS_PER_STAGE: usize = 2;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// ステム層のチャネル数（ステージ幅は 1x, 2x, 4x, 8x）
    #[config(default = 64)]
    pub base_channels: usize,
}

impl ModelConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet18<B> {
        let base = self.base_channels;

        // 各ステージ: 先頭ブロックのみ stride を持ち、残りは幅を維持
        let stage = |in_channels: usize, out_channels: usize, stride: usize| {
            (0..BLOCKS_PER_STAGE)
                .map(|block| {
                    if block == 0 {
                        BasicBlock::new(in_channels, out_channels, stride, device)
                    } else {
                        BasicBlock::new(out_channels, out_channels, 1, device)
                    }
                })
                .collect::<Vec<_>>()
        };

        ResNet18 {
            // Stem: 7x7 stride 2 + BN + ReLU + 3x3 stride 2 max pool
            conv1: Conv2dConfig::new([3, base], [7, 7])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(base).init(device),
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            layer1: stage(base, base, 1),
            layer2: stage(base, base * 2, 2),
            layer3: stage(base * 2, base * 4, 2),
            layer4: stage(base * 4, base * 8, 2),
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(base * 8, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

/// ショートカットの1x1畳み込み（解像度またはチャネル数が変わるブロック用）
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> Downsample<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// 基本残差ブロック: {Conv 3x3 + BN} x 2 + ショートカット
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B>,
    downsample: Option<Downsample<B>>,
    activation: Relu,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels).then(|| Downsample {
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
        });

        Self {
            conv1: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(out_channels).init(device),
            conv2: Conv2dConfig::new([out_channels, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            bn2: BatchNormConfig::new(out_channels).init(device),
            downsample,
            activation: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let out = self.conv1.forward(x);
        let out = self.bn1.forward(out);
        let out = self.activation.forward(out);
        let out = self.conv2.forward(out);
        let out = self.bn2.forward(out);

        self.activation.forward(out + identity)
    }
}

/// ごみ分類用ResNet-18
///
/// # アーキテクチャ
/// - Stem: Conv 7x7/2 + BN + ReLU + MaxPool 3x3/2
/// - 4ステージ x 2 BasicBlock（幅 base, 2base, 4base, 8base）
/// - Global Average Pooling
/// - FC: 8base -> num_classes
///
/// 非Autodiffバックエンドでは BatchNorm は移動平均統計を使う（推論モード）。
#[derive(Module, Debug)]
pub struct ResNet18<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    maxpool: MaxPool2d,
    layer1: Vec<BasicBlock<B>>,
    layer2: Vec<BasicBlock<B>>,
    layer3: Vec<BasicBlock<B>>,
    layer4: Vec<BasicBlock<B>>,
    avgpool: AdaptiveAvgPool2d,
    fc: Linear<B>,
    activation: Relu,
}

impl<B: Backend> ResNet18<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(images);
        let x = self.bn1.forward(x);
        let x = self.activation.forward(x);
        let x = self.maxpool.forward(x);

        let x = [&self.layer1, &self.layer2, &self.layer3, &self.layer4]
            .into_iter()
            .flatten()
            .fold(x, |x, block| block.forward(x));

        let x = self.avgpool.forward(x);
        let x: Tensor<B, 2> = x.flatten(1, 3);

        self.fc.forward(x)
    }

    /// 確率分布を計算
    ///
    /// # 戻り値
    /// - softmax後の確率 [batch_size, num_classes]
    pub fn probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 出力層の幅（重みから読み取る）
    pub fn num_classes(&self) -> usize {
        let [_, d_output] = self.fc.weight.val().dims();
        d_output
    }

    /// 分類ヘッドを固定値に置き換える（重みゼロ、バイアスのみ）
    ///
    /// 出力ロジットが入力に依存せず `bias` になる。
    #[cfg(test)]
    pub(crate) fn with_constant_head(mut self, bias: &[f32]) -> Self {
        use burn::module::Param;

        let device = self.fc.weight.val().device();
        let [d_input, d_output] = self.fc.weight.val().dims();
        assert_eq!(d_output, bias.len());

        self.fc.weight = Param::from_tensor(Tensor::zeros([d_input, d_output], &device));
        self.fc.bias = Some(Param::from_tensor(Tensor::<B, 1>::from_floats(bias, &device)));
        self
    }
}

/// 最大確率のクラスを選ぶ
///
/// 同値の場合は最小インデックス。空なら `None`。
pub fn top_class(probabilities: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &p) in probabilities.iter().enumerate() {
        match best {
            Some((_, best_p)) if p <= best_p => {}
            _ => best = Some((index, p)),
        }
    }
    best
}

/// 画像を読み込んで正規化
///
/// 短辺を `resize_size` にリサイズし、中央を `crop_size` 四方で切り出し、
/// ImageNetの平均と標準偏差で正規化します。
///
/// # 戻り値
/// - 正規化されたRGB画像データ (C, H, W) の順で平坦化
pub fn load_and_normalize_image(
    path: &Path,
    config: &InferenceConfig,
) -> Result<Vec<f32>, ClassifyError> {
    let img = ImageReader::open(path)
        .map_err(|e| ClassifyError::ImageDecode(format!("{}: {}", path.display(), e)))?
        .with_guessed_format()
        .map_err(|e| ClassifyError::ImageDecode(format!("{}: {}", path.display(), e)))?
        .decode()?;

    normalize_image(&img, config)
}

/// デコード済み画像を正規化
pub fn normalize_image(
    img: &DynamicImage,
    config: &InferenceConfig,
) -> Result<Vec<f32>, ClassifyError> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(ClassifyError::ImageDecode(format!(
            "画像サイズが不正です: {}x{}",
            width, height
        )));
    }

    let rgb = img.to_rgb8();

    // 短辺を resize_size に揃え、長辺は比率を保って切り捨て
    let short = config.resize_size as u64;
    let (new_width, new_height) = if width <= height {
        (short as u32, (short * height as u64 / width as u64) as u32)
    } else {
        ((short * width as u64 / height as u64) as u32, short as u32)
    };
    let resized = image::imageops::resize(&rgb, new_width, new_height, FilterType::Triangle);

    // .5 は偶数側へ丸める（torchvision の CenterCrop と同じ）
    let crop = config.crop_size;
    let left = ((new_width - crop) as f64 / 2.0).round_ties_even() as u32;
    let top = ((new_height - crop) as f64 / 2.0).round_ties_even() as u32;
    let cropped = image::imageops::crop_imm(&resized, left, top, crop, crop).to_image();

    let mut data = Vec::with_capacity(3 * (crop * crop) as usize);
    for channel in 0..3 {
        for y in 0..crop {
            for x in 0..crop {
                let value = cropped.get_pixel(x, y)[channel] as f32 / 255.0;
                data.push((value - config.mean[channel]) / config.std[channel]);
            }
        }
    }

    Ok(data)
}

/// 正規化済みデータをバッチ1のテンソル [1, 3, crop, crop] に変換
pub fn image_tensor<B: Backend>(data: Vec<f32>, crop_size: u32, device: &B::Device) -> Tensor<B, 4> {
    let crop = crop_size as usize;
    Tensor::from_data(TensorData::new(data, [1, 3, crop, crop]), device)
}

/// 画像ファイルを前処理してテンソルにする
pub fn preprocess<B: Backend>(
    path: &Path,
    config: &InferenceConfig,
    device: &B::Device,
) -> Result<Tensor<B, 4>, ClassifyError> {
    let data = load_and_normalize_image(path, config)?;
    Ok(image_tensor(data, config.crop_size, device))
}
