//! チェックポイントの確認用バイナリ
//!
//! メタデータを表示し、画像が指定されていれば分類結果を表示する。

use std::path::PathBuf;

use burn_ndarray::{NdArray, NdArrayDevice};
use clap::Parser;
use garbage_sorter_lib::ml::{Classifier, ModelPaths};
use garbage_sorter_lib::model::{load_metadata, print_metadata_info, read_class_names, ModelSettings};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "inspect_model", about = "チェックポイントの内容確認と試し分類")]
struct Args {
    /// チェックポイント（tar.gz）
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// クラス名ファイル
    #[arg(long)]
    class_names: Option<PathBuf>,

    /// 分類する画像
    images: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("garbage_sorter=info".parse()?))
        .init();

    let args = Args::parse();
    let defaults = ModelSettings::default();
    let paths = ModelPaths::new(
        args.checkpoint.unwrap_or(defaults.checkpoint_path),
        args.class_names.unwrap_or(defaults.class_names_path),
    );

    println!("=== モデル確認 ===\n");

    let metadata = load_metadata(&paths.checkpoint)?;
    print_metadata_info(&metadata);

    match read_class_names(&paths.class_names) {
        Ok(names) => println!("クラス名ファイル: {} 件", names.len()),
        Err(e) => eprintln!("✗ クラス名ファイルを読めません: {}", e),
    }

    if args.images.is_empty() {
        return Ok(());
    }

    println!("\n{}\n", "=".repeat(50));

    let classifier = Classifier::<NdArray<f32>>::load(&paths, &NdArrayDevice::Cpu)?;
    for image in &args.images {
        match classifier.classify_image(image) {
            Ok(result) => println!(
                "✓ {}: {} ({:.1}%)",
                image.display(),
                result.label,
                result.probability * 100.0
            ),
            Err(e) => eprintln!("✗ {}: {}", image.display(), e),
        }
    }

    Ok(())
}
