//! ごみ分別支援サービスのHTTPサーバー

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use garbage_sorter_lib::model::{AppConfig, DeviceType};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "garbage_sorter", version, about = "ごみ分別支援サービス")]
struct Cli {
    /// 設定ファイル（JSON）
    #[arg(long, env = "GARBAGE_SORTER_CONFIG")]
    config: Option<PathBuf>,

    /// 待ち受けアドレス（設定ファイルより優先）
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// 計算デバイス（設定ファイルより優先）
    #[arg(long, value_enum)]
    device: Option<DeviceType>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("garbage_sorter=info".parse()?))
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load_or_default(&config_path);
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Some(device) = cli.device {
        config.device_type = device;
    }
    config.display();

    garbage_sorter_lib::run(config).await.inspect_err(|e| {
        tracing::error!("サーバーが異常終了しました: {:#}", e);
    })
}
