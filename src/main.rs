use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use remu_radio::{Command, PlayerSettings, PlayerState, RadioConfig, RadioController, StreamPlayer};

/// 终端网络电台播放器
#[derive(Parser, Debug)]
#[command(name = "remu-radio", version, about)]
struct Args {
    /// TOML 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// 覆盖电台流地址
    #[arg(short, long)]
    url: Option<String>,
    /// 初始音量 (0..=1)
    #[arg(long)]
    volume: Option<f32>,
    /// 启动时不自动播放
    #[arg(long)]
    no_autoplay: bool,
    #[arg(long)]
    max_retries: Option<u32>,
    #[arg(long)]
    retry_delay_ms: Option<u64>,
}

fn load_config(args: &Args) -> Result<RadioConfig> {
    let mut config = match args.config {
        Some(ref path) => RadioConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => RadioConfig::default(),
    };

    if let Some(ref url) = args.url {
        config.stream_url = url.clone();
    }
    if let Some(volume) = args.volume {
        config.volume = volume;
    }
    if args.no_autoplay {
        config.autoplay = false;
    }
    if let Some(max_retries) = args.max_retries {
        config.retry.max_retries = max_retries;
    }
    if let Some(delay) = args.retry_delay_ms {
        config.retry.base_delay_ms = delay;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn render(state: &PlayerState) {
    let mut line = format!(
        "[{}] 音量: {:.0}%{}",
        state.status,
        state.volume * 100.0,
        if state.muted { " (静音)" } else { "" }
    );
    if state.autoplay_blocked {
        line.push_str(" | 按 p 开始播放");
    }
    if state.retry_count > 0 {
        line.push_str(&format!(" | 重试 {}", state.retry_count));
    }
    if let Some(message) = state.message {
        line.push_str(" | ");
        line.push_str(message);
    }
    println!("{}", line);
}

/// 读取标准输入并转换为命令
fn spawn_input(tx: mpsc::Sender<Command>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match Command::parse(&line) {
                Some(command) => {
                    if tx.send(command).await.is_err() {
                        break;
                    }
                }
                None => println!("命令: p/空格 播放暂停, +/- 音量, v <0..1>, m 静音, s 状态, q 退出"),
            }
        }
        debug!("stdin closed");
        let _ = tx.send(Command::Quit).await;
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("remu_radio=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    info!(url = %config.stream_url, "starting radio");

    let player = StreamPlayer::new(PlayerSettings::from(&config));
    let mut controller = RadioController::new(player, &config);
    controller.set_observer(render);

    let (tx, rx) = mpsc::channel(16);
    spawn_input(tx.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(Command::Quit).await;
        }
    });

    controller.run(rx).await;
    Ok(())
}
