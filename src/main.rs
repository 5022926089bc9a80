use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::sync::mpsc;

use spire_env::config::Config;
use spire_env::game::{ActionCatalog, Vocabulary};
use spire_env::service::{
    observation_size, relay, Bridge, LinearPolicy, MemoryRecorder, ObservationEncoder, Trainer,
    TrainerSettings, Worker, WorkerSettings,
};

// ============================================================================
// 命令列
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "spire_env", about = "Slay the Spire PPO agent")]
struct Cli {
    #[command(subcommand)]
    command: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// 連到各遊戲中繼，啟動 worker 與 trainer
    Train {
        /// JSON 設定檔
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// 由遊戲模組啟動的 stdin/stdout ↔ TCP 中繼
    Relay {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// 從這個埠開始往上找空埠
        #[arg(short, long, default_value_t = 9999)]
        port: u16,
        /// 等待 client 回覆的秒數
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
}

// ============================================================================
// 訓練
// ============================================================================

async fn train(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = Arc::new(ActionCatalog::build());
    let encoder = ObservationEncoder::new(Vocabulary::shared());
    let recorder = Arc::new(MemoryRecorder::new());
    let policy = LinearPolicy::load_or_new(
        &config.checkpoint_path,
        observation_size(),
        catalog.len(),
        config.learning_rate,
    )?;
    info!(
        "policy: {} observations, {} actions, {} parameters",
        observation_size(),
        catalog.len(),
        policy.parameter_count()
    );

    let (tx, rx) = mpsc::channel(config.workers * 2);
    let mut handles = Vec::with_capacity(config.workers);
    for id in 0..config.workers {
        let port = config.worker_port(id);
        let bridge = Bridge::connect((config.host.as_str(), port), config.read_timeout()).await?;
        info!("worker {}: connected to {}:{}", id, config.host, port);
        let worker = Worker::new(
            WorkerSettings::from_config(&config, id),
            bridge,
            policy.clone(),
            Arc::clone(&catalog),
            encoder.clone(),
            recorder.clone(),
            tx.clone(),
        );
        handles.push(worker.spawn());
    }
    drop(tx);

    let trainer = Trainer::new(TrainerSettings::from_config(&config), policy);
    let summary = trainer.run(rx).await?;
    info!(
        "training finished: {} rounds, {} updates, {} steps (completed: {})",
        summary.rounds, summary.updates, summary.steps, summary.completed
    );

    for handle in &handles {
        handle.abort();
    }
    if let Err(e) = recorder.save_json(&config.records_path) {
        warn!("cannot write records {}: {}", config.records_path.display(), e);
    }
    Ok(())
}

// ============================================================================
// 入口
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Mode::Train { config } => {
            let config = Config::load_or_default(config.as_deref())?;
            train(config).await?;
        }
        Mode::Relay {
            host,
            port,
            timeout_secs,
        } => {
            relay::run(&host, port, Duration::from_secs(timeout_secs)).await?;
        }
    }

    Ok(())
}
