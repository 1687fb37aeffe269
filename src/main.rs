//! PoolSettler - settlement service for prediction pools
//!
//! Usage:
//!   poolsettler                        run sweeps on an interval until Ctrl-C
//!   poolsettler settle <chain> <id>    settle one pool and exit

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use poolsettler::config::AppConfig;
use poolsettler::ledger::LedgerClient;
use poolsettler::notify::{FileChannelRegistry, NotificationFanout, NotificationWorker, WebhookNotifier};
use poolsettler::oracle::HermesClient;
use poolsettler::persistence::{ArchiveStore, FileArchiveStore, SettlementAuditLog};
use poolsettler::queue::{JobQueue, SpoolJobQueue};
use poolsettler::seeds::StakeTiers;
use poolsettler::settlement::{
    parse_pool_id, ChainPipeline, Orchestrator, OrchestratorSettings, Scheduler,
};
use poolsettler::types::unix_now;

enum Command {
    Run,
    Settle { chain: String, pool_id: String },
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => Ok(Command::Run),
        [cmd, chain, pool_id] if cmd == "settle" => Ok(Command::Settle {
            chain: chain.clone(),
            pool_id: pool_id.clone(),
        }),
        _ => bail!("usage: poolsettler [settle <chain> <pool_id>]"),
    }
}

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

struct Service {
    scheduler: Scheduler,
    worker: Option<NotificationWorker>,
}

async fn build_service(config: &AppConfig) -> Result<Service> {
    let private_key = if config.service.dry_run {
        // Reads still need a signer-backed client; any well-formed key will do
        config
            .admin_private_key()
            .unwrap_or_else(|_| format!("0x{}", "11".repeat(32)))
    } else {
        config.admin_private_key()?
    };

    let oracle = Arc::new(
        HermesClient::new(
            &config.oracle.hermes_url,
            Duration::from_millis(config.oracle.timeout_ms),
        )
        .context("Failed to build oracle client")?,
    );
    let archive: Arc<dyn ArchiveStore> = Arc::new(FileArchiveStore::new(&config.archive.data_dir));
    let queue: Arc<dyn JobQueue> = Arc::new(
        SpoolJobQueue::open(&config.queue.spool_dir, config.queue.max_attempts)
            .await
            .context("Failed to open job spool")?,
    );
    let audit = (!config.archive.audit_csv.is_empty())
        .then(|| Arc::new(SettlementAuditLog::new(&config.archive.audit_csv)));

    let settings = OrchestratorSettings {
        page_size: config.ledger.prediction_page_size,
        dry_run: config.service.dry_run,
        job_name: config.queue.job_name.clone(),
    };

    let mut scheduler = Scheduler::new(config.markets.classes());
    for chain in &config.chains {
        let ledger = Arc::new(
            LedgerClient::new(chain, &config.ledger, &private_key)
                .with_context(|| format!("Failed to build ledger client for {}", chain.name))?,
        );
        let mut orchestrator = Orchestrator::new(
            ledger,
            oracle.clone(),
            archive.clone(),
            queue.clone(),
            settings.clone(),
        );
        if let Some(audit) = &audit {
            orchestrator = orchestrator.with_audit_log(audit.clone());
        }
        let tiers = StakeTiers {
            stake_asset: chain.stake_token_address()?,
            amounts: chain.stake_tiers()?,
        };
        scheduler = scheduler.with_chain(ChainPipeline::new(orchestrator, tiers));
    }

    let worker = if config.notifications.enabled && !config.service.dry_run {
        let channels = Arc::new(FileChannelRegistry::load(Path::new(
            &config.notifications.channels_file,
        ))?);
        let notifier = Arc::new(WebhookNotifier::new(
            Duration::from_millis(config.notifications.timeout_ms),
            config.webhook_secret(),
        )?);
        let mut fanout = NotificationFanout::new(archive.clone(), channels, notifier);
        for chain in &config.chains {
            fanout = fanout.with_token_decimals(&chain.name, chain.stake_token_decimals);
        }
        Some(NotificationWorker::new(queue.clone(), fanout))
    } else {
        None
    };

    Ok(Service { scheduler, worker })
}

async fn run_loop(service: &Service, interval_secs: u64) -> Result<()> {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = service.scheduler.sweep(unix_now()).await?;
                if report.failed > 0 {
                    warn!(failed = report.failed, "Sweep finished with failed seeds");
                }
                if let Some(worker) = &service.worker {
                    match worker.drain().await {
                        Ok(drained) if drained.completed + drained.failed > 0 => {
                            info!(completed = drained.completed, failed = drained.failed, "Notification queue drained");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Notification drain failed"),
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Shutdown requested");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let command = parse_args()?;
    let config = AppConfig::load()?;
    init_tracing(&config.service.log_format);

    info!("🚀 PoolSettler {} starting", config.service.tag);
    info!("Config: {}", config.digest());
    if config.chains.is_empty() {
        warn!("No chains configured");
    }

    let service = build_service(&config).await?;

    match command {
        Command::Run => run_loop(&service, config.service.sweep_interval_secs).await,
        Command::Settle { chain, pool_id } => {
            let pool_id = parse_pool_id(&pool_id)?;
            let outcome = service
                .scheduler
                .settle_direct(&chain, pool_id, unix_now())
                .await?;
            info!(chain = %chain, pool_id = pool_id, outcome = outcome.label(), "Direct settlement finished");
            if let Some(worker) = &service.worker {
                worker.drain().await?;
            }
            Ok(())
        }
    }
}
