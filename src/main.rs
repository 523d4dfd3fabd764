use anyhow::Context;
use sipbridge::application::{claim_new_call, refuse_unattached};
use sipbridge::config::Config;
use sipbridge::infrastructure::metrics::init_metrics;
use sipbridge::infrastructure::protocols::sip::{
    CallTable, EngineParams, MessageTransport, UdpTransport,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref()).context("loading configuration")?;
    config.validate().context("validating configuration")?;

    // Initialize tracing; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting sipbridge");
    info!("Configuration loaded: {:?}", config);

    if let Some(bind) = &config.metrics.bind {
        let addr: SocketAddr = bind
            .parse()
            .with_context(|| format!("metrics bind address {}", bind))?;
        init_metrics(addr).context("installing Prometheus exporter")?;
        info!("Metrics endpoint on http://{}/metrics", addr);
    }

    let bind: SocketAddr = format!("{}:{}", config.sip.local_ip, config.sip.local_port)
        .parse()
        .context("SIP bind address")?;
    let (new_calls_tx, mut new_calls) = mpsc::channel(100);
    let transport: Arc<dyn MessageTransport> = Arc::new(
        UdpTransport::bind(bind, Arc::new(CallTable::new()), Some(new_calls_tx))
            .await
            .context("binding SIP transport")?,
    );
    let params = Arc::new(EngineParams::from_config(&config));

    info!("sipbridge initialized successfully");
    info!("SIP on {}, registrar {}", bind, config.sip.proxy_registration);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            incoming = new_calls.recv() => {
                let Some(incoming) = incoming else {
                    warn!("SIP receive loop ended");
                    break;
                };
                // Claimed here, before the task exists, so a retransmission
                // queued behind this message finds the FIFO
                let Some(incoming) = claim_new_call(transport.as_ref(), incoming).await else {
                    continue;
                };
                let transport = transport.clone();
                let params = params.clone();
                tokio::spawn(async move {
                    if let Err(e) = refuse_unattached(transport, params, incoming).await {
                        error!("inbound transaction failed: {}", e);
                    }
                });
            }
            _ = &mut ctrl_c => {
                info!("Shutting down sipbridge");
                break;
            }
        }
    }

    Ok(())
}
