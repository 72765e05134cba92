//! Aweme Subscriber - applies like/comment/video events to the store.
//!
//! ## Configuration
//!
//! Settings come from `config/aweme-sub.toml` (override with
//! `CONFIG_FILE_PATH`), with these environment variables on top:
//! - `APP_PORT`: HTTP port the sidecar delivers to (default: 6010)
//! - `RUST_LOG`: Logging filter (default: `log.level` from the config)

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use aweme_sub::command::{CommentCommand, LikeCommand, VideoCommand};
use aweme_sub::config::{LogConfig, StoreBackend, SubConfig};
use aweme_sub::handlers;
use aweme_sub::shutdown::ShutdownSignal;
use aweme_sub::store::{MemoryStore, MySqlStore};
use aweme_sub::Dispatcher;

fn init_tracing(config: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = SubConfig::load()?;
    init_tracing(&config.log);

    info!(
        addr = %config.server.addr(),
        backend = ?config.store.backend,
        "Aweme subscriber starting"
    );

    let (likes, comments, videos, mysql): (
        Arc<dyn LikeCommand>,
        Arc<dyn CommentCommand>,
        Arc<dyn VideoCommand>,
        Option<Arc<MySqlStore>>,
    ) = match config.store.backend {
        StoreBackend::Mysql => {
            let store = Arc::new(MySqlStore::connect(&config.store).await?);
            (store.clone(), store.clone(), store.clone(), Some(store))
        }
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            (store.clone(), store.clone(), store, None)
        }
    };

    let mut dispatcher = Dispatcher::register(handlers::all(likes, comments, videos))?;
    if let Some(topic) = &config.pubsub.dead_letter_topic {
        dispatcher = dispatcher.with_dead_letter_topic(topic);
    }

    info!(
        handler_count = dispatcher.handler_count(),
        topics = ?dispatcher.topics(),
        "Dispatcher configured"
    );

    let running = dispatcher.start(config.server.addr()).await?;

    ShutdownSignal::new().wait().await;
    let stopped = running.stop(config.shutdown.timeout()).await;

    if let Some(store) = mysql {
        store.close().await;
    }

    stopped?;
    info!("Aweme subscriber shutdown complete");
    Ok(())
}
