//! Aweme Publish - push a single like/comment/video event onto the bus.
//!
//! ```text
//! aweme-publish like --video-id 42 --user-id 7 --action-type 1
//! aweme-publish comment --id 9 --video-id 42 --user-id 7 --comment "nice" --action-type 1
//! aweme-publish video --user-id 7 --video-url https://cdn/v.mp4 --title "first"
//! ```
//!
//! The sidecar URL and timeout come from the `[publisher]` section of the
//! shared config file; `--sidecar-url` and `--timeout-ms` override them.

use clap::{Parser, Subcommand};

use aweme_sub::config::SubConfig;
use aweme_sub::publish::Publisher;

#[derive(Parser)]
#[command(name = "aweme-publish", about = "Publish aweme events through the bus sidecar")]
struct Cli {
    /// Sidecar base URL (default: `publisher.sidecar_url`)
    #[arg(long, env = "SIDECAR_URL")]
    sidecar_url: Option<String>,

    /// Request timeout in milliseconds (default: `publisher.timeout_ms`)
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    event: EventCmd,
}

#[derive(Subcommand)]
enum EventCmd {
    /// Like (1) or unlike (2) a video
    Like {
        #[arg(long)]
        video_id: i64,
        #[arg(long)]
        user_id: i64,
        #[arg(long, default_value_t = 1)]
        action_type: i32,
    },
    /// Post (1) or delete (2) a comment
    Comment {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        video_id: i64,
        #[arg(long)]
        user_id: i64,
        #[arg(long, default_value = "")]
        comment: String,
        #[arg(long, default_value_t = 1)]
        action_type: i32,
    },
    /// Announce an uploaded video
    Video {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        video_url: String,
        #[arg(long, default_value = "")]
        title: String,
    },
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = SubConfig::load()?
        .publisher
        .with_overrides(cli.sidecar_url, cli.timeout_ms);
    let publisher = Publisher::from_config(&config);

    match cli.event {
        EventCmd::Like {
            video_id,
            user_id,
            action_type,
        } => publisher.publish_like(video_id, user_id, action_type).await?,
        EventCmd::Comment {
            id,
            video_id,
            user_id,
            comment,
            action_type,
        } => {
            publisher
                .publish_comment(id, video_id, user_id, comment, action_type)
                .await?
        }
        EventCmd::Video {
            user_id,
            video_url,
            title,
        } => publisher.publish_video(user_id, video_url, title).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
