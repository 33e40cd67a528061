use clap::Parser;
use log::{error, info};
use peer::bootstrap::MatchParams;
use peer::config::MatchConfig;
use peer::network::{DemoDriver, PeerClient};
use peer::report::{LogSink, MatchAbort, Report, ReportSink};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay address to connect to
    #[arg(short = 'r', long, default_value = "127.0.0.1:8080")]
    relay: String,

    /// Bootstrap query string or URL, e.g. "?matchId=m&playerId=p&opponentId=o"
    #[arg(short = 'q', long)]
    query: String,

    /// Network ticks per second
    #[arg(short = 't', long, default_value = "60")]
    tick_rate: u32,

    /// Points awarded per goal
    #[arg(long, default_value = "2")]
    points_per_goal: u32,

    /// Score that wins the match
    #[arg(long, default_value = "50")]
    win_threshold: u32,

    /// Seconds to wait for both players before aborting
    #[arg(long, default_value = "200")]
    wait_timeout: u64,

    /// Ticks between accepted repositioning triggers per tower
    #[arg(long)]
    cooldown_ticks: Option<u64>,

    /// Seconds between the end of the match and the result report
    #[arg(long, default_value = "5")]
    settle: u64,

    /// Score a demo goal every N ticks (0 disables the demo driver)
    #[arg(long, default_value = "0")]
    demo_goal_every: u64,
}

impl Args {
    fn match_config(&self) -> MatchConfig {
        let mut config = MatchConfig::with_tick_rate(self.tick_rate);
        let rate = u64::from(config.tick_rate);

        config.points_per_goal = self.points_per_goal;
        config.win_threshold = self.win_threshold;
        config.wait_timeout_ticks = self.wait_timeout.saturating_mul(rate).max(1);
        config.result_settle_ticks = self.settle.saturating_mul(rate);
        if let Some(cooldown) = self.cooldown_ticks {
            config.reposition_cooldown_ticks = cooldown;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = args.match_config();

    let params = match MatchParams::from_query(&args.query) {
        Ok(params) => params,
        Err(e) => {
            error!("{}", e);
            LogSink.deliver(&Report::Abort(MatchAbort::from(&e)));
            return Err(e.into());
        }
    };

    info!("Starting peer for match {}...", params.match_id);
    info!(
        "Tick rate {} Hz, {} points per goal, {} to win",
        config.tick_rate, config.points_per_goal, config.win_threshold
    );

    let mut client = PeerClient::new(&args.relay, params, config, LogSink).await?;
    if args.demo_goal_every > 0 {
        client = client.with_demo(DemoDriver {
            goal_every: args.demo_goal_every,
            rotation_delta: 0.25,
        });
    }

    client.run().await?;

    Ok(())
}
