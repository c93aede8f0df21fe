use stakerbot::constants::VERSION;
use stakerbot::logger::{self, LogTag};

#[tokio::main]
async fn main() {
    logger::info(
        LogTag::System,
        &format!("stakerbot v{} starting up...", VERSION),
    );

    if let Err(e) = stakerbot::run::run().await {
        logger::error(LogTag::System, &format!("fatal: {:#}", e));
        std::process::exit(1);
    }
}
