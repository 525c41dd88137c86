#[tokio::main]
async fn main() -> anyhow::Result<()> {
    serimon::boot::init_common();
    let matches = serimon::cli::parse_args();

    if serimon::cli::actions::run_one_shot_actions(&matches).await {
        return Ok(());
    }

    log::info!("starting monitor session");
    serimon::cli::monitor::run(&matches).await
}
