use modbot_core::config::Config;

mod app;

#[tokio::main]
async fn main() -> Result<(), modbot_core::Error> {
    modbot_core::logging::init("modbot")?;

    let cfg = Config::load()?;

    app::run(cfg)
        .await
        .map_err(|e| modbot_core::Error::External(format!("modbot failed: {e}")))?;

    Ok(())
}
