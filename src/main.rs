use anyhow::Result;
use quiz_chain_solver::{logger, App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置（.env → TOML → 环境变量）
    let config = Config::load()?;

    // 初始化日志
    logger::init(config.verbose_logging);

    // 初始化并运行应用
    App::initialize(config).await?.run().await?;

    Ok(())
}
