use log::info;

mod config;
mod db;
mod error;
mod excel;
mod handlers;
mod ingest;
mod routers;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::from_env()?;
    let pool = db::init_db(&config.database_url).await?;
    info!("database connection established");

    let routes = routers::make_routes(pool);
    info!("listening on {}", config.bind_addr);
    warp::serve(routes).run(config.bind_addr).await;
    Ok(())
}
