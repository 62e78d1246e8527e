use std::env;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use dotenv::dotenv;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3006".to_string())
            .parse()
            .context("BIND_ADDR is not a valid socket address")?;
        Ok(Self { database_url, bind_addr })
    }
}
