use std::{fmt::Display, str::FromStr};

use anyhow::{Context, Result, anyhow};
use crates::payments::paystack_client::{DEFAULT_TIMEOUT, PAYSTACK_BASE_URL};

use super::config_model::{AuthSecret, BackendServer, Database, DotEnvyConfig, Paystack};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let backend_server = BackendServer {
        port: parsed("SERVER_PORT_BACKEND")?,
        body_limit: parsed_or("SERVER_BODY_LIMIT", 1)?,
        timeout: parsed_or("SERVER_TIMEOUT", 60)?,
    };

    Ok(DotEnvyConfig {
        backend_server,
        database: load_database()?,
        auth: AuthSecret {
            jwt_secret: required("JWT_USER_SECRET")?,
        },
        paystack: load_paystack()?,
    })
}

pub fn load_database() -> Result<Database> {
    dotenvy::dotenv().ok();

    Ok(Database {
        url: required("DATABASE_URL")?,
        max_connections: parsed_or("DATABASE_MAX_CONNECTIONS", 10)?,
    })
}

pub fn load_paystack() -> Result<Paystack> {
    dotenvy::dotenv().ok();

    Ok(Paystack {
        secret_key: required("PAYSTACK_SECRET_KEY")?,
        base_url: optional("PAYSTACK_BASE_URL").unwrap_or_else(|| PAYSTACK_BASE_URL.to_string()),
        callback_base_url: required("PAYSTACK_CALLBACK_BASE_URL")?,
        timeout_secs: parsed_or("PAYSTACK_TIMEOUT_SECS", DEFAULT_TIMEOUT.as_secs())?,
    })
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(key: &str) -> Result<String> {
    optional(key).ok_or_else(|| anyhow!("{key} is invalid"))
}

fn parsed<T>(key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = required(key)?;
    raw.parse::<T>()
        .map_err(|err| anyhow!("{err}"))
        .with_context(|| format!("{key} is invalid"))
}

pub fn parsed_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match optional(key) {
        Some(_) => parsed(key),
        None => Ok(default),
    }
}
