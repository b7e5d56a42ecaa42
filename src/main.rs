mod auth;
mod catalog;
mod database;
mod model;
mod settings;
mod views;

use actix_identity::{CookieIdentityPolicy, IdentityService};
use actix_web::{middleware::Logger, App, HttpServer};
use catalog::TmdbClient;
use database::UserDb;
use log::{info, warn};
use settings::Settings;
use std::io;

fn startup_error<E: std::fmt::Display>(err: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

fn open_db(settings: &Settings) -> sled::Result<sled::Db> {
    match &settings.db_path {
        Some(path) => sled::open(path),
        None => {
            warn!("no db_path configured, accounts will not survive a restart");
            sled::Config::new().temporary(true).open()
        }
    }
}

#[actix_rt::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("moviedex=debug,actix_web=info"),
    )
    .init();

    let settings = Settings::load().map_err(startup_error)?;
    if settings.tmdb_api_key.is_empty() {
        warn!("MOVIEDEX_TMDB_API_KEY is not set, catalog requests will be rejected");
    }

    let tera = tera::Tera::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/**/*"))
        .map_err(startup_error)?;
    let db = open_db(&settings).map_err(startup_error)?;
    info!(
        "user directory holds {} users",
        db.user_count().map_err(startup_error)?
    );
    let catalog =
        TmdbClient::new(&settings.tmdb_base_url, &settings.tmdb_api_key).map_err(startup_error)?;

    let session_key = settings.session_key.clone();
    let secure_cookie = settings.secure_cookie;
    info!("listening on {}", settings.bind);
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(IdentityService::new(
                CookieIdentityPolicy::new(session_key.as_bytes())
                    .name("moviedex-auth")
                    .secure(secure_cookie),
            ))
            .data(tera.clone())
            .data(db.clone())
            .data(catalog.clone())
            .configure(views::configure)
    })
    .bind(&settings.bind)?
    .run()
    .await
}
