// src/main.rs

use std::io;

use actix_cors::Cors;
use actix_web::{http, middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::info;

use community_backend::app_state::AppState;
use community_backend::config::Config;
use community_backend::configure;
use community_backend::db::MongoDB;

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let mongodb = MongoDB::connect(&config.mongo_uri, &config.database_name)
        .await
        .map_err(io::Error::other)?;
    mongodb.ensure_indexes().await.map_err(io::Error::other)?;

    tokio::fs::create_dir_all(&config.upload_dir).await?;

    let bind_addr = config.bind_addr.clone();
    let frontend_origin = config.frontend_origin.clone();
    let state = AppState::new(mongodb, config);

    info!("Server running at http://{}", bind_addr);
    info!("Allowed CORS Origin: {}", frontend_origin);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PATCH", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(configure)
    })
    .bind(bind_addr)?
    .run()
    .await
}
