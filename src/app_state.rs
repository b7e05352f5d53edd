use crate::config::Config;
use crate::db::MongoDB;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub mongodb: Arc<MongoDB>,
    pub config: Config,
}

impl AppState {
    pub fn new(mongodb: MongoDB, config: Config) -> Self {
        Self {
            mongodb: Arc::new(mongodb),
            config,
        }
    }
}
