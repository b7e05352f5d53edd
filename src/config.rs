use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mongo_uri: String,
    pub database_name: String,
    pub jwt_secret: String,
    pub password_pepper: String,
    pub bind_addr: String,
    pub public_base_url: String,
    pub frontend_origin: String,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub token_ttl_hours: i64,
    pub bcrypt_cost: u32,
    pub require_email_verification: bool,
    pub allow_dev_role_switch: bool,
    pub expose_dev_links: bool,
}

impl Config {
    /// Defaults for everything except the two required secrets.
    pub fn new(mongo_uri: impl Into<String>, jwt_secret: impl Into<String>) -> Self {
        Self {
            mongo_uri: mongo_uri.into(),
            database_name: "community".to_string(),
            jwt_secret: jwt_secret.into(),
            password_pepper: String::new(),
            bind_addr: "0.0.0.0:8080".to_string(),
            public_base_url: "http://localhost:8080".to_string(),
            frontend_origin: "http://localhost:3000".to_string(),
            upload_dir: PathBuf::from("uploads"),
            max_upload_bytes: 10 * 1024 * 1024,
            token_ttl_hours: 24,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            require_email_verification: false,
            allow_dev_role_switch: false,
            expose_dev_links: false,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let mongo_uri = env::var("MONGO_URI").map_err(|_| ConfigError::Missing("MONGO_URI"))?;
        let jwt_secret = env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
        let defaults = Self::new(mongo_uri, jwt_secret);

        Ok(Self {
            database_name: env::var("DATABASE_NAME").unwrap_or(defaults.database_name.clone()),
            password_pepper: env::var("PASSWORD_PEPPER").unwrap_or_default(),
            bind_addr: env::var("BIND_ADDR").unwrap_or(defaults.bind_addr.clone()),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.public_base_url.clone()),
            frontend_origin: env::var("FRONTEND_ORIGIN").unwrap_or(defaults.frontend_origin.clone()),
            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir.clone()),
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            token_ttl_hours: parse_var("TOKEN_TTL_HOURS", defaults.token_ttl_hours)?,
            bcrypt_cost: parse_var("BCRYPT_COST", defaults.bcrypt_cost)?,
            require_email_verification: flag_var("REQUIRE_EMAIL_VERIFICATION")?,
            allow_dev_role_switch: flag_var("ALLOW_DEV_ROLE_SWITCH")?,
            expose_dev_links: flag_var("EXPOSE_DEV_LINKS")?,
            ..defaults
        })
    }

    /// Absolute URL under which a stored upload is reachable.
    pub fn upload_url(&self, file_name: &str) -> String {
        format!("{}/uploads/{}", self.public_base_url, file_name)
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}

fn flag_var(key: &'static str) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(value) => parse_flag(&value).ok_or(ConfigError::Invalid { key, value }),
        Err(_) => Ok(false),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_common_spellings() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" on "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag(""), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn upload_url_joins_base_and_name() {
        let mut config = Config::new("mongodb://localhost:27017", "secret");
        config.public_base_url = "https://api.example.com".to_string();
        assert_eq!(
            config.upload_url("abc.png"),
            "https://api.example.com/uploads/abc.png"
        );
    }
}
