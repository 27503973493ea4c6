//! Server configuration, loaded via the `config` crate from environment
//! variables with a `SERVER` prefix and `__` as the nesting separator
//! (e.g. `SERVER__DATABASE_URL`, `SERVER__BIND_ADDR`).

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl ServerConfig {
    /// Loads configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `SERVER__DATABASE_URL` is unset or the
    /// environment fails to deserialize into `ServerConfig`.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("SERVER").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bind_addr_is_all_interfaces() {
        assert_eq!(default_bind_addr(), "0.0.0.0:3000");
    }
}
