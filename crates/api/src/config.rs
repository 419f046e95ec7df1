//! Server configuration loaded from the environment.

use paylane_billing::CheckoutConfig;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds, e.g. `0.0.0.0:8080`.
    pub bind_address: String,
    pub database_url: String,
    /// Public base URL of this deployment; checkout return and cancel URLs
    /// are built from it.
    pub app_base_url: String,
    /// Prefix for gateway-visible invoice references (`<prefix>_<id>`).
    pub invoice_prefix: String,
    /// Secret for verifying bearer tokens on the user-facing routes.
    pub jwt_secret: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let require = |key: &str| {
            std::env::var(key).map_err(|_| anyhow::anyhow!("{key} must be set"))
        };
        Ok(Self {
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            database_url: require("DATABASE_URL")?,
            app_base_url: require("APP_BASE_URL")?,
            invoice_prefix: std::env::var("INVOICE_PREFIX")
                .unwrap_or_else(|_| "INV".to_string()),
            jwt_secret: require("JWT_SECRET")?,
        })
    }

    pub fn checkout_config(&self) -> CheckoutConfig {
        CheckoutConfig {
            base_url: self.app_base_url.clone(),
            invoice_prefix: self.invoice_prefix.clone(),
        }
    }
}
