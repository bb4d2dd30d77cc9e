use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub app_env: String,
    pub cors_origins: Vec<String>,
    pub backend: BackendConfig,
    pub provisioning: ProvisioningConfig,
    pub redirects: RedirectConfig,
}

#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
    /// When set, bearer tokens are verified locally before asking the backend.
    pub jwt_secret: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ProvisioningConfig {
    pub membership_attempts: u32,
    pub membership_step_ms: u64,
}

#[derive(Clone, Debug)]
pub struct RedirectConfig {
    pub after_reset: String,
    pub reset_delay_ms: u64,
    pub after_signup: String,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_or_parse("PORT", 3000),
            app_env: env_or("APP_ENV", "development"),
            cors_origins: env_or("CORS_ORIGINS", "http://localhost:5173")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            backend: BackendConfig {
                url: env_or("SUPABASE_URL", "http://localhost:54321")
                    .trim_end_matches('/')
                    .to_string(),
                anon_key: env_or("SUPABASE_ANON_KEY", ""),
                jwt_secret: env::var("SUPABASE_JWT_SECRET")
                    .ok()
                    .filter(|s| !s.is_empty()),
            },
            provisioning: ProvisioningConfig {
                membership_attempts: env_or_parse("MEMBERSHIP_POLL_ATTEMPTS", 5),
                membership_step_ms: env_or_parse("MEMBERSHIP_POLL_STEP_MS", 200),
            },
            redirects: RedirectConfig {
                after_reset: env_or("RESET_REDIRECT_PATH", "/login"),
                reset_delay_ms: env_or_parse("RESET_REDIRECT_DELAY_MS", 3000),
                after_signup: env_or("SIGNUP_REDIRECT_PATH", "/dashboard"),
            },
        }
    }

    pub fn reset_redirect_delay(&self) -> Duration {
        Duration::from_millis(self.redirects.reset_delay_ms)
    }
}

#[cfg(test)]
impl Config {
    /// Defaults without reading the environment.
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            app_env: "test".into(),
            cors_origins: vec![],
            backend: BackendConfig {
                url: "http://backend.test".into(),
                anon_key: "anon".into(),
                jwt_secret: Some("test-secret".into()),
            },
            provisioning: ProvisioningConfig {
                membership_attempts: 5,
                membership_step_ms: 200,
            },
            redirects: RedirectConfig {
                after_reset: "/login".into(),
                reset_delay_ms: 3000,
                after_signup: "/dashboard".into(),
            },
        }
    }
}
