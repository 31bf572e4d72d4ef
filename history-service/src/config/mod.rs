use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

/// The shared secret keys every HMAC in the system; anything shorter than
/// this refuses to boot.
pub const MIN_SECRET_LENGTH: usize = 32;

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub secret: SecretConfig,
    pub auth: AuthTtlConfig,
    pub rate_limit: RateLimitConfig,
    pub consent: ConsentConfig,
    pub mailer: MailerConfig,
    pub security: SecurityConfig,
    pub swagger: SwaggerConfig,
    /// Dev-only: echo the OTP in the challenge response. Must be false in prod.
    pub expose_dev_otp: bool,
    /// Mirror audit events into the legacy compatibility table.
    pub legacy_audit_mirror: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct SecretConfig {
    pub shared_secret: String,
}

#[derive(Debug, Clone)]
pub struct AuthTtlConfig {
    pub otp_ttl_seconds: i64,
    pub session_ttl_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub challenge_email_limit: i64,
    pub challenge_email_window_seconds: i64,
    pub challenge_ip_limit: i64,
    pub challenge_ip_window_seconds: i64,
    pub verify_ip_limit: i64,
    pub verify_ip_window_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct ConsentConfig {
    pub terms_version: String,
    pub privacy_version: String,
}

impl ConsentConfig {
    /// The (doc_type, required version) pairs the consent gate enforces.
    pub fn required_documents(&self) -> Vec<(String, String)> {
        vec![
            ("terms_of_service".to_string(), self.terms_version.clone()),
            ("privacy_policy".to_string(), self.privacy_version.clone()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MailerMode {
    Null,
    Smtp,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

#[derive(Debug, Clone)]
pub struct MailerConfig {
    pub mode: MailerMode,
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SwaggerMode {
    Public,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct SwaggerConfig {
    pub enabled: SwaggerMode,
}

impl HistoryConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let mailer_mode: MailerMode = get_env("MAILER_MODE", Some("null"), is_prod)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let smtp = if mailer_mode == MailerMode::Smtp {
            Some(SmtpConfig {
                host: get_env("SMTP_HOST", None, is_prod)?,
                port: parse_env("SMTP_PORT", Some("587"), is_prod)?,
                username: get_env("SMTP_USERNAME", None, is_prod)?,
                password: get_env("SMTP_PASSWORD", None, is_prod)?,
                from_address: get_env("SMTP_FROM_ADDRESS", None, is_prod)?,
            })
        } else {
            None
        };

        let config = HistoryConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("history-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?,
            },
            secret: SecretConfig {
                // Always required: there is no safe default for key material.
                shared_secret: get_env("SHARED_SECRET", None, true)?,
            },
            auth: AuthTtlConfig {
                otp_ttl_seconds: parse_env("OTP_TTL_SECONDS", Some("600"), is_prod)?,
                session_ttl_seconds: parse_env("SESSION_TTL_SECONDS", Some("86400"), is_prod)?,
            },
            rate_limit: RateLimitConfig {
                challenge_email_limit: parse_env(
                    "RATE_LIMIT_CHALLENGE_EMAIL_LIMIT",
                    Some("5"),
                    is_prod,
                )?,
                challenge_email_window_seconds: parse_env(
                    "RATE_LIMIT_CHALLENGE_EMAIL_WINDOW_SECONDS",
                    Some("3600"),
                    is_prod,
                )?,
                challenge_ip_limit: parse_env("RATE_LIMIT_CHALLENGE_IP_LIMIT", Some("10"), is_prod)?,
                challenge_ip_window_seconds: parse_env(
                    "RATE_LIMIT_CHALLENGE_IP_WINDOW_SECONDS",
                    Some("3600"),
                    is_prod,
                )?,
                verify_ip_limit: parse_env("RATE_LIMIT_VERIFY_IP_LIMIT", Some("20"), is_prod)?,
                verify_ip_window_seconds: parse_env(
                    "RATE_LIMIT_VERIFY_IP_WINDOW_SECONDS",
                    Some("3600"),
                    is_prod,
                )?,
            },
            consent: ConsentConfig {
                terms_version: get_env("CONSENT_TERMS_VERSION", Some("2024-01"), is_prod)?,
                privacy_version: get_env("CONSENT_PRIVACY_VERSION", Some("2024-01"), is_prod)?,
            },
            mailer: MailerConfig {
                mode: mailer_mode,
                smtp,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            },
            swagger: SwaggerConfig {
                enabled: get_env("ENABLE_SWAGGER", Some("public"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            expose_dev_otp: get_env("EXPOSE_DEV_OTP", Some("false"), is_prod)?
                .parse()
                .unwrap_or(false),
            legacy_audit_mirror: get_env("LEGACY_AUDIT_MIRROR", Some("false"), is_prod)?
                .parse()
                .unwrap_or(false),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.secret.shared_secret.len() < MIN_SECRET_LENGTH {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SHARED_SECRET must be at least {} characters",
                MIN_SECRET_LENGTH
            )));
        }

        if self.auth.otp_ttl_seconds <= 0 || self.auth.session_ttl_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OTP and session TTLs must be positive"
            )));
        }

        for (label, limit, window) in [
            (
                "challenge email",
                self.rate_limit.challenge_email_limit,
                self.rate_limit.challenge_email_window_seconds,
            ),
            (
                "challenge ip",
                self.rate_limit.challenge_ip_limit,
                self.rate_limit.challenge_ip_window_seconds,
            ),
            (
                "verify ip",
                self.rate_limit.verify_ip_limit,
                self.rate_limit.verify_ip_window_seconds,
            ),
        ] {
            if limit <= 0 || window <= 0 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Rate limit for {} must have positive limit and window",
                    label
                )));
            }
        }

        if self.mailer.mode == MailerMode::Smtp && self.mailer.smtp.is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MAILER_MODE=smtp requires SMTP_* settings"
            )));
        }

        if self.environment == Environment::Prod {
            // Safety-critical: the OTP echo can never reach production.
            if self.expose_dev_otp {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "EXPOSE_DEV_OTP must be false when ENVIRONMENT=prod"
                )));
            }

            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.swagger.enabled == SwaggerMode::Public {
                tracing::warn!(
                    "Swagger is publicly accessible in production - consider 'disabled'"
                );
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, default, is_prod)?.parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} is not a valid value: {}", key, e))
    })
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for MailerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "null" => Ok(MailerMode::Null),
            "smtp" => Ok(MailerMode::Smtp),
            _ => Err(format!("Invalid mailer mode: {}", s)),
        }
    }
}

impl std::str::FromStr for SwaggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(SwaggerMode::Public),
            "disabled" => Ok(SwaggerMode::Disabled),
            _ => Err(format!("Invalid swagger mode: {}", s)),
        }
    }
}
