//! Configuration validation functions.

use super::Config;

/// Validate configuration security and warn about potential misconfiguration.
///
/// A missing `JWT_SECRET` is fatal outside of local development, since it
/// would make bearer tokens unverifiable and effectively disable
/// authentication (§4.1 — the Gateway closes with 1008 on auth failure, but
/// cannot do so meaningfully with no secret to check against).
pub fn validate_config_security(config: &Config) -> anyhow::Result<()> {
    if config.jwt_secret.is_none() {
        if is_production_mode() {
            anyhow::bail!(
                "\nCRITICAL: JWT_SECRET is not set!\n\
                 ===================================================================\n\
                 Configure a shared signing secret:\n\
                 export JWT_SECRET=\"$(openssl rand -hex 32)\"\n\
                 ===================================================================\n"
            );
        }
        eprintln!(
            "WARNING: JWT_SECRET is not set. Bearer tokens cannot be verified; \
             only guest sessions will be accepted."
        );
    } else if let Some(secret) = &config.jwt_secret {
        if secret.len() < 16 {
            eprintln!(
                "WARNING: JWT_SECRET is very short ({} chars). Recommended: at least 32 characters.",
                secret.len()
            );
        }
    }

    if config.redis.host.trim().is_empty() {
        anyhow::bail!("REDIS_HOST must not be empty");
    }

    Ok(())
}

/// Detect production mode via common environment conventions.
pub fn is_production_mode() -> bool {
    std::env::var("ENVIRONMENT")
        .map(|v| {
            let v = v.to_lowercase();
            v == "production" || v == "prod"
        })
        .unwrap_or(false)
}
