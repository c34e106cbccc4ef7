//! AI configuration stored in workspace settings.

use tracing::{debug, info};

use digest_core::{defaults, AiConfig, Error, Result, SettingStore};

/// Load and validate the workspace AI configuration.
///
/// A missing, empty or unparseable setting is a `FailedPrecondition`, as is
/// a configuration with no endpoint, API key or model. Nothing is
/// default-filled.
pub async fn load_ai_config(settings: &dyn SettingStore) -> Result<AiConfig> {
    let stored = settings
        .get_workspace_setting(defaults::AI_CONFIG_KEY)
        .await?
        .ok_or_else(|| {
            Error::FailedPrecondition(
                "AI configuration not found. Please configure AI settings in workspace settings."
                    .to_string(),
            )
        })?;

    if stored.value.is_null() {
        return Err(Error::FailedPrecondition(
            "AI configuration is empty".to_string(),
        ));
    }

    let config: AiConfig = serde_json::from_value(stored.value).map_err(|e| {
        Error::FailedPrecondition(format!("AI configuration is unreadable: {}", e))
    })?;
    config.validate()?;

    debug!(
        subsystem = "jobs",
        component = "config",
        endpoint = %config.endpoint,
        model = %config.model,
        "Loaded AI configuration"
    );
    Ok(config)
}

/// Store `config` only when no AI configuration exists yet.
///
/// Returns whether the setting was written.
pub async fn seed_ai_config(settings: &dyn SettingStore, config: &AiConfig) -> Result<bool> {
    config.validate()?;
    let value = serde_json::to_value(config)?;
    let written = settings
        .compare_and_swap_workspace_setting(defaults::AI_CONFIG_KEY, None, &value)
        .await?;
    if written {
        info!(
            subsystem = "jobs",
            component = "config",
            endpoint = %config.endpoint,
            model = %config.model,
            "Seeded AI configuration"
        );
    }
    Ok(written)
}
