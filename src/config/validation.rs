//! Configuration validation functionality.

use anyhow::Result;

use super::Config;

/// Reject configurations the daemon cannot run with.
pub fn validate_config(config: &Config) -> Result<()> {
    if let Some(user_id) = config.user_id
        && user_id < 0
    {
        anyhow::bail!("user_id must be zero or greater (got {})", user_id);
    }

    for (name, value) in [
        ("settings_path", &config.settings_path),
        ("parameters_path", &config.parameters_path),
    ] {
        if let Some(path) = value
            && path.trim().is_empty()
        {
            anyhow::bail!("{} must not be empty", name);
        }
    }

    // Both stores rewrite their whole file
    if let (Some(settings), Some(parameters)) = (&config.settings_path, &config.parameters_path)
        && settings == parameters
    {
        anyhow::bail!(
            "settings_path and parameters_path must differ (both are {})",
            settings
        );
    }

    Ok(())
}
