pub mod check;
pub mod run;

use labrun_sandbox::{ProviderKind, SandboxSettings};

/// Environment settings with the command line provider applied.
pub fn sandbox_settings(provider: Option<ProviderKind>) -> SandboxSettings {
    let mut settings = SandboxSettings::from_env();
    if let Some(provider) = provider {
        settings.provider = provider;
    }
    settings
}
