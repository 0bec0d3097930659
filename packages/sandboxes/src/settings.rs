// ABOUTME: Provisioning settings shared by every sandbox pipeline
// ABOUTME: Image, commands, probe target and phase timeouts

use std::time::Duration;

use previewbox_config::constants;

/// Settings applied to every sandbox the orchestrator provisions
#[derive(Debug, Clone)]
pub struct ProvisionSettings {
    pub image: String,
    /// Project root inside the container
    pub workdir: String,
    pub install_command: Vec<String>,
    pub dev_command: Vec<String>,
    /// Command keeping the container running between execs
    pub keepalive_command: Vec<String>,
    /// Host the readiness probe connects to
    pub probe_host: String,
    pub probe_deadline: Duration,
    pub pull_timeout: Duration,
    pub install_timeout: Duration,
    /// Grace period given to the container on stop
    pub stop_grace_secs: u64,
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            image: constants::DEFAULT_IMAGE.to_string(),
            workdir: constants::DEFAULT_WORKDIR.to_string(),
            install_command: parse_command(constants::DEFAULT_INSTALL_COMMAND),
            dev_command: parse_command(constants::DEFAULT_DEV_COMMAND),
            keepalive_command: parse_command("tail -f /dev/null"),
            probe_host: constants::DEFAULT_PROBE_HOST.to_string(),
            probe_deadline: Duration::from_secs(constants::DEFAULT_PROBE_DEADLINE_SECS),
            pull_timeout: Duration::from_secs(constants::DEFAULT_PULL_TIMEOUT_SECS),
            install_timeout: Duration::from_secs(constants::DEFAULT_INSTALL_TIMEOUT_SECS),
            stop_grace_secs: 10,
        }
    }
}

/// Split a command line on whitespace; quoting is not supported
pub fn parse_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_commands() {
        let settings = ProvisionSettings::default();
        assert_eq!(
            settings.install_command,
            vec!["npm", "install", "--loglevel=info", "--no-progress"]
        );
        assert_eq!(settings.dev_command, vec!["npm", "run", "dev"]);
        assert_eq!(settings.image, "node:25-alpine3.21");
        assert_eq!(settings.workdir, "/app");
    }

    #[test]
    fn test_parse_command_collapses_whitespace() {
        assert_eq!(parse_command("  pnpm   dev "), vec!["pnpm", "dev"]);
        assert!(parse_command("   ").is_empty());
    }
}
