// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across previewbox

// API Server Configuration
pub const PREVIEWBOX_API_HOST: &str = "PREVIEWBOX_API_HOST";
pub const PREVIEWBOX_API_PORT: &str = "PREVIEWBOX_API_PORT";
pub const PORT: &str = "PORT"; // Legacy

// CORS Configuration
pub const CORS_ORIGIN: &str = "CORS_ORIGIN";

// Sandbox Storage
pub const PREVIEWBOX_SANDBOX_ROOT: &str = "PREVIEWBOX_SANDBOX_ROOT";

// Container Provisioning
pub const PREVIEWBOX_IMAGE: &str = "PREVIEWBOX_IMAGE";
pub const PREVIEWBOX_WORKDIR: &str = "PREVIEWBOX_WORKDIR";
pub const PREVIEWBOX_INSTALL_COMMAND: &str = "PREVIEWBOX_INSTALL_COMMAND";
pub const PREVIEWBOX_DEV_COMMAND: &str = "PREVIEWBOX_DEV_COMMAND";
pub const PREVIEWBOX_PULL_TIMEOUT_SECS: &str = "PREVIEWBOX_PULL_TIMEOUT_SECS";
pub const PREVIEWBOX_INSTALL_TIMEOUT_SECS: &str = "PREVIEWBOX_INSTALL_TIMEOUT_SECS";

// Readiness Probe
pub const PREVIEWBOX_PROBE_HOST: &str = "PREVIEWBOX_PROBE_HOST";
pub const PREVIEWBOX_PROBE_DEADLINE_SECS: &str = "PREVIEWBOX_PROBE_DEADLINE_SECS";

// Reaper
pub const PREVIEWBOX_SANDBOX_TTL_MINUTES: &str = "PREVIEWBOX_SANDBOX_TTL_MINUTES";
pub const PREVIEWBOX_REAPER_INTERVAL_MINUTES: &str = "PREVIEWBOX_REAPER_INTERVAL_MINUTES";

// Defaults
pub const DEFAULT_API_HOST: &str = "127.0.0.1";
pub const DEFAULT_API_PORT: u16 = 3001;
pub const DEFAULT_CORS_ORIGIN: &str = "*";
pub const DEFAULT_SANDBOX_ROOT: &str = "./sandboxes";
pub const DEFAULT_IMAGE: &str = "node:25-alpine3.21";
pub const DEFAULT_WORKDIR: &str = "/app";
pub const DEFAULT_INSTALL_COMMAND: &str = "npm install --loglevel=info --no-progress";
pub const DEFAULT_DEV_COMMAND: &str = "npm run dev";
pub const DEFAULT_PROBE_HOST: &str = "127.0.0.1";
pub const DEFAULT_PROBE_DEADLINE_SECS: u64 = 180;
pub const DEFAULT_PULL_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_SANDBOX_TTL_MINUTES: u64 = 60;
pub const MAX_SANDBOX_TTL_MINUTES: u64 = 7 * 24 * 60;
pub const DEFAULT_REAPER_INTERVAL_MINUTES: u64 = 5;
