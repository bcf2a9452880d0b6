//! Command-line and environment configuration.

use std::path::PathBuf;

use cinderlite::DriverOptions;
use cinderlite::openstack::Credentials;
use cinderlite::runtime::constants::{metadata_service, paths, volume_defaults};
use cinderlite_shared::constants::plugin;
use clap::{Args, Parser};

/// Cinder volume plugin - attaches, formats and mounts OpenStack block
/// storage volumes for the local container engine
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct PluginArgs {
    /// Unix socket the container engine connects to
    #[arg(long, env = "CINDERLITE_SOCKET", default_value = plugin::DEFAULT_SOCKET)]
    pub socket: PathBuf,

    /// Directory holding one mountpoint per volume
    #[arg(long, env = "CINDERLITE_MOUNT_ROOT", default_value = paths::MOUNT_ROOT)]
    pub mount_root: PathBuf,

    /// Only volumes whose name starts with this prefix are managed
    #[arg(long, env = "VOLUME_PREFIX", default_value = "")]
    pub volume_prefix: String,

    /// Size in GiB for volumes created without a size option
    #[arg(long, env = "DEFAULT_SIZE", default_value_t = volume_defaults::DEFAULT_SIZE_GB)]
    pub default_size: u32,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, env = "LOG_LEVEL", value_parser = log_level)]
    pub log_level: Option<String>,

    /// Server ID of this host; looked up from the metadata service when unset
    #[arg(long, env = "CINDERLITE_SERVER_ID")]
    pub server_id: Option<String>,

    /// Instance metadata document URL
    #[arg(long, default_value = metadata_service::URL)]
    pub metadata_url: String,

    #[command(flatten)]
    pub openstack: OpenStackArgs,
}

/// OpenStack credentials, read from the usual `OS_*` variables.
#[derive(Args, Debug)]
pub struct OpenStackArgs {
    #[arg(long, env = "OS_AUTH_URL", default_value = "")]
    pub os_auth_url: String,

    #[arg(long, env = "OS_USERNAME", default_value = "")]
    pub os_username: String,

    #[arg(long, env = "OS_PASSWORD", default_value = "", hide_env_values = true)]
    pub os_password: String,

    #[arg(long, env = "OS_PROJECT_NAME")]
    pub os_project_name: Option<String>,

    /// Older name for OS_PROJECT_NAME
    #[arg(long, env = "OS_TENANT_NAME")]
    pub os_tenant_name: Option<String>,

    #[arg(long, env = "OS_PROJECT_ID")]
    pub os_project_id: Option<String>,

    #[arg(long, env = "OS_USER_DOMAIN_NAME", default_value = "Default")]
    pub os_user_domain_name: String,

    #[arg(long, env = "OS_PROJECT_DOMAIN_NAME", default_value = "Default")]
    pub os_project_domain_name: String,

    #[arg(long, env = "OS_REGION_NAME", default_value = "")]
    pub os_region_name: String,
}

fn log_level(value: &str) -> Result<String, String> {
    cinderlite::util::parse_log_level(value).map_err(|e| e.to_string())
}

impl PluginArgs {
    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            mount_root: self.mount_root.clone(),
            volume_prefix: self.volume_prefix.clone(),
            default_size_gb: self.default_size,
            ..Default::default()
        }
    }
}

impl OpenStackArgs {
    pub fn credentials(&self) -> Credentials {
        let set = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());

        Credentials {
            auth_url: self.os_auth_url.clone(),
            username: self.os_username.clone(),
            password: self.os_password.clone(),
            user_domain_name: self.os_user_domain_name.clone(),
            project_id: set(&self.os_project_id),
            project_name: set(&self.os_project_name).or_else(|| set(&self.os_tenant_name)),
            project_domain_name: self.os_project_domain_name.clone(),
            region: self.os_region_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> PluginArgs {
        let mut argv = vec!["cinderlite-plugin"];
        argv.extend_from_slice(args);
        PluginArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = parse(&[
            "--socket",
            "/tmp/cinder.sock",
            "--mount-root",
            "/srv/volumes",
            "--volume-prefix",
            "ns-",
            "--default-size",
            "50",
            "--server-id",
            "srv-1",
        ]);

        let options = args.driver_options();
        assert_eq!(args.socket, PathBuf::from("/tmp/cinder.sock"));
        assert_eq!(options.mount_root, PathBuf::from("/srv/volumes"));
        assert_eq!(options.volume_prefix, "ns-");
        assert_eq!(options.default_size_gb, 50);
        assert_eq!(args.server_id.as_deref(), Some("srv-1"));
    }

    #[test]
    fn test_tenant_name_is_project_name_fallback() {
        let args = parse(&[
            "--os-tenant-name",
            "legacy",
            "--os-project-id",
            "",
            "--os-region-name",
            "RegionOne",
        ]);
        let creds = args.openstack.credentials();
        assert_eq!(creds.project_name.as_deref(), Some("legacy"));
        assert_eq!(creds.project_id, None);
        assert_eq!(creds.region, "RegionOne");

        let args = parse(&["--os-project-name", "infra", "--os-tenant-name", "legacy"]);
        assert_eq!(
            args.openstack.credentials().project_name.as_deref(),
            Some("infra")
        );
    }

    #[test]
    fn test_log_level_is_validated() {
        let args = parse(&["--log-level", "DEBUG"]);
        assert_eq!(args.log_level.as_deref(), Some("debug"));

        let err = PluginArgs::try_parse_from(["cinderlite-plugin", "--log-level", "loud"])
            .unwrap_err()
            .to_string();
        assert!(err.contains("Failed to parse log level"), "{}", err);
    }

    #[test]
    fn test_rejects_non_numeric_size() {
        assert!(PluginArgs::try_parse_from(["cinderlite-plugin", "--default-size", "big"]).is_err());
    }
}
