//! Shared constants between the driver and the plugin daemon.

/// Volume metadata keys.
///
/// Stored on the remote volume object; values are strings. The key names are
/// shared with other drivers for the same control plane, so they must not change.
pub mod metadata {
    /// Owner uid of the data directory (decimal)
    pub const UID: &str = "docker-volume-driver:uid";

    /// Owner gid of the data directory (decimal)
    pub const GID: &str = "docker-volume-driver:gid";

    /// Mode of the data directory (octal, e.g. "750")
    pub const MODE: &str = "docker-volume-driver:mode";
}

/// Remote volume status values.
pub mod status {
    pub const AVAILABLE: &str = "available";
}

/// Plugin protocol constants.
pub mod plugin {
    /// Driver name, also the socket file stem
    pub const DRIVER_NAME: &str = "cinder";

    /// Default plugin socket path
    pub const DEFAULT_SOCKET: &str = "/run/docker/plugins/cinder.sock";

    /// Interface advertised on activation
    pub const IMPLEMENTS: &str = "VolumeDriver";

    /// Content type of every response
    pub const CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.2+json";
}
