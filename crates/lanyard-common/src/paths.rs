//! Standard filesystem paths for the driver plugin.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Directory the orchestration runtime scans for plugin sockets.
pub static PLUGIN_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("LANYARD_PLUGIN_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/run/docker/plugins"))
});

/// Kernel module list.
pub const PROC_MODULES: &str = "/proc/modules";

/// IPv4 forwarding sysctl.
pub const IPV4_FORWARD: &str = "/proc/sys/net/ipv4/ip_forward";

/// Standard paths used by the driver daemon.
#[derive(Debug, Clone)]
pub struct PluginPaths {
    /// Plugin socket directory (default: /run/docker/plugins).
    pub plugin_dir: PathBuf,
}

impl PluginPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom plugin directory.
    #[must_use]
    pub fn with_plugin_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin_dir: dir.into(),
        }
    }

    /// Unix socket for a driver of the given type.
    #[must_use]
    pub fn socket(&self, driver: &str) -> PathBuf {
        self.plugin_dir.join(format!("{driver}.sock"))
    }

    /// Create the plugin directory.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.plugin_dir)
    }
}

impl Default for PluginPaths {
    fn default() -> Self {
        Self {
            plugin_dir: PLUGIN_DIR.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_dir() {
        let paths = PluginPaths::with_plugin_dir("/tmp/lanyard-test");
        assert_eq!(
            paths.socket("ipvlan"),
            PathBuf::from("/tmp/lanyard-test/ipvlan.sock")
        );
    }

    #[test]
    fn create_plugin_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = PluginPaths::with_plugin_dir(tmp.path().join("run/docker/plugins"));
        paths.create_dirs().unwrap();
        assert!(paths.socket("macvlan").parent().unwrap().is_dir());
    }
}
