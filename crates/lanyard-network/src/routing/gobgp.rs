//! GoBGP routing backend.
//!
//! Prefixes are announced and withdrawn in the daemon's global RIB through
//! the `gobgp` client. Monitoring follows `gobgp monitor global rib -j` and
//! mirrors paths learned from peers into the host routing table via the
//! parent interface.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use ipnet::IpNet;
use lanyard_common::{LanyardError, LanyardResult};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;

use super::{RoutingBackend, RoutingManager};
use crate::link::LinkOps;

/// Client binary looked up on `PATH` by default.
pub const DEFAULT_GOBGP_BIN: &str = "gobgp";

/// BGP path attribute type carrying the next hop.
const ATTR_NEXT_HOP: u8 = 3;

fn routing_err(message: impl Into<String>) -> LanyardError {
    LanyardError::Routing {
        backend: RoutingBackend::Gobgp.as_str(),
        message: message.into(),
    }
}

/// RIB change announced by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RibEvent {
    /// Destination prefix.
    pub prefix: IpNet,
    /// Next hop, the peer that owns the prefix.
    pub nexthop: IpAddr,
    /// Whether the path was withdrawn.
    pub withdrawal: bool,
}

#[derive(Debug, Deserialize)]
struct MonitorPath {
    nlri: MonitorNlri,
    #[serde(default)]
    attrs: Vec<MonitorAttr>,
    #[serde(default)]
    withdrawal: bool,
}

#[derive(Debug, Deserialize)]
struct MonitorNlri {
    prefix: String,
}

#[derive(Debug, Deserialize)]
struct MonitorAttr {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    nexthop: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MonitorLine {
    Many(Vec<MonitorPath>),
    One(MonitorPath),
}

/// Parse one line of `gobgp monitor global rib -j` output.
///
/// Paths without a usable next hop are skipped.
///
/// # Errors
///
/// Returns an error if the line is not monitor JSON.
pub fn parse_monitor_line(line: &str) -> LanyardResult<Vec<RibEvent>> {
    let paths = match serde_json::from_str::<MonitorLine>(line)? {
        MonitorLine::Many(paths) => paths,
        MonitorLine::One(path) => vec![path],
    };

    let mut events = Vec::with_capacity(paths.len());
    for path in paths {
        let prefix: IpNet = path
            .nlri
            .prefix
            .parse()
            .map_err(|_| {
                routing_err(format!("bad prefix in monitor output: {}", path.nlri.prefix))
            })?;
        let nexthop = path
            .attrs
            .iter()
            .filter(|a| a.kind == ATTR_NEXT_HOP)
            .find_map(|a| a.nexthop.as_deref())
            .and_then(|nh| nh.parse::<IpAddr>().ok());
        match nexthop {
            Some(nexthop) => events.push(RibEvent {
                prefix,
                nexthop,
                withdrawal: path.withdrawal,
            }),
            None => tracing::debug!(%prefix, "Skipping path without next hop"),
        }
    }
    Ok(events)
}

fn family(prefix: &IpNet) -> &'static str {
    match prefix {
        IpNet::V4(_) => "ipv4",
        IpNet::V6(_) => "ipv6",
    }
}

/// Arguments for a global RIB change of `prefix`.
#[must_use]
pub fn rib_args(control: IpAddr, op: &str, prefix: IpNet) -> Vec<String> {
    vec![
        "-u".to_string(),
        control.to_string(),
        "global".to_string(),
        "rib".to_string(),
        op.to_string(),
        "-a".to_string(),
        family(&prefix).to_string(),
        prefix.to_string(),
    ]
}

/// Routing manager backed by a local GoBGP daemon.
pub struct GobgpManager {
    parent_iface: String,
    control: IpAddr,
    bin: PathBuf,
    links: Arc<dyn LinkOps>,
    advertised: Mutex<HashSet<IpNet>>,
}

impl GobgpManager {
    /// Create a manager for `parent_iface`, talking to the daemon at `control`.
    pub fn new(
        parent_iface: impl Into<String>,
        control: IpAddr,
        bin: PathBuf,
        links: Arc<dyn LinkOps>,
    ) -> Self {
        Self {
            parent_iface: parent_iface.into(),
            control,
            bin,
            links,
            advertised: Mutex::new(HashSet::new()),
        }
    }

    async fn run_client(&self, args: &[String]) -> LanyardResult<()> {
        let output = Command::new(&self.bin)
            .args(args)
            .output()
            .await
            .map_err(|e| routing_err(format!("failed to run {}: {e}", self.bin.display())))?;

        if !output.status.success() {
            return Err(routing_err(format!(
                "{} {} failed: {}",
                self.bin.display(),
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn is_local(&self, prefix: &IpNet) -> bool {
        self.advertised
            .lock()
            .iter()
            .any(|own| own.contains(prefix) || prefix.contains(own))
    }

    /// Mirror one RIB change into the host routing table.
    ///
    /// Paths for prefixes this host advertises are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the route cannot be installed or removed.
    pub async fn apply_event(&self, parent_index: u32, event: &RibEvent) -> LanyardResult<()> {
        if event.nexthop.is_unspecified() || self.is_local(&event.prefix) {
            tracing::debug!(prefix = %event.prefix, "Ignoring locally originated path");
            return Ok(());
        }
        if event.withdrawal {
            tracing::info!(
                prefix = %event.prefix,
                nexthop = %event.nexthop,
                "Removing learned route"
            );
            self.links
                .delete_route(event.prefix, event.nexthop, parent_index)
                .await
        } else {
            tracing::info!(
                prefix = %event.prefix,
                nexthop = %event.nexthop,
                "Installing learned route"
            );
            self.links
                .add_route(event.prefix, event.nexthop, parent_index)
                .await
        }
    }

    /// Consume monitor output until EOF or shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream ends before shutdown was requested.
    pub async fn watch_lines<R>(
        &self,
        reader: R,
        parent_index: u32,
        mut shutdown: watch::Receiver<bool>,
    ) -> LanyardResult<()>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let mut lines = reader.lines();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!(parent = %self.parent_iface, "Routing monitor stopped");
                        return Ok(());
                    }
                }
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        return Err(routing_err("monitor stream closed"));
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let events = match parse_monitor_line(&line) {
                        Ok(events) => events,
                        Err(e) => {
                            tracing::warn!(error = %e, "Unparseable monitor output");
                            continue;
                        }
                    };
                    for event in &events {
                        if let Err(e) = self.apply_event(parent_index, event).await {
                            tracing::warn!(
                                prefix = %event.prefix,
                                error = %e,
                                "Failed to sync learned route"
                            );
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl RoutingManager for GobgpManager {
    fn backend(&self) -> RoutingBackend {
        RoutingBackend::Gobgp
    }

    async fn start_monitoring(&self, shutdown: watch::Receiver<bool>) -> LanyardResult<()> {
        let Some(parent_index) = self.links.link_index(&self.parent_iface).await? else {
            return Err(LanyardError::InterfaceNotFound {
                name: self.parent_iface.clone(),
            });
        };

        let mut child = Command::new(&self.bin)
            .args(["-u", &self.control.to_string(), "monitor", "global", "rib", "-j"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| routing_err(format!("failed to start monitor: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| routing_err("monitor has no stdout"))?;

        tracing::info!(
            parent = %self.parent_iface,
            control = %self.control,
            "Routing monitor started"
        );
        let result = self
            .watch_lines(BufReader::new(stdout), parent_index, shutdown)
            .await;
        if let Err(e) = child.kill().await {
            tracing::debug!(error = %e, "Monitor process already exited");
        }
        result
    }

    async fn advertise_route(&self, prefix: IpNet) -> LanyardResult<()> {
        self.run_client(&rib_args(self.control, "add", prefix)).await?;
        self.advertised.lock().insert(prefix);
        tracing::info!(%prefix, parent = %self.parent_iface, "Advertised route");
        Ok(())
    }

    async fn withdraw_route(&self, prefix: IpNet) -> LanyardResult<()> {
        self.run_client(&rib_args(self.control, "del", prefix)).await?;
        self.advertised.lock().remove(&prefix);
        tracing::info!(%prefix, parent = %self.parent_iface, "Withdrew route");
        Ok(())
    }
}
