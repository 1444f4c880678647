//! Instance identity resolution from host network topology.
//!
//! A distributed block backend keys attachment ownership by the source
//! address it observes for a host. [`resolve`] picks that address from the
//! monitor list and the host's interfaces: a shared subnet wins outright
//! (L2), otherwise the kernel routing table decides (L3). The resolver never
//! guesses; an address that is not bound to a local interface is an error.

use std::ffi::OsString;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Result, StorageError};
use crate::runner::CommandRunner;

/// An address bound to a local interface together with its prefix length.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct InterfaceAddr {
    /// Address assigned to the interface.
    pub ip: IpAddr,
    /// Network prefix length, for example `24`.
    pub prefix_len: u8,
}

impl InterfaceAddr {
    /// Creates an interface address, rejecting prefixes longer than the
    /// address family allows.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] when `prefix_len` is too long.
    pub fn new(ip: IpAddr, prefix_len: u8) -> Result<Self> {
        let max = match ip {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix_len > max {
            return Err(StorageError::Validation(format!(
                "prefix /{prefix_len} is too long for {ip}"
            )));
        }
        Ok(Self { ip, prefix_len })
    }

    /// Whether `other` lies in the same network as this address.
    #[must_use]
    pub fn shares_subnet(&self, other: IpAddr) -> bool {
        match (self.ip, other) {
            (IpAddr::V4(local), IpAddr::V4(remote)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                u32::from(local) & mask == u32::from(remote) & mask
            }
            (IpAddr::V6(local), IpAddr::V6(remote)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                u128::from(local) & mask == u128::from(remote) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for InterfaceAddr {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s.split_once('/').ok_or_else(|| {
            StorageError::Validation(format!("interface address {s} lacks a prefix"))
        })?;
        let ip = addr
            .parse::<IpAddr>()
            .map_err(|err| StorageError::Validation(format!("{addr}: {err}")))?;
        let prefix_len = prefix
            .parse::<u8>()
            .map_err(|err| StorageError::Validation(format!("{prefix}: {err}")))?;
        Self::new(ip, prefix_len)
    }
}

impl fmt::Display for InterfaceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix_len)
    }
}

/// Parses monitor addresses, stripping ports, brackets and messenger
/// decoration (`v2:`, `/0`).
///
/// # Errors
///
/// Returns [`StorageError::Resolution`] for the first entry that is not an
/// IP address in any accepted form.
pub fn parse_monitor_addresses<S: AsRef<str>>(monitors: &[S]) -> Result<Vec<IpAddr>> {
    monitors
        .iter()
        .map(|raw| parse_monitor_address(raw.as_ref()))
        .collect()
}

/// Parses a single monitor address. See [`parse_monitor_addresses`].
///
/// # Errors
///
/// Returns [`StorageError::Resolution`] when `raw` is not an address.
pub fn parse_monitor_address(raw: &str) -> Result<IpAddr> {
    let mut text = raw.trim();
    for prefix in ["v1:", "v2:"] {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest;
        }
    }
    if let Some((addr, nonce)) = text.rsplit_once('/') {
        if !nonce.is_empty() && nonce.bytes().all(|b| b.is_ascii_digit()) {
            text = addr;
        }
    }

    if let Ok(ip) = text.parse::<IpAddr>() {
        return Ok(ip);
    }
    if let Ok(sock) = text.parse::<SocketAddr>() {
        return Ok(sock.ip());
    }
    let bracketed = text
        .strip_prefix('[')
        .and_then(|rest| rest.split_once(']'))
        .and_then(|(inner, _)| inner.parse::<IpAddr>().ok());
    if let Some(ip) = bracketed {
        return Ok(ip);
    }
    Err(StorageError::Resolution(format!(
        "invalid monitor address {raw:?}"
    )))
}

/// Splits a `mon_host` value into individual monitor entries.
///
/// Handles comma, semicolon and whitespace separators as well as bracketed
/// address vectors such as `[v2:10.0.0.1:3300/0,v1:10.0.0.1:6789/0]`.
#[must_use]
pub fn split_mon_host(value: &str) -> Vec<String> {
    value
        .split([',', ';', ' ', '\t', '\n'])
        .map(|raw| {
            let trimmed = raw.trim();
            let opened = match trimmed.strip_prefix('[') {
                Some(rest) if rest.starts_with("v1:") || rest.starts_with("v2:") => rest,
                _ => trimmed,
            };
            match opened.strip_suffix(']') {
                Some(rest) if rest.matches('[').count() == rest.matches(']').count() => rest,
                _ => opened,
            }
        })
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Finds the local source address the kernel would use for a destination.
#[async_trait]
pub trait RouteLookup: Send + Sync {
    /// Returns the preferred source address for `dest`, or `None` when no
    /// route exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the routing table cannot be queried.
    async fn source_for(&self, dest: IpAddr) -> Result<Option<IpAddr>>;
}

/// Returns the first interface address sharing a subnet with a monitor,
/// scanning monitors in order and then interfaces in order.
#[must_use]
pub fn resolve_l2(monitors: &[IpAddr], interfaces: &[InterfaceAddr]) -> Option<IpAddr> {
    monitors.iter().find_map(|monitor| {
        interfaces
            .iter()
            .find(|iface| iface.shares_subnet(*monitor))
            .map(|iface| iface.ip)
    })
}

/// Determines the address a backend cluster will observe for this host.
///
/// # Errors
///
/// Returns [`StorageError::Resolution`] when there are no monitors or
/// interfaces, when no route reaches any monitor, or when the routed source
/// address is not bound to a local interface. A transient routing lookup
/// failure is returned as-is so callers may retry it.
pub async fn resolve(
    monitors: &[IpAddr],
    interfaces: &[InterfaceAddr],
    routes: &dyn RouteLookup,
) -> Result<IpAddr> {
    if monitors.is_empty() {
        return Err(StorageError::Resolution(String::from(
            "no monitor addresses configured",
        )));
    }
    if interfaces.is_empty() {
        return Err(StorageError::Resolution(String::from(
            "host has no candidate interface addresses",
        )));
    }

    if let Some(ip) = resolve_l2(monitors, interfaces) {
        debug!(%ip, "resolved instance address on a shared subnet");
        return Ok(ip);
    }

    let mut last_error = None;
    for monitor in monitors {
        match routes.source_for(*monitor).await {
            Ok(Some(src)) if interfaces.iter().any(|iface| iface.ip == src) => {
                debug!(%src, %monitor, "resolved instance address via routing table");
                return Ok(src);
            }
            Ok(Some(src)) => {
                warn!(%src, %monitor, "routed source address is not bound locally");
                last_error = Some(StorageError::Resolution(format!(
                    "route to {monitor} uses {src}, which is not a local interface address"
                )));
            }
            Ok(None) => {
                last_error = Some(StorageError::Resolution(format!("no route to {monitor}")));
            }
            Err(err) => last_error = Some(err),
        }
    }

    Err(match last_error {
        Some(err) if err.is_retryable() => err,
        Some(StorageError::Resolution(message)) => StorageError::Resolution(message),
        Some(other) => StorageError::Resolution(other.to_string()),
        None => StorageError::Resolution(String::from("no monitor is reachable")),
    })
}

/// `ip(8)` front end used for interface discovery and route lookups.
#[derive(Clone)]
pub struct IpTool {
    runner: Arc<dyn CommandRunner>,
    program: String,
    timeout: Duration,
}

impl fmt::Debug for IpTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpTool")
            .field("program", &self.program)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl IpTool {
    /// Creates a front end running `program` through `runner`.
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runner,
            program: program.into(),
            timeout,
        }
    }

    async fn query(&self, args: &[&str]) -> Result<String> {
        let argv: Vec<OsString> = args.iter().map(OsString::from).collect();
        let output = self.runner.run(&self.program, &argv, self.timeout).await?;
        if !output.is_success() {
            return Err(StorageError::Transport(format!(
                "{} {} failed: {}",
                self.program,
                args.join(" "),
                output.diagnostics()
            )));
        }
        Ok(output.stdout)
    }

    /// Lists every address bound to a local interface.
    ///
    /// # Errors
    ///
    /// Returns an error when `ip -o addr show` fails.
    pub async fn interfaces(&self) -> Result<Vec<InterfaceAddr>> {
        let stdout = self.query(&["-o", "addr", "show"]).await?;
        Ok(parse_addr_show(&stdout))
    }
}

#[async_trait]
impl RouteLookup for IpTool {
    async fn source_for(&self, dest: IpAddr) -> Result<Option<IpAddr>> {
        let dest_text = dest.to_string();
        match self.query(&["-o", "route", "get", &dest_text]).await {
            Ok(stdout) => Ok(parse_route_source(&stdout)),
            // `ip route get` exits non-zero for unreachable destinations.
            Err(StorageError::Transport(message)) if message.contains("unreachable") => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Parses `ip -o addr show` output into interface addresses.
///
/// Lines that do not carry an `inet`/`inet6` entry are skipped.
#[must_use]
pub fn parse_addr_show(stdout: &str) -> Vec<InterfaceAddr> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            tokens.find(|token| *token == "inet" || *token == "inet6")?;
            tokens.next()?.parse().ok()
        })
        .collect()
}

/// Extracts the `src` address from `ip -o route get` output.
#[must_use]
pub fn parse_route_source(stdout: &str) -> Option<IpAddr> {
    let mut tokens = stdout.split_whitespace();
    tokens.find(|token| *token == "src")?;
    tokens.next()?.parse().ok()
}
