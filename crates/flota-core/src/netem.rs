//! Link degradation through in-container traffic control.
//!
//! A [`NetworkCondition`] is validated once when built and rendered into
//! `tc` argument vectors. The [`NetemInjector`] executes them inside the
//! target container, replacing whatever rule set was there before.
//!
//! Rule layout on the interface:
//!
//! ```text
//! root 1:  netem  [delay D [J]] [loss L%] [corrupt C%] [duplicate P%] [reorder R%]
//!  └─ 10:  tbf    rate <rate> burst <burst> latency <latency>   (bandwidth cap only)
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancel::until_cancelled;
use crate::config::ClusterConfig;
use crate::descriptor::InstanceDescriptor;
use crate::error::{FlotaError, Result};
use crate::runtime::{ExecOutput, RuntimeAdapter};

// =============================================================================
// Bandwidth
// =============================================================================

/// Units accepted by `tc` for rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateUnit {
    /// Bits per second.
    Bit,
    /// Kilobits per second.
    Kbit,
    /// Megabits per second.
    Mbit,
    /// Gigabits per second.
    Gbit,
    /// Bytes per second.
    Bps,
    /// Kilobytes per second.
    Kbps,
    /// Megabytes per second.
    Mbps,
    /// Gigabytes per second.
    Gbps,
}

impl RateUnit {
    const ALL: [Self; 8] = [
        Self::Kbit,
        Self::Mbit,
        Self::Gbit,
        Self::Kbps,
        Self::Mbps,
        Self::Gbps,
        Self::Bit,
        Self::Bps,
    ];

    /// Returns the unit as written in `tc` syntax.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bit => "bit",
            Self::Kbit => "kbit",
            Self::Mbit => "mbit",
            Self::Gbit => "gbit",
            Self::Bps => "bps",
            Self::Kbps => "kbps",
            Self::Mbps => "mbps",
            Self::Gbps => "gbps",
        }
    }
}

/// A bandwidth cap such as `256kbit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bandwidth {
    amount: String,
    unit: RateUnit,
}

impl Bandwidth {
    /// Returns the numeric part as written.
    #[must_use]
    pub fn amount(&self) -> &str {
        &self.amount
    }

    /// Returns the unit.
    #[must_use]
    pub const fn unit(&self) -> RateUnit {
        self.unit
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.as_str())
    }
}

impl FromStr for Bandwidth {
    type Err = FlotaError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        // Longer suffixes are listed first so "kbit" never parses as "k" + "bit".
        let (amount, unit) = RateUnit::ALL
            .iter()
            .find_map(|unit| {
                lower
                    .strip_suffix(unit.as_str())
                    .map(|amount| (amount.to_string(), *unit))
            })
            .ok_or_else(|| {
                FlotaError::invalid_condition(format!(
                    "rate {s:?} must end in bit, kbit, mbit, gbit, bps, kbps, mbps or gbps"
                ))
            })?;

        let well_formed = !amount.is_empty()
            && !amount.starts_with('.')
            && !amount.ends_with('.')
            && amount.chars().filter(|c| *c == '.').count() <= 1
            && amount.chars().all(|c| c.is_ascii_digit() || c == '.');
        if !well_formed {
            return Err(FlotaError::invalid_condition(format!(
                "rate {s:?} must be a number followed by a unit"
            )));
        }
        if !matches!(amount.parse::<f64>(), Ok(v) if v > 0.0) {
            return Err(FlotaError::invalid_condition(format!(
                "rate {s:?} must be greater than zero"
            )));
        }

        Ok(Self { amount, unit })
    }
}

// =============================================================================
// NetworkCondition
// =============================================================================

/// A validated set of link impairments. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkCondition {
    bandwidth: Option<Bandwidth>,
    loss: Option<f64>,
    corrupt: Option<f64>,
    reorder: Option<f64>,
    duplicate: Option<f64>,
    delay_ms: Option<u32>,
    jitter_ms: Option<u32>,
}

impl NetworkCondition {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> NetworkConditionBuilder {
        NetworkConditionBuilder::default()
    }

    /// Returns a condition with no impairments; applying it clears the link.
    #[must_use]
    pub fn clean() -> Self {
        Self::default()
    }

    /// Returns the bandwidth cap.
    #[must_use]
    pub const fn bandwidth(&self) -> Option<&Bandwidth> {
        self.bandwidth.as_ref()
    }

    /// Returns the packet loss percentage.
    #[must_use]
    pub const fn loss(&self) -> Option<f64> {
        self.loss
    }

    /// Returns the corruption percentage.
    #[must_use]
    pub const fn corrupt(&self) -> Option<f64> {
        self.corrupt
    }

    /// Returns the reorder percentage.
    #[must_use]
    pub const fn reorder(&self) -> Option<f64> {
        self.reorder
    }

    /// Returns the duplication percentage.
    #[must_use]
    pub const fn duplicate(&self) -> Option<f64> {
        self.duplicate
    }

    /// Returns the added delay in milliseconds.
    #[must_use]
    pub const fn delay_ms(&self) -> Option<u32> {
        self.delay_ms
    }

    /// Returns the delay jitter in milliseconds.
    #[must_use]
    pub const fn jitter_ms(&self) -> Option<u32> {
        self.jitter_ms
    }

    /// Returns true if no impairment is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bandwidth.is_none() && !self.has_netem_params()
    }

    const fn has_netem_params(&self) -> bool {
        self.loss.is_some()
            || self.corrupt.is_some()
            || self.reorder.is_some()
            || self.duplicate.is_some()
            || self.delay_ms.is_some()
    }

    /// Arguments deleting the root discipline on `iface`.
    #[must_use]
    pub fn del_args(iface: &str) -> Vec<String> {
        to_args(&["qdisc", "del", "dev", iface, "root"])
    }

    /// Arguments listing the disciplines on `iface`.
    #[must_use]
    pub fn show_args(iface: &str) -> Vec<String> {
        to_args(&["qdisc", "show", "dev", iface])
    }

    /// Arguments installing the root netem discipline on `iface`.
    ///
    /// With only a bandwidth cap set the netem carries no parameters and
    /// serves as the parent of the rate limiter.
    #[must_use]
    pub fn netem_args(&self, iface: &str) -> Vec<String> {
        let mut args = to_args(&["qdisc", "add", "dev", iface, "root", "handle", "1:", "netem"]);

        if let Some(delay) = self.delay_ms {
            args.push("delay".into());
            args.push(format!("{delay}ms"));
            if let Some(jitter) = self.jitter_ms {
                args.push(format!("{jitter}ms"));
            }
        }
        for (keyword, value) in [
            ("loss", self.loss),
            ("corrupt", self.corrupt),
            ("duplicate", self.duplicate),
            ("reorder", self.reorder),
        ] {
            if let Some(percent) = value {
                args.push(keyword.into());
                args.push(format!("{percent}%"));
            }
        }

        args
    }

    /// Arguments installing the rate limiter under the root netem, if a
    /// bandwidth cap is set.
    #[must_use]
    pub fn tbf_args(&self, iface: &str, burst: &str, latency: &str) -> Option<Vec<String>> {
        let rate = self.bandwidth.as_ref()?.to_string();
        Some(to_args(&[
            "qdisc", "add", "dev", iface, "parent", "1:1", "handle", "10:", "tbf", "rate", &rate,
            "burst", burst, "latency", latency,
        ]))
    }
}

fn to_args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

/// Builder for [`NetworkCondition`].
#[derive(Debug, Clone, Default)]
pub struct NetworkConditionBuilder {
    bandwidth: Option<String>,
    loss: Option<f64>,
    corrupt: Option<f64>,
    reorder: Option<f64>,
    duplicate: Option<f64>,
    delay_ms: Option<u32>,
    jitter_ms: Option<u32>,
}

impl NetworkConditionBuilder {
    /// Caps bandwidth, e.g. `"256kbit"`.
    #[must_use]
    pub fn bandwidth(mut self, rate: impl Into<String>) -> Self {
        self.bandwidth = Some(rate.into());
        self
    }

    /// Drops this percentage of packets.
    #[must_use]
    pub const fn loss(mut self, percent: f64) -> Self {
        self.loss = Some(percent);
        self
    }

    /// Corrupts this percentage of packets.
    #[must_use]
    pub const fn corrupt(mut self, percent: f64) -> Self {
        self.corrupt = Some(percent);
        self
    }

    /// Reorders this percentage of packets. Requires a delay.
    #[must_use]
    pub const fn reorder(mut self, percent: f64) -> Self {
        self.reorder = Some(percent);
        self
    }

    /// Duplicates this percentage of packets.
    #[must_use]
    pub const fn duplicate(mut self, percent: f64) -> Self {
        self.duplicate = Some(percent);
        self
    }

    /// Delays every packet.
    #[must_use]
    pub const fn delay_ms(mut self, ms: u32) -> Self {
        self.delay_ms = Some(ms);
        self
    }

    /// Adds jitter to the delay. Requires a delay.
    #[must_use]
    pub const fn jitter_ms(mut self, ms: u32) -> Self {
        self.jitter_ms = Some(ms);
        self
    }

    /// Validates and builds the condition.
    ///
    /// # Errors
    /// Returns `InvalidCondition` for a percentage outside `[0, 100]`, jitter
    /// or reorder without a delay, or a malformed rate.
    pub fn build(self) -> Result<NetworkCondition> {
        for (name, value) in [
            ("loss", self.loss),
            ("corrupt", self.corrupt),
            ("reorder", self.reorder),
            ("duplicate", self.duplicate),
        ] {
            if let Some(percent) = value {
                if !(percent.is_finite() && (0.0..=100.0).contains(&percent)) {
                    return Err(FlotaError::invalid_condition(format!(
                        "{name} must be between 0 and 100, got {percent}"
                    )));
                }
            }
        }
        if self.delay_ms.is_none() {
            if self.jitter_ms.is_some() {
                return Err(FlotaError::invalid_condition("jitter requires a delay"));
            }
            if self.reorder.is_some() {
                return Err(FlotaError::invalid_condition("reorder requires a delay"));
            }
        }
        let bandwidth = self.bandwidth.as_deref().map(str::parse).transpose()?;

        Ok(NetworkCondition {
            bandwidth,
            loss: self.loss,
            corrupt: self.corrupt,
            reorder: self.reorder,
            duplicate: self.duplicate,
            delay_ms: self.delay_ms,
            jitter_ms: self.jitter_ms,
        })
    }
}

// =============================================================================
// NetemInjector
// =============================================================================

/// Applies network conditions to launched instances.
pub struct NetemInjector {
    runtime: Arc<dyn RuntimeAdapter>,
    burst: String,
    latency: String,
}

impl NetemInjector {
    /// Creates an injector using the rate-limiter settings from `config`.
    #[must_use]
    pub fn new(runtime: Arc<dyn RuntimeAdapter>, config: &ClusterConfig) -> Self {
        Self {
            runtime,
            burst: config.tbf_burst.clone(),
            latency: config.tbf_latency.clone(),
        }
    }

    /// Replaces the rule set on `iface` of `desc` with `condition`.
    ///
    /// If installing the new rules fails, the root discipline is deleted
    /// again so the link is left clean rather than half-configured.
    ///
    /// # Errors
    /// Returns `NotLaunched` for an unlaunched descriptor,
    /// `NetworkConditionApplyFailed` if a rule cannot be installed, or
    /// `Cancelled`.
    pub async fn apply(
        &self,
        desc: &InstanceDescriptor,
        condition: &NetworkCondition,
        iface: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let container_id = desc.require_assignment()?.container_id.as_str();

        // No rule may exist yet, so a failing delete is expected.
        let cleared = self
            .tc(container_id, iface, NetworkCondition::del_args(iface), cancel)
            .await?;
        if !cleared.success() {
            debug!(container_id = %container_id, iface = %iface, "no previous rules");
        }

        if condition.is_empty() {
            info!(instance = %desc.name(), iface = %iface, "network condition cleared");
            return Ok(());
        }

        let mut steps = vec![condition.netem_args(iface)];
        steps.extend(condition.tbf_args(iface, &self.burst, &self.latency));

        for args in steps {
            let out = match self.tc(container_id, iface, args, cancel).await {
                Ok(out) => out,
                Err(e) => {
                    self.rollback(container_id, iface).await;
                    return Err(e);
                }
            };
            if !out.success() {
                self.rollback(container_id, iface).await;
                return Err(apply_failed(container_id, iface, failure_reason(&out)));
            }
        }

        info!(
            instance = %desc.name(),
            container_id = %container_id,
            iface = %iface,
            condition = ?condition,
            "network condition applied"
        );
        Ok(())
    }

    /// Removes all rules from `iface` of `desc`.
    ///
    /// # Errors
    /// See [`NetemInjector::apply`].
    pub async fn clear(
        &self,
        desc: &InstanceDescriptor,
        iface: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.apply(desc, &NetworkCondition::clean(), iface, cancel)
            .await
    }

    /// Returns the output of `tc qdisc show` for `iface` of `desc`.
    ///
    /// # Errors
    /// Returns `NotLaunched`, `NetworkConditionApplyFailed` if the listing
    /// fails, or `Cancelled`.
    pub async fn rules(
        &self,
        desc: &InstanceDescriptor,
        iface: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let container_id = desc.require_assignment()?.container_id.as_str();
        let out = self
            .tc(container_id, iface, NetworkCondition::show_args(iface), cancel)
            .await?;
        if !out.success() {
            return Err(apply_failed(container_id, iface, failure_reason(&out)));
        }
        Ok(out.stdout)
    }

    async fn tc(
        &self,
        container_id: &str,
        iface: &str,
        args: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput> {
        let mut cmd = Vec::with_capacity(args.len() + 1);
        cmd.push("tc".to_string());
        cmd.extend(args);
        debug!(container_id = %container_id, cmd = %cmd.join(" "), "exec");

        until_cancelled(
            cancel,
            &format!("tc on {container_id}"),
            self.runtime.exec(container_id, &cmd),
        )
        .await?
        .map_err(|e| apply_failed(container_id, iface, e.to_string()))
    }

    async fn rollback(&self, container_id: &str, iface: &str) {
        let mut cmd = vec!["tc".to_string()];
        cmd.extend(NetworkCondition::del_args(iface));
        match self.runtime.exec(container_id, &cmd).await {
            Ok(out) if out.success() => {
                debug!(container_id = %container_id, iface = %iface, "partial rules removed");
            }
            Ok(out) => {
                debug!(container_id = %container_id, iface = %iface, stderr = %out.stderr.trim(), "nothing to roll back");
            }
            Err(e) => {
                warn!(container_id = %container_id, iface = %iface, error = %e, "rollback failed");
            }
        }
    }
}

fn apply_failed(container_id: &str, iface: &str, reason: String) -> FlotaError {
    FlotaError::NetworkConditionApplyFailed {
        container_id: container_id.to_string(),
        interface: iface.to_string(),
        reason,
    }
}

fn failure_reason(out: &ExecOutput) -> String {
    let stderr = out.stderr.trim();
    match out.exit_code {
        Some(code) if stderr.is_empty() => format!("tc exited with status {code}"),
        Some(code) => format!("tc exited with status {code}: {stderr}"),
        None => format!("tc exit status unknown: {stderr}"),
    }
}
