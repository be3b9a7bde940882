use super::almanac::AlmanacTransfer;
use super::assistance::plan_assistance;
use crate::config::ReactorConfig;
use crate::error::Result;
use crate::model::document::{DeviceDocument, GnssState};
use crate::model::lorawan::DevEui;
use crate::model::merge::merge_into;
use crate::model::position::Position;
use crate::solver::Solver;
use crate::storage::StateStore;
use crate::transport::DownlinkSender;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Rules in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Resolve positioning payloads through the solver, push the solution as
    /// assistance position
    PositionSolve,
    /// Seed a device that has never been given an assistance position with
    /// the gateway location
    AssistanceGap,
    /// Refresh an almanac past its maximum age
    AlmanacStaleness,
}

impl Rule {
    pub const ORDER: [Rule; 3] = [Rule::PositionSolve, Rule::AssistanceGap, Rule::AlmanacStaleness];

    pub fn name(&self) -> &'static str {
        match self {
            Rule::PositionSolve => "position-solve",
            Rule::AssistanceGap => "assistance-gap",
            Rule::AlmanacStaleness => "almanac-staleness",
        }
    }
}

/// Everything a rule may look at for one uplink
pub struct RuleContext<'a> {
    pub sender: &'a Arc<dyn DownlinkSender>,
    pub dev_eui: &'a DevEui,
    /// Fragment the decoder just produced
    pub decoded: &'a Map<String, Value>,
    pub event_time: DateTime<Utc>,
    pub gateway_position: Option<Position>,
    pub max_downlink_size: Option<usize>,
}

pub struct RuleEngine {
    config: ReactorConfig,
    solver: Arc<dyn Solver>,
    store: Arc<StateStore>,
    transfers: TaskTracker,
}

impl RuleEngine {
    pub fn new(config: ReactorConfig, solver: Arc<dyn Solver>, store: Arc<StateStore>) -> Self {
        Self {
            config,
            solver,
            store,
            transfers: TaskTracker::new(),
        }
    }

    /// Run every rule in order over `next`, merging each rule's update before
    /// the following rule runs. A failing rule contributes nothing; its error
    /// is recorded and evaluation goes on.
    pub async fn evaluate(&self, ctx: &RuleContext<'_>, mut next: DeviceDocument) -> DeviceDocument {
        for rule in Rule::ORDER {
            let update = match self.apply(rule, ctx, &next).await {
                Ok(Some(update)) => update,
                Ok(None) => continue,
                Err(e) => {
                    warn!(dev_eui = %ctx.dev_eui, rule = rule.name(), "Rule failed: {}", e);
                    self.store.record_error(ctx.dev_eui, &e);
                    continue;
                }
            };

            match next.merge_fields(update) {
                Ok(merged) => {
                    debug!(dev_eui = %ctx.dev_eui, rule = rule.name(), "Rule update merged");
                    next = merged;
                }
                Err(e) => {
                    warn!(dev_eui = %ctx.dev_eui, rule = rule.name(), "Rule update rejected: {}", e);
                    self.store.record_error(ctx.dev_eui, &e);
                }
            }
        }
        next
    }

    async fn apply(
        &self,
        rule: Rule,
        ctx: &RuleContext<'_>,
        next: &DeviceDocument,
    ) -> Result<Option<Map<String, Value>>> {
        match rule {
            Rule::PositionSolve => self.position_solve(ctx, next).await,
            Rule::AssistanceGap => self.assistance_gap(ctx, next).await,
            Rule::AlmanacStaleness => self.almanac_staleness(ctx, next),
        }
    }

    async fn position_solve(
        &self,
        ctx: &RuleContext<'_>,
        next: &DeviceDocument,
    ) -> Result<Option<Map<String, Value>>> {
        let Some(mut solved) = self.solver.solve_position(ctx.decoded).await? else {
            return Ok(None);
        };
        let Some(position) = Position::from_fields(&solved) else {
            debug!(dev_eui = %ctx.dev_eui, "Solver result has no position");
            return Ok(None);
        };

        info!(
            dev_eui = %ctx.dev_eui,
            latitude = position.latitude,
            longitude = position.longitude,
            "Position solved"
        );

        if let Some(update) = self.assist(ctx, next, Some(position)).await? {
            merge_into(&mut solved, update);
        }
        Ok(Some(solved))
    }

    async fn assistance_gap(
        &self,
        ctx: &RuleContext<'_>,
        next: &DeviceDocument,
    ) -> Result<Option<Map<String, Value>>> {
        match &next.gnss {
            Some(gnss) if gnss.assistance_latitude.is_none() => {
                self.assist(ctx, next, ctx.gateway_position).await
            }
            _ => Ok(None),
        }
    }

    /// Send an assistance position if the gate lets it through. The attempt
    /// is recorded even when the send fails.
    async fn assist(
        &self,
        ctx: &RuleContext<'_>,
        next: &DeviceDocument,
        candidate: Option<Position>,
    ) -> Result<Option<Map<String, Value>>> {
        let Some(plan) = plan_assistance(
            next.gnss.as_ref(),
            candidate,
            ctx.event_time,
            self.config.assistance_interval(),
        ) else {
            return Ok(None);
        };

        match ctx.sender.send_downlink(ctx.dev_eui, &plan.downlink).await {
            Ok(()) => info!(
                dev_eui = %ctx.dev_eui,
                payload = %plan.downlink.hex_payload(),
                "Assistance position sent"
            ),
            Err(e) => {
                warn!(dev_eui = %ctx.dev_eui, "Assistance position not sent: {}", e);
                self.store.record_error(ctx.dev_eui, &e);
            }
        }

        Ok(Some(plan.update.to_fields()?))
    }

    fn almanac_staleness(
        &self,
        ctx: &RuleContext<'_>,
        next: &DeviceDocument,
    ) -> Result<Option<Map<String, Value>>> {
        let Some(gnss) = next.gnss.as_ref() else {
            return Ok(None);
        };
        let Some(almanac_timestamp) = gnss.almanac_timestamp else {
            return Ok(None);
        };

        let age = ctx.event_time - almanac_timestamp;
        if age < self.config.almanac_max_age() {
            return Ok(None);
        }
        if let Some(last_attempt) = gnss.last_almanac_download_attempt {
            if ctx.event_time - last_attempt < self.config.almanac_retry_cooldown() {
                debug!(dev_eui = %ctx.dev_eui, "Almanac stale, retry cooldown active");
                return Ok(None);
            }
        }

        info!(
            dev_eui = %ctx.dev_eui,
            age_days = age.num_days(),
            "Almanac stale, starting download"
        );
        self.spawn_almanac_transfer(ctx);

        let update = DeviceDocument::gnss_update(GnssState {
            last_almanac_download_attempt: Some(ctx.event_time),
            ..Default::default()
        });
        Ok(Some(update.to_fields()?))
    }

    fn spawn_almanac_transfer(&self, ctx: &RuleContext<'_>) {
        let transfer = AlmanacTransfer {
            max_chunk_size: self.config.almanac_max_chunk_size,
            max_downlink_size: ctx.max_downlink_size,
            frame_delay: self.config.almanac_frame_delay(),
        };
        let solver = Arc::clone(&self.solver);
        let sender = Arc::clone(ctx.sender);
        let store = Arc::clone(&self.store);
        let dev_eui = ctx.dev_eui.clone();

        self.transfers.spawn(async move {
            if let Err(e) = transfer.run(solver.as_ref(), sender.as_ref(), &dev_eui).await {
                warn!(dev_eui = %dev_eui, "Almanac transfer failed: {}", e);
                store.record_error(&dev_eui, &e);
            }
        });
    }

    /// Almanac transfers still running
    pub fn pending_transfers(&self) -> usize {
        self.transfers.len()
    }

    /// Stop accepting new transfers and wait for running ones. Returns
    /// `false` if `timeout` elapsed first.
    pub async fn drain_transfers(&self, timeout: Duration) -> bool {
        self.transfers.close();
        tokio::time::timeout(timeout, self.transfers.wait())
            .await
            .is_ok()
    }
}
