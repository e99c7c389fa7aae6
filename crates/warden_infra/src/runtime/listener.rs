//! Position stream listener (CONTRACT.md §6).
//!
//! Runs independently of the cycle drivers: closes can land while a cycle
//! is mid-flight, and the loss streak must be current before the next
//! RISK_CHECK. Acks follow handling, so a crash replays the batch; the
//! book absorbs replayed updates without emitting a second close.

use std::time::Duration;

use tracing::{info, warn};
use warden_core::lifecycle::{CloseEvent, PositionUpdate};

use crate::bus::channels;
use crate::runtime::{AlertSeverity, Orchestrator};

const POSITION_GROUP: &str = "warden:positions";

impl Orchestrator {
    pub(crate) async fn position_listener(&self) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            self.drain_positions().await;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    /// Consume pending position updates; ack after handling.
    pub async fn drain_positions(&self) {
        let batch = match self
            .bus
            .fetch(channels::TRADE_POSITIONS, POSITION_GROUP, 32)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "position fetch failed");
                return;
            }
        };
        for envelope in batch {
            match serde_json::from_value::<PositionUpdate>(envelope.payload.clone()) {
                Ok(update) => {
                    let close = self.book.lock().ok().and_then(|mut b| b.apply(&update));
                    if let Some(close) = close {
                        self.handle_close(close).await;
                    }
                }
                Err(e) => warn!(error = %e, "unreadable position update"),
            }
            if let Err(e) = self
                .bus
                .ack(channels::TRADE_POSITIONS, POSITION_GROUP, envelope.id)
                .await
            {
                warn!(error = %e, "position ack failed");
            }
        }
    }

    /// Fold a confirmed close into the safety state, journal it, publish
    /// it outward, and poke the reflection trigger.
    pub async fn handle_close(&self, close: CloseEvent) {
        let equity = self
            .account
            .lock()
            .map(|a| a.equity)
            .unwrap_or(self.settings.default_equity);

        let (event, streak, cooldown_started) = match self.risk.lock() {
            Ok(mut risk) => {
                let before = risk.state().cooldown_until_ms;
                let event = risk.update_on_trade_close(close.realized_pnl, equity, close.ts_ms);
                let after = risk.state().cooldown_until_ms;
                (
                    Some(event),
                    risk.state().consecutive_losses,
                    after.is_some() && after != before,
                )
            }
            Err(_) => (None, 0, false),
        };
        if let Some(event) = event {
            self.journal_safety(event);
        }
        info!(
            instrument = %close.instrument,
            side = close.side.as_str(),
            pnl = close.realized_pnl,
            streak,
            "position closed"
        );
        if cooldown_started {
            self.publish_alert(
                AlertSeverity::Warning,
                "cooldown",
                serde_json::json!({
                    "cause": "loss_streak",
                    "streak": streak,
                    "instrument": close.instrument,
                }),
            )
            .await;
        }

        if let Err(e) =
            crate::bus::publish_json(self.bus.as_ref(), channels::TRADE_CLOSES, &close).await
        {
            warn!(error = %e, "close publish failed");
        }
        self.remember_close(close);
        self.maybe_reflect().await;
    }
}
