//! Built-in clock app
//!
//! Pinning `cellhost://clock` streams one `text:time` upsert per tick.
//! `cellhost://clock/local` reports local time instead of UTC.

use async_trait::async_trait;
use cellhost_core::{App, AppInstance, PinContext, PinReq, Result, TextVal};
use cellhost_types::{CellOp, Uid};
use chrono::{Local, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub const CLOCK_UID: Uid = Uid(0xc10c);
pub const CLOCK_INVOCATION: &str = "cellhost://clock";
pub const TIME_ATTR: &str = "text:time";

pub fn clock_app(interval: Duration) -> App {
    App::from_fn(CLOCK_UID, "clock", move |ctx| {
        let time_attr = ctx.resolve_attr(TIME_ATTR)?.id;
        Ok(Arc::new(Clock { interval, time_attr }) as Arc<dyn AppInstance>)
    })
    .with_invocation(CLOCK_INVOCATION)
    .with_attr(TIME_ATTR)
}

struct Clock {
    interval: Duration,
    time_attr: u32,
}

fn now(local: bool) -> String {
    if local {
        Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        Utc::now().to_rfc3339()
    }
}

async fn tick(pin: PinContext, interval: Duration, time_attr: u32) {
    let local = pin.url_path().first().is_some_and(|seg| seg == "local");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tx = pin.new_tx();

    loop {
        tokio::select! {
            _ = pin.closing() => break,
            _ = ticker.tick() => {}
        }
        tx.clear();
        tx.req_id = pin.req_id();
        let val = TextVal(now(local));
        if !pin.marshal_cell_op(&mut tx, CellOp::upsert(pin.cell(), time_attr), Some(&val)) {
            // The client has not defined the attr yet; nothing to send
            continue;
        }
        if let Err(e) = pin.push_tx(&tx).await {
            debug!(pin = %pin.label(), error = %e, "clock stopped");
            break;
        }
    }
}

#[async_trait]
impl AppInstance for Clock {
    async fn pin_cell(&self, pin: PinContext) -> Result<()> {
        tokio::spawn(tick(pin, self.interval, self.time_attr));
        Ok(())
    }

    async fn on_stop(&self) {
        debug!("clock instance stopped");
    }
}
