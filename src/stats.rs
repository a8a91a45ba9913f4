//! Self-telemetry loop (spec §4.F): every five minutes, snapshot every
//! log's counters and append anything with activity as one JSON record to
//! the reserved `_kaf` log.

use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

use crate::actor::StatSnapshot;
use crate::registry::{RegistryHandle, RESERVED_STATS_LOG};

const TICK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Spawns the stats loop as a background task; it runs until the process
/// exits, there being no shutdown state in the core (spec §4.C "State
/// machine").
pub fn spawn(registry: RegistryHandle) {
    tokio::spawn(run(registry));
}

async fn run(registry: RegistryHandle) {
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    let mut statno: u64 = 0;
    loop {
        ticker.tick().await;
        statno += 1;
        tick(&registry, statno).await;
    }
}

async fn tick(registry: &RegistryHandle, statno: u64) {
    let start = Utc::now();
    let actors = registry.enumerate_all().await;

    let mut entries = Vec::new();
    for handle in &actors {
        if handle.name == RESERVED_STATS_LOG {
            continue;
        }
        match handle.stat().await {
            Ok(snapshot) if snapshot.gets + snapshot.puts > 0 || snapshot.errs > 0 => {
                entries.push(render_entry(&snapshot));
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(log = %handle.name, error = %err, "failed to collect stats"),
        }
    }

    if entries.is_empty() {
        return;
    }

    let end = Utc::now();
    let body = json!({
        "start": start.to_rfc3339(),
        "end": end.to_rfc3339(),
        "statno": statno,
        "logs": entries,
    });

    match registry.lookup_or_create(RESERVED_STATS_LOG, true).await {
        Ok(Some(stats_log)) => {
            let payload = serde_json::to_vec(&body).expect("stats object always serializes");
            if let Err(err) = stats_log.put(payload).await {
                tracing::warn!(error = %err, "failed to append stats record");
            }
        }
        Ok(None) => unreachable!("lookup_or_create(create=true) never returns None"),
        Err(err) => tracing::warn!(error = %err, "failed to resolve _kaf log"),
    }
}

/// Errors-present and any-activity entries are the only two shapes the
/// current flow can emit (see spec §4.F); the bare `{"name","last"}` shape
/// is part of the contract but unreachable here since step 2 already
/// filters out logs with no activity and no errors.
fn render_entry(snapshot: &StatSnapshot) -> Value {
    if snapshot.errs > 0 {
        json!({
            "name": snapshot.name,
            "last": snapshot.lastmsg,
            "gets": snapshot.gets,
            "puts": snapshot.puts,
            "errs": snapshot.errs,
        })
    } else {
        json!({
            "name": snapshot.name,
            "last": snapshot.lastmsg,
            "gets": snapshot.gets,
            "puts": snapshot.puts,
        })
    }
}
