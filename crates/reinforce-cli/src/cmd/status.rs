use crate::output::{format_millis, print_json, print_table, yes_no};
use crate::session::{Paths, Session};
use reinforce_core::{policy, QueueKind, SyncCoordinator};
use serde::Serialize;

#[derive(Serialize)]
struct QueueStatus {
    queue: QueueKind,
    pending: usize,
    batch_size: usize,
    last_sync: i64,
    expires_at: i64,
    size_reached: bool,
    timer_expired: bool,
    should_sync: bool,
}

#[derive(Serialize)]
struct CartridgeStatus {
    action_id: String,
    available: usize,
    capacity: usize,
    last_sync: i64,
    expires_at: i64,
    should_sync: bool,
}

#[derive(Serialize)]
struct Status {
    now: i64,
    queues: Vec<QueueStatus>,
    cartridges: Vec<CartridgeStatus>,
}

fn collect(coordinator: &SyncCoordinator) -> Status {
    let now = coordinator.clock().now_millis();

    let queues = QueueKind::all()
        .into_iter()
        .map(|kind| {
            let (meta, pending) = coordinator.queue(kind).meta_and_count();
            let should_sync = match kind {
                QueueKind::Track => policy::track_should_sync(&meta, pending, now),
                QueueKind::Report => policy::report_should_sync(&meta, pending, now),
            };
            QueueStatus {
                queue: kind,
                pending,
                batch_size: meta.suggested_batch_size,
                last_sync: meta.last_sync_timestamp,
                expires_at: meta.expires_at(),
                size_reached: meta.size_reached(pending),
                timer_expired: meta.timer_expired(now),
                should_sync,
            }
        })
        .collect();

    let cartridges = coordinator.cartridges();
    let cartridges = cartridges
        .action_ids()
        .into_iter()
        .map(|id| {
            let c = cartridges.metadata(&id);
            CartridgeStatus {
                should_sync: policy::cartridge_should_sync(&c, now),
                available: c.available_count,
                capacity: c.capacity,
                last_sync: c.last_sync_timestamp,
                expires_at: c.expires_at(),
                action_id: id,
            }
        })
        .collect();

    Status {
        now,
        queues,
        cartridges,
    }
}

pub fn run(paths: &Paths, json: bool) -> anyhow::Result<()> {
    let session = Session::open(paths)?;
    let status = collect(&session.coordinator);

    if json {
        return print_json(&status);
    }

    let rows = status
        .queues
        .iter()
        .map(|q| {
            vec![
                q.queue.to_string(),
                format!("{}/{}", q.pending, q.batch_size),
                format_millis(q.last_sync),
                format_millis(q.expires_at),
                yes_no(q.should_sync),
            ]
        })
        .collect();
    print_table(&["QUEUE", "PENDING", "LAST SYNC", "EXPIRES", "DUE"], rows);

    println!();
    if status.cartridges.is_empty() {
        println!("No cartridges.");
        return Ok(());
    }
    let rows = status
        .cartridges
        .iter()
        .map(|c| {
            vec![
                c.action_id.clone(),
                format!("{}/{}", c.available, c.capacity),
                format_millis(c.last_sync),
                format_millis(c.expires_at),
                yes_no(c.should_sync),
            ]
        })
        .collect();
    print_table(&["CARTRIDGE", "AVAILABLE", "LAST SYNC", "EXPIRES", "DUE"], rows);
    Ok(())
}
