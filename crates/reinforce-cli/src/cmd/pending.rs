use crate::output::{format_millis, print_json, print_table};
use crate::session::{Paths, Session};
use reinforce_core::QueueKind;

pub fn run(paths: &Paths, kind: QueueKind, limit: usize, json: bool) -> anyhow::Result<()> {
    let session = Session::open(paths)?;
    let queue = session.coordinator.queue(kind);
    let records = queue.peek_batch(limit);

    if json {
        return print_json(&records);
    }

    if records.is_empty() {
        println!("{kind} queue is empty.");
        return Ok(());
    }
    let rows = records
        .iter()
        .map(|r| {
            vec![
                r.action_id().to_string(),
                format_millis(r.utc_millis()),
                r.reinforcement_decision().unwrap_or("-").to_string(),
                r.meta_data()
                    .map(|m| serde_json::Value::Object(m.clone()).to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();
    print_table(&["ACTION", "UTC", "DECISION", "META"], rows);

    let total = queue.count();
    if total > records.len() {
        println!("... {} more", total - records.len());
    }
    Ok(())
}
