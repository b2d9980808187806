use crate::output::print_json;
use crate::session::{Paths, Session};
use anyhow::{bail, Context};
use reinforce_core::{ActionRecord, MetaData, QueueKind};
use serde_json::Value;

/// Parse repeated `key=value` flags. Values that parse as JSON keep their
/// type; anything else is a string.
fn parse_meta(entries: &[String]) -> anyhow::Result<Option<MetaData>> {
    if entries.is_empty() {
        return Ok(None);
    }
    let mut meta = MetaData::new();
    for entry in entries {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("invalid --meta '{entry}': expected KEY=VALUE");
        };
        if key.is_empty() {
            bail!("invalid --meta '{entry}': empty key");
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.into()));
        meta.insert(key.to_string(), value);
    }
    Ok(Some(meta))
}

pub fn run(paths: &Paths, action_id: &str, meta: &[String], json: bool) -> anyhow::Result<()> {
    let meta = parse_meta(meta)?;
    let session = Session::open(paths)?;
    let coordinator = &session.coordinator;

    let record = ActionRecord::tracked(action_id, meta, coordinator.clock())
        .context("cannot track action")?;
    let queue = coordinator.queue(QueueKind::Track);
    queue.append(record.clone());

    if json {
        print_json(&record)?;
    } else {
        println!("Queued '{}' ({} pending).", record.action_id(), queue.count());
    }
    Ok(())
}
