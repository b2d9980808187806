use crate::output::print_json;
use crate::session::{Paths, Session};
use anyhow::bail;
use reinforce_core::QueueKind;
use serde_json::json;

pub fn run(paths: &Paths, kind: QueueKind, size: usize, json: bool) -> anyhow::Result<()> {
    if size == 0 {
        bail!("batch size must be at least 1");
    }
    let session = Session::open(paths)?;
    session.coordinator.set_batch_size(kind, size);

    if json {
        print_json(&json!({ "queue": kind, "batch_size": size }))
    } else {
        println!("{kind} batch size set to {size}.");
        Ok(())
    }
}
