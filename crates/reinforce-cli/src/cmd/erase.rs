use crate::output::print_json;
use crate::session::{Paths, Session};
use anyhow::{bail, Context};
use serde_json::json;

pub fn run(paths: &Paths, yes: bool, json: bool) -> anyhow::Result<()> {
    if !yes {
        bail!("refusing to erase without --yes");
    }
    let session = Session::open(paths)?;
    session
        .coordinator
        .erase()
        .context("failed to erase sync state")?;

    if json {
        print_json(&json!({ "erased": true }))
    } else {
        println!("Erased all local sync state.");
        Ok(())
    }
}
