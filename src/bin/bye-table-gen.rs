//! Print the BYE placement table in effect as JSON.
//!
//! Without a `bye_table` section in the configuration this is the built-in
//! table; redirect the output into the config file to customise it.

use anyhow::Context;
use courtside::config::AppConfig;

fn main() -> anyhow::Result<()> {
    let config = AppConfig::load();
    let table = config.bye_table().to_raw();
    let json = serde_json::to_string_pretty(&table).context("serializing BYE table")?;
    println!("{json}");
    Ok(())
}
