//! List command implementation.

use super::open_catalog;
use crate::catalog::{ItemStatus, ItemStore};
use crate::cli::Output;
use crate::config::Settings;
use anyhow::Result;
use std::collections::BTreeMap;

/// Run the list command.
pub async fn run_list(status: Option<&str>, settings: &Settings) -> Result<()> {
    let filter = status.map(str::parse::<ItemStatus>).transpose()?;
    let catalog = open_catalog(settings)?;

    let items = match catalog.list(filter).await {
        Ok(items) => items,
        Err(e) => {
            Output::error(&format!("Failed to list items: {}", e));
            return Err(e.into());
        }
    };

    if items.is_empty() {
        Output::info("No items found. Use 'clipdex add <external_id>' to register one.");
        return Ok(());
    }

    Output::header(&format!("Items ({})", items.len()));
    println!();
    for item in &items {
        Output::item_row(item);
    }

    let mut by_status: BTreeMap<&str, usize> = BTreeMap::new();
    for item in &items {
        *by_status.entry(item.status.as_str()).or_default() += 1;
    }
    println!();
    for (status, count) in by_status {
        Output::kv(status, &count.to_string());
    }

    Ok(())
}
