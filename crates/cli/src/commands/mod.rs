//! Subcommand implementations. Each module owns its clap action enum and a
//! `run` entry point taking the shared [`crate::App`].

pub mod branch;
pub mod diff;
pub mod merge_request;
pub mod snapshot;

use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};

/// Table with the border preset and wrapping used by every listing.
pub(crate) fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.iter().copied());
    table
}

pub(crate) fn format_time(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}
