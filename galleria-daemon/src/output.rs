//! Terminal output for the CLI: tables via `tabled`, JSON via `serde_json`.

use anyhow::Result;
use chrono::DateTime;
use colored::Colorize;
use galleria_core::{FileRecord, ParameterRecord};
use galleria_daemon::storage::{CatalogStats, FacetCount, FileDetail, FilterOptions, NumericRange, QueryPage};
use galleria_daemon::SyncSummary;
use serde::Serialize;
use std::fmt::Display;
use tabled::{
    builder::Builder,
    settings::{object::Columns, style::Style, Alignment, Modify, Width},
};

/// Widest a free-text cell is allowed to get.
const TEXT_WIDTH: usize = 48;

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "(no results)".to_string();
    }
    let mut builder = Builder::default();
    builder.push_record(headers.iter().copied());
    for row in rows {
        builder.push_record(row);
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

fn key_value(pairs: Vec<(&str, String)>) -> String {
    let mut builder = Builder::default();
    for (key, value) in pairs {
        builder.push_record([key.to_string(), value]);
    }
    let mut table = builder.build();
    table
        .with(Style::rounded())
        .with(Modify::new(Columns::first()).with(Alignment::right()))
        .with(Modify::new(Columns::single(1)).with(Width::wrap(96)));
    table.to_string()
}

fn or_dash<T: Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

fn timestamp(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn dimensions(file: &FileRecord) -> String {
    match (file.width, file.height) {
        (Some(w), Some(h)) => format!("{}x{}", w, h),
        _ => "-".to_string(),
    }
}

pub fn print_page(page: &QueryPage, offset: usize) {
    let rows = page
        .records
        .iter()
        .map(|f| {
            vec![
                f.id.chars().take(12).collect(),
                if f.favorite { "★".yellow().to_string() } else { String::new() },
                truncate(&f.name, 40),
                f.media_kind.to_string(),
                dimensions(f),
                human_size(f.size),
                timestamp(f.mtime),
                or_dash(&f.sampler_names),
                truncate(f.prompt_preview.as_deref().unwrap_or("-"), TEXT_WIDTH),
            ]
        })
        .collect();
    println!(
        "{}",
        table(
            &["id", "", "name", "kind", "dims", "size", "modified", "samplers", "prompt"],
            rows
        )
    );

    let shown = page.records.len();
    let range = if shown == 0 {
        "0".to_string()
    } else {
        format!("{}-{}", offset + 1, offset + shown)
    };
    let mut footer = format!("{} of {} files", range, page.total_count);
    if page.has_more {
        footer.push_str(&format!(" (next: --offset {})", offset + shown));
    }
    println!("{}", footer.dimmed());
}

fn parameters_table(parameters: &[ParameterRecord]) -> String {
    let rows = parameters
        .iter()
        .map(|p| {
            let size = match (p.width, p.height) {
                (Some(w), Some(h)) => format!("{}x{}", w, h),
                _ => "-".to_string(),
            };
            vec![
                p.sink_index.to_string(),
                or_dash(&p.model),
                or_dash(&p.sampler),
                or_dash(&p.scheduler),
                or_dash(&p.cfg),
                or_dash(&p.steps),
                size,
                truncate(p.positive_prompt.as_deref().unwrap_or("-"), TEXT_WIDTH),
                truncate(p.negative_prompt.as_deref().unwrap_or("-"), TEXT_WIDTH),
            ]
        })
        .collect();
    table(
        &["#", "model", "sampler", "scheduler", "cfg", "steps", "size", "positive", "negative"],
        rows,
    )
}

pub fn print_detail(detail: &FileDetail) {
    let file = &detail.file;
    let graph = if file.has_graph {
        "yes".green().to_string()
    } else {
        "no".dimmed().to_string()
    };
    println!(
        "{}",
        key_value(vec![
            ("id", file.id.clone()),
            ("path", file.path.clone()),
            ("kind", format!("{} ({})", file.media_kind, file.extension)),
            ("size", human_size(file.size)),
            ("modified", timestamp(file.mtime)),
            ("dimensions", dimensions(file)),
            ("duration", file.duration_secs.map(|d| format!("{:.1}s", d)).unwrap_or_else(|| "-".into())),
            ("graph", graph),
            ("favorite", if file.favorite { "★".yellow().to_string() } else { "no".into() }),
        ])
    );
    if file.has_graph {
        println!("{}", parameters_table(&detail.parameters));
    }
}

fn facet_rows(facets: &[FacetCount]) -> Vec<Vec<String>> {
    facets
        .iter()
        .map(|f| vec![f.value.clone(), f.files.to_string()])
        .collect()
}

fn range_text<T: Display>(range: &Option<NumericRange<T>>) -> String {
    match range {
        Some(r) => format!("{} .. {}", r.min, r.max),
        None => "-".to_string(),
    }
}

pub fn print_options(options: &FilterOptions) {
    for (title, facets) in [
        ("Models", &options.models),
        ("Samplers", &options.samplers),
        ("Schedulers", &options.schedulers),
        ("Extensions", &options.extensions),
    ] {
        println!("{}", title.bold());
        println!("{}", table(&["value", "files"], facet_rows(facets)));
    }
    println!("{}", "Ranges".bold());
    println!(
        "{}",
        key_value(vec![
            ("cfg", range_text(&options.cfg)),
            ("steps", range_text(&options.steps)),
            ("width", range_text(&options.width)),
            ("height", range_text(&options.height)),
        ])
    );
}

pub fn print_stats(stats: &CatalogStats, catalog: &str) {
    let mut pairs = vec![
        ("catalog", catalog.to_string()),
        ("files", stats.files.to_string()),
        ("with graph", stats.with_graph.to_string()),
        ("favorites", stats.favorites.to_string()),
        ("parameter records", stats.parameters.to_string()),
        ("total size", human_size(stats.total_bytes)),
    ];
    for (kind, count) in &stats.by_kind {
        pairs.push((kind.as_str(), count.to_string()));
    }
    println!("{}", key_value(pairs));
}

pub fn print_summary(summary: &SyncSummary) {
    let headline = if summary.cancelled {
        "Sync cancelled".yellow().bold()
    } else if summary.failed > 0 {
        "Sync finished with failures".yellow().bold()
    } else {
        "Sync complete".green().bold()
    };
    println!("{} in {:.2}s", headline, summary.duration_ms as f64 / 1000.0);
    println!(
        "{}",
        key_value(vec![
            ("added", summary.added.to_string()),
            ("updated", summary.updated.to_string()),
            ("removed", summary.removed.to_string()),
            ("unchanged", summary.unchanged.to_string()),
            ("failed", summary.failed.to_string()),
        ])
    );
}
