//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use engine_lib::{Action, ActionKind, Allocation, Recovered};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Row for the allocations table
#[derive(Tabled)]
struct AllocationRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Migrate")]
    migrate: String,
}

/// Row for the approved actions table
#[derive(Tabled)]
struct ActionRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Resource")]
    resource: String,
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => print_error(&format!("Failed to serialize output: {}", e)),
    }
}

/// Print a titled JSON dump, used for the request and verdict exchanged with the evaluator
pub fn print_dump<T: Serialize>(title: &str, value: &T) {
    println!("{}", title.bold());
    print_json(value);
    println!();
}

pub fn print_actions(actions: &[Action]) {
    if actions.is_empty() {
        print_info("No approved actions");
        return;
    }

    let rows: Vec<ActionRow> = actions
        .iter()
        .map(|a| ActionRow {
            node: a.node.clone(),
            action: a.raw_action.clone(),
            kind: color_kind(a.kind),
            resource: format!("{:?}", a.resource).to_lowercase(),
        })
        .collect();

    println!("{}", Table::new(rows).with(Style::rounded()));
}

pub fn print_allocations(allocations: &BTreeMap<String, Allocation>, migrations: &BTreeSet<String>) {
    let rows: Vec<AllocationRow> = allocations
        .values()
        .map(|a| AllocationRow {
            node: a.node.clone(),
            cpu: a.cpu.to_string(),
            memory: a.memory.clone(),
            migrate: if migrations.contains(&a.node) {
                "✓".yellow().to_string()
            } else {
                "".to_string()
            },
        })
        .collect();

    println!("{}", Table::new(rows).with(Style::rounded()));
}

pub fn print_recovered(recovered: &[Recovered]) {
    for event in recovered {
        print_warning(&event.to_string());
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Color an action kind
pub fn color_kind(kind: ActionKind) -> String {
    let label = kind.as_str();
    match kind {
        ActionKind::ScaleUp => label.green().to_string(),
        ActionKind::ScaleDown => label.blue().to_string(),
        ActionKind::MigrateWorkloads => label.yellow().to_string(),
        ActionKind::None => label.to_string(),
        ActionKind::Unrecognized => label.red().to_string(),
    }
}
