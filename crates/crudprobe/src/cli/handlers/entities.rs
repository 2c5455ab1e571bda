use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::ArgMatches;
use crudprobe_core::{load_config, EntityDescriptor, EntityRegistry};

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}

fn verbs(descriptor: &EntityDescriptor) -> String {
    descriptor
        .verbs
        .iter()
        .map(|verb| verb.to_string().chars().next().map_or('?', |c| c.to_ascii_uppercase()))
        .collect()
}

const INNER: usize = 97;

fn print_table(registry: &EntityRegistry) {
    let rule = "═".repeat(INNER);
    println!("╔{rule}╗");
    println!("║ {:<width$} ║", "ENTITY TYPES", width = INNER - 2);
    println!("╠{rule}╣");
    println!(
        "║ {:20} │ {:23} │ {:5} │ {:10} │ {:25} ║",
        "Type", "Base path", "Verbs", "Display", "Required fields"
    );
    println!("╠{rule}╣");
    for descriptor in registry.descriptors() {
        println!(
            "║ {:20} │ {:23} │ {:5} │ {:10} │ {:25} ║",
            truncate(&descriptor.type_name, 20),
            truncate(&descriptor.base_path, 23),
            verbs(descriptor),
            truncate(&descriptor.display_field, 10),
            truncate(&descriptor.required_fields.join(", "), 25),
        );
    }
    println!("╚{rule}╝");
    println!();
    println!("Verbs: C=create R=read U=update D=delete");
}

pub async fn handle(matches: &ArgMatches) -> Result<bool> {
    let path = matches.get_one::<PathBuf>("config");
    let config = load_config(path.map(PathBuf::as_path))
        .await
        .context("Failed to load configuration")?;
    let mut registry = EntityRegistry::builtin()?;
    config.apply_entity_overrides(&mut registry)?;

    if matches.get_flag("json") {
        let descriptors: Vec<_> = registry.descriptors().collect();
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
    } else {
        print_table(&registry);
    }
    Ok(true)
}
