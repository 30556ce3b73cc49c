//! List command

use anyhow::Result;
use comfy_table::presets::NOTHING;
use comfy_table::{Cell, CellAlignment, Table};
use depot_schema::ArtifactDescriptor;

use crate::reporter::format_size;

/// Print the artifacts of a repository, sorted by key.
pub async fn list(repo: &str, classifier: Option<&str>) -> Result<()> {
    let repository = crate::open(repo, true).await?;
    let mut descriptors =
        repository.query(|d| classifier.is_none_or(|c| d.key().classifier() == c));

    if descriptors.is_empty() {
        println!();
        println!("  No artifacts.");
        return Ok(());
    }
    descriptors.sort_by(|a, b| {
        a.key()
            .to_string()
            .cmp(&b.key().to_string())
            .then_with(|| a.processing_steps().len().cmp(&b.processing_steps().len()))
    });

    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_header(["classifier", "id", "version", "size", "form"]);
    let mut total = 0;
    for d in &descriptors {
        let size = d.download_size();
        total += size.unwrap_or(0);
        table.add_row([
            Cell::new(d.key().classifier()),
            Cell::new(d.key().id()),
            Cell::new(d.key().version()),
            Cell::new(size.map(format_size).unwrap_or_default())
                .set_alignment(CellAlignment::Right),
            Cell::new(form(d)),
        ]);
    }

    println!("{table}");
    println!();
    println!("  {} artifacts, {}", descriptors.len(), format_size(total));
    Ok(())
}

/// Short description of how the bytes are stored.
fn form(descriptor: &ArtifactDescriptor) -> String {
    if descriptor.is_folder() {
        return "folder".into();
    }
    let steps: Vec<&str> = descriptor
        .processing_steps()
        .iter()
        .map(|s| s.processor_id.as_str())
        .collect();
    if steps.is_empty() {
        "canonical".into()
    } else {
        steps.join("+")
    }
}
