use super::ui;
use crate::App;
use crate::core::{AccountVariant, Clock, Snapshot};
use crate::store::SaveOutcome;
use anyhow::{Result, bail};
use comfy_table::Cell;
use tracing::debug;

/// Local wall-clock time a snapshot was taken.
pub fn format_taken_at(snapshot: &Snapshot, clock: &dyn Clock) -> String {
    snapshot.taken_at().map_or("N/A".to_string(), |at| {
        at.with_timezone(&clock.local_offset(at))
            .format("%Y-%m-%d %H:%M")
            .to_string()
    })
}

/// Fetches `player` once and starts tracking them under `variant`, or the
/// variant already stored for them.
pub async fn add(app: &App, player: &str, variant: Option<AccountVariant>) -> Result<String> {
    let player = player.trim();
    if player.is_empty() {
        bail!("Player name must not be empty");
    }
    let settings = app.store.settings();
    let variant = variant.unwrap_or_else(|| settings.variant(player));

    let spinner = ui::new_spinner(format!(
        "Looking up {} on the {} hiscores...",
        player,
        variant.display_name()
    ));
    let result = app.fetcher.fetch(player, variant).await;
    spinner.finish_and_clear();
    let snapshot = result?;

    settings.set_variant(player, variant)?;
    let total = snapshot.headline();
    let outcome = app.store.save(snapshot);
    debug!("Added '{}' ({:?})", player, outcome);

    let status = match outcome {
        SaveOutcome::Appended => "snapshot saved",
        SaveOutcome::Duplicate => "no change since the last snapshot",
    };
    Ok(format!(
        "Tracking {} ({}), total xp {}: {}",
        ui::style_text(player, ui::StyleType::TotalLabel),
        variant.display_name(),
        total.map_or("N/A".to_string(), ui::format_number),
        status
    ))
}

pub fn remove(app: &App, player: &str) -> Result<String> {
    if !app.store.remove(player)? {
        bail!("Player '{}' is not tracked", player.trim());
    }
    Ok(format!("Stopped tracking {}", player.trim()))
}

pub fn list(app: &App) -> String {
    let players = app.store.tracked_entities();
    if players.is_empty() {
        return ui::style_text(
            "No players tracked yet. Add one with `xptrack add <player>`.",
            ui::StyleType::Subtle,
        );
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Player"),
        ui::header_cell("Account"),
        ui::header_cell("Total XP"),
        ui::header_cell("Snapshots"),
        ui::header_cell("Last updated"),
    ]);

    for player in &players {
        let latest = app.store.latest(player);
        let variant = app.store.settings().variant(player);
        table.add_row(vec![
            Cell::new(player),
            Cell::new(variant.display_name()),
            ui::format_optional_cell(latest.as_ref().and_then(Snapshot::headline), ui::format_number),
            Cell::new(app.store.snapshot_count(player)),
            Cell::new(
                latest
                    .as_ref()
                    .map_or("N/A".to_string(), |s| format_taken_at(s, app.clock.as_ref())),
            ),
        ]);
    }

    let mut output = format!(
        "{}\n\n",
        ui::style_text("Tracked players", ui::StyleType::Title)
    );
    output.push_str(&table.to_string());
    output
}
