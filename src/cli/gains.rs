use super::players::format_taken_at;
use super::ui;
use crate::App;
use crate::core::snapshot::HEADLINE_METRIC;
use crate::core::{Clock, Gains, Metric, MetricDelta, Period};
use crate::providers::hiscores::{metric_name, metric_position};
use crate::view::{GainsView, ViewUpdate};
use anyhow::{Context, Result, bail};
use comfy_table::{Cell, CellAlignment};
use tracing::warn;

fn day_label(offset: u32) -> String {
    match offset {
        0 => "today".to_string(),
        1 => "yesterday".to_string(),
        n => format!("{n} days ago"),
    }
}

fn rank_cell(rank: i32) -> Cell {
    // The hiscores report -1 for unranked entries
    ui::format_optional_cell((rank > 0).then_some(i64::from(rank)), ui::format_number)
}

/// Renders the gains of one player as a table.
///
/// Skills are always listed; activities and bosses only when they moved.
/// Without a baseline every gain reads "No data".
pub fn render_gains(title: &str, gains: &Gains, clock: &dyn Clock) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Metric"),
        ui::header_cell("Level"),
        ui::header_cell("Gained"),
        ui::header_cell("Rank"),
    ]);

    let mut metrics: Vec<(&String, &Metric)> = gains.current().metrics().iter().collect();
    metrics.sort_by_key(|(key, _)| metric_position(key).unwrap_or(usize::MAX));

    for (key, metric) in metrics {
        let delta = gains.delta(key);
        let name = metric_name(key).unwrap_or(key.as_str());
        let row = match (metric, delta) {
            (Metric::Leveled { level, rank, .. }, Some(MetricDelta::Leveled { value, level: up })) => {
                let level_text = if *up > 0 {
                    format!("{level} (+{up})")
                } else {
                    level.to_string()
                };
                vec![
                    Cell::new(name),
                    Cell::new(level_text).set_alignment(CellAlignment::Right),
                    ui::delta_cell(*value),
                    rank_cell(*rank),
                ]
            }
            (Metric::Count { rank, .. }, Some(MetricDelta::Count { score })) if *score != 0 => {
                vec![Cell::new(name), Cell::new(""), ui::delta_cell(*score), rank_cell(*rank)]
            }
            (Metric::Leveled { level, rank, .. }, None) => vec![
                Cell::new(name),
                Cell::new(level).set_alignment(CellAlignment::Right),
                ui::no_data_cell(),
                rank_cell(*rank),
            ],
            _ => continue,
        };
        table.add_row(row);
    }

    let mut output = format!("{}\n\n", ui::style_text(title, ui::StyleType::Title));
    output.push_str(&table.to_string());

    match (gains.baseline(), gains.delta(HEADLINE_METRIC)) {
        (Some(baseline), Some(MetricDelta::Leveled { value, .. })) => {
            output.push_str(&format!(
                "\n\n{} {} (since {})",
                ui::style_text("Total XP gained:", ui::StyleType::TotalLabel),
                ui::style_text(&ui::format_number(*value), ui::StyleType::TotalValue),
                format_taken_at(baseline, clock)
            ));
        }
        (Some(baseline), _) => {
            output.push_str(&format!(
                "\n\n{}",
                ui::style_text(
                    &format!("Compared with {}", format_taken_at(baseline, clock)),
                    ui::StyleType::Subtle
                )
            ));
        }
        (None, _) => {
            output.push_str(&format!(
                "\n\n{}",
                ui::style_text(
                    "No earlier snapshot to compare against yet.",
                    ui::StyleType::Subtle
                )
            ));
        }
    }
    output
}

/// Shows gains for `player`, or for the last selected player.
pub async fn run(
    app: &App,
    player: Option<&str>,
    period: Period,
    day: Option<u32>,
    refresh: bool,
) -> Result<String> {
    let settings = app.store.settings();
    let player = match player {
        Some(player) => player.trim().to_string(),
        None => settings
            .last_selected()
            .context("No player given and none selected before. Try `xptrack gains <player>`")?,
    };

    let mut view = GainsView::new(app.store.clone(), app.fetcher.clone(), app.clock.clone());
    view.select(&player);

    let mut notice = None;
    if refresh {
        if let Some(handle) = view.refresh(period) {
            let spinner = ui::new_spinner(format!("Refreshing {player}..."));
            let joined = handle.await;
            spinner.finish_and_clear();
            joined?;

            if let Some(ViewUpdate::Failed { error, .. }) = view.next_update().await {
                if error.is_not_found() {
                    return Err(error.into());
                }
                warn!("Refresh of '{}' failed: {}", player, error);
                notice = Some(ui::style_text(
                    &format!("Refresh failed, showing stored data: {error}"),
                    ui::StyleType::Error,
                ));
            }
        }
    }

    let (title, gains) = match day {
        Some(offset) => (
            format!("{player}: gains {}", day_label(offset)),
            view.daily_gains(&player, offset),
        ),
        None => (
            format!("{player}: gains over {period}"),
            view.gains(&player, period),
        ),
    };
    let Some(gains) = gains else {
        bail!(
            "No snapshots stored for '{}'. Start tracking with `xptrack add {}`",
            player,
            player
        );
    };

    let mut output = String::new();
    if let Some(notice) = notice {
        output.push_str(&notice);
        output.push_str("\n\n");
    }
    output.push_str(&render_gains(&title, &gains, app.clock.as_ref()));
    Ok(output)
}
