//! Table output formatting for CLI commands
//!
//! Renders jobs, stages and extracted entities with comfy-table. Colors are
//! dropped when `NO_COLOR` is set or the terminal is dumb.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::env;

use crate::cli::output::truncate;
use crate::domain::models::{ExtractedEntity, Job, JobState, Stage, StageState};

pub struct TableFormatter {
    use_colors: bool,
    max_width: Option<u16>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self { use_colors, max_width }
    }

    pub fn format_jobs(&self, jobs: &[Job]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["ID", "Kind", "State", "Progress", "Stage", "Started"]));

        for job in jobs {
            table.add_row(vec![
                Cell::new(truncate(job.id.as_str(), 12)),
                Cell::new(job.kind),
                self.state_cell(job.state),
                Cell::new(format!("{:>3.0}%", job.progress * 100.0)),
                Cell::new(truncate(job.current_stage.as_deref().unwrap_or("-"), 32)),
                Cell::new(job.started_at.format("%Y-%m-%d %H:%M:%S")),
            ]);
        }

        table.to_string()
    }

    pub fn format_stages(&self, stages: &[Stage]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Stage", "State", "Message"]));

        for stage in stages {
            let state = Cell::new(stage.state.as_str());
            let state = if self.use_colors { state.fg(stage_color(stage.state)) } else { state };
            table.add_row(vec![
                Cell::new(&stage.name),
                state,
                Cell::new(stage.message.as_deref().unwrap_or("")),
            ]);
        }

        table.to_string()
    }

    pub fn format_entities(&self, entities: &[ExtractedEntity]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Name", "Type", "Confidence", "Attempts", "Tag", "Variants"]));

        for entity in entities {
            let kind = if entity.type_conflict {
                format!("{}*", entity.suggested_type)
            } else {
                entity.suggested_type.to_string()
            };
            let attempts: Vec<String> = entity.source_attempts.iter().map(ToString::to_string).collect();
            table.add_row(vec![
                Cell::new(&entity.name),
                Cell::new(kind),
                Cell::new(format!("{:.2}", entity.confidence)),
                Cell::new(attempts.join(",")),
                Cell::new(entity.canonical_tag.as_ref().map_or_else(String::new, ToString::to_string)),
                Cell::new(truncate(&entity.variants.join(", "), 40)),
            ]);
        }

        table.to_string()
    }

    fn state_cell(&self, state: JobState) -> Cell {
        if self.use_colors {
            Cell::new(state).fg(state_color(state))
        } else {
            Cell::new(format!("{} {state}", state_icon(state)))
        }
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        if let Some(width) = self.max_width {
            table.set_width(width);
        }
        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn header(names: &[&str]) -> Vec<Cell> {
    names.iter().map(|n| Cell::new(n).add_attribute(Attribute::Bold)).collect()
}

fn supports_color() -> bool {
    if env::var_os("NO_COLOR").is_some() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

fn state_color(state: JobState) -> Color {
    match state {
        JobState::Complete => Color::Green,
        JobState::Running | JobState::Initializing => Color::Cyan,
        JobState::Pending => Color::Yellow,
        JobState::Error => Color::Red,
        JobState::Cancelled => Color::DarkGrey,
    }
}

fn state_icon(state: JobState) -> &'static str {
    match state {
        JobState::Complete => "✓",
        JobState::Running | JobState::Initializing => "⟳",
        JobState::Pending => "○",
        JobState::Error => "✗",
        JobState::Cancelled => "⊘",
    }
}

fn stage_color(state: StageState) -> Color {
    match state {
        StageState::Complete => Color::Green,
        StageState::Running => Color::Cyan,
        StageState::Pending => Color::White,
        StageState::Error => Color::Red,
        StageState::Skipped => Color::DarkGrey,
    }
}
