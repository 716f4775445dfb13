use crate::bus::EventStream;
use crate::events::{EventType, IncidentImpact, IncidentStatus, StatusEvent};
use colored::{ColoredString, Colorize};
use log::{info, warn};
use std::io::{self, Write};

const DIVIDER_WIDTH: usize = 80;

/// Terminal consumer of the event bus
///
/// Prints one block per event:
///
/// ```text
/// [2024-05-01 12:10:00] Product: OpenAI - Elevated errors on ChatGPT
/// Status: identified (Fix is being rolled out)
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ConsoleRenderer {
    colorize: bool,
}

impl ConsoleRenderer {
    pub fn new(colorize: bool) -> Self {
        Self { colorize }
    }

    /// Render `event` as display text
    ///
    /// The detail in parentheses is the latest update body, falling back to the
    /// incident name, or `resolved` for resolution events.
    pub fn format_event(&self, event: &StatusEvent) -> String {
        let incident = &event.incident;
        let time = event.detected_at.format("%Y-%m-%d %H:%M:%S").to_string();
        let detail = match event.event_type {
            EventType::Resolved => "resolved".to_string(),
            _ => event
                .latest_update()
                .map(|update| update.body.trim())
                .filter(|body| !body.is_empty())
                .unwrap_or(incident.name.as_str())
                .to_string(),
        };

        if !self.colorize {
            return format!(
                "[{}] Product: {} - {}\nStatus: {} ({})",
                time,
                event.provider,
                incident.name,
                incident.status.as_str(),
                detail
            );
        }

        format!(
            "{} {} {} - {}\n{} {} ({}) {}",
            format!("[{}]", time).dimmed(),
            "Product:".bold(),
            event.provider.cyan().bold(),
            impact_style(incident.impact, &incident.name),
            "Status:".bold(),
            status_style(incident.status, incident.status.as_str()),
            detail,
            format!("impact: {}", incident.impact.as_str()).dimmed()
        )
    }

    /// Write one event block followed by a divider
    pub fn write_event<W: Write>(&self, out: &mut W, event: &StatusEvent) -> io::Result<()> {
        writeln!(out, "{}", self.format_event(event))?;
        let divider = "-".repeat(DIVIDER_WIDTH);
        if self.colorize {
            writeln!(out, "{}", divider.dimmed())?;
        } else {
            writeln!(out, "{}", divider)?;
        }
        out.flush()
    }

    /// Print every event from `stream` to stdout until the stream ends
    pub async fn run(self, mut stream: EventStream) {
        info!("Console renderer started (subscriber {})", stream.id());
        if self.colorize {
            println!("{}", "Status watch: listening for status updates...".cyan().bold());
        } else {
            println!("Status watch: listening for status updates...");
        }

        while let Some(event) = stream.next().await {
            let mut stdout = io::stdout().lock();
            if let Err(e) = self.write_event(&mut stdout, &event) {
                warn!("Failed to write event to console: {}", e);
            }
        }

        info!("Console renderer stopped");
    }
}

fn status_style(status: IncidentStatus, text: &str) -> ColoredString {
    match status {
        IncidentStatus::Investigating => text.yellow().bold(),
        IncidentStatus::Identified => text.truecolor(255, 140, 0).bold(),
        IncidentStatus::Monitoring => text.cyan().bold(),
        IncidentStatus::Resolved => text.green().bold(),
        IncidentStatus::Postmortem => text.blue().bold(),
    }
}

fn impact_style(impact: IncidentImpact, text: &str) -> ColoredString {
    match impact {
        IncidentImpact::None => text.normal(),
        IncidentImpact::Minor => text.yellow(),
        IncidentImpact::Major => text.red(),
        IncidentImpact::Critical => text.red().bold(),
    }
}
