//! Terminal rendering.

use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, ContentArrangement, Table};
use console::style;
use consultline_client::{ConnectionState, InboxSummary, Toast, ToastLevel};
use consultline_protocol::{
    Consultation, ConsultationStatus, GroupedConsultationThread, PrincipalId,
};

const PREVIEW_CHARS: usize = 48;

fn truncate(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

fn principal(name: Option<&str>, id: PrincipalId) -> String {
    match name {
        Some(name) => format!("{name} #{id}"),
        None => format!("#{id}"),
    }
}

fn status_cell(status: ConsultationStatus) -> Cell {
    let label = match status {
        ConsultationStatus::Pending => style("pending").yellow(),
        ConsultationStatus::Answered => style("answered").green(),
        ConsultationStatus::Cancelled => style("cancelled").dim(),
    };
    Cell::new(label.to_string())
}

fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().copied());
    table
}

pub fn consultations(items: &[Consultation]) -> String {
    let mut table = table(&["ID", "Consultant", "Title", "Status", "Sent", "Answer"]);
    for c in items {
        table.add_row(vec![
            Cell::new(c.id),
            Cell::new(principal(c.consultant.full_name.as_deref(), c.consultant.id)),
            Cell::new(truncate(&c.title)),
            status_cell(c.status),
            Cell::new(&c.sent_at),
            Cell::new(c.answer.as_deref().map(truncate).unwrap_or_default()),
        ]);
    }
    table.to_string()
}

pub fn threads(groups: &[GroupedConsultationThread]) -> String {
    let mut table = table(&["Sender", "Pending", "Last sent", "Consultations"]);
    for group in groups {
        let sender = principal(group.sender.full_name.as_deref(), group.sender_id);
        let items: Vec<String> = group
            .consultations
            .iter()
            .map(|c| format!("{} {} [{}]", c.id, truncate(&c.title), status_label(c.status)))
            .collect();
        table.add_row(vec![
            Cell::new(sender),
            Cell::new(group.pending_count),
            Cell::new(group.last_sent_at.as_deref().unwrap_or("-")),
            Cell::new(items.join("\n")),
        ]);
    }
    table.to_string()
}

fn status_label(status: ConsultationStatus) -> &'static str {
    match status {
        ConsultationStatus::Pending => "pending",
        ConsultationStatus::Answered => "answered",
        ConsultationStatus::Cancelled => "cancelled",
    }
}

pub fn toast(toast: &Toast) -> String {
    let title = match toast.level {
        ToastLevel::Info => style(&toast.title).cyan().bold(),
        ToastLevel::Success => style(&toast.title).green().bold(),
        ToastLevel::Warning => style(&toast.title).yellow().bold(),
    };
    format!("{title}  {}", toast.message)
}

pub fn state(state: ConnectionState) -> String {
    let label = state.label();
    let styled = match state {
        ConnectionState::Connected => style(label).green(),
        ConnectionState::Failed => style(label).red(),
        ConnectionState::Idle => style(label).dim(),
        _ => style(label).yellow(),
    };
    match state.attempt() {
        0 => format!("[{styled}]"),
        attempt => format!("[{styled} #{attempt}]"),
    }
}

pub fn summary(summary: &InboxSummary) -> String {
    format!(
        "{} unread / {} kept",
        style(summary.unread_count).bold(),
        summary.len
    )
}
