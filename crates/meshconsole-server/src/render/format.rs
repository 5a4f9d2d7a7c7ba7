//! Formatting helpers shared by the page renderers.

use chrono::TimeDelta;

/// Direction of a duration shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationKind {
    /// Time left until something happens ("in 3 days").
    Expiry,
    /// Time since something happened ("3 days ago").
    Past,
}

/// Human-readable duration, e.g. "in 3 days" or "2 hours ago".
///
/// Negative durations are shown as zero.
#[must_use]
pub fn pretty_duration(delta: TimeDelta, kind: DurationKind) -> String {
    let total = delta.num_seconds().max(0);
    let days = total / 86_400;
    let hours = total / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    match kind {
        DurationKind::Expiry if days > 730 => return "in more than two years".to_owned(),
        DurationKind::Expiry if days > 365 => return "in more than a year".to_owned(),
        DurationKind::Past if days > 730 => return "over two years ago".to_owned(),
        DurationKind::Past if days > 365 => return "over a year ago".to_owned(),
        _ => {}
    }

    let (amount, unit) = if days > 0 {
        (days, "day")
    } else if hours > 0 {
        (hours, "hour")
    } else if minutes > 0 {
        (minutes, "minute")
    } else {
        (seconds, "second")
    };
    let plural = if amount == 1 { "" } else { "s" };

    match kind {
        DurationKind::Expiry => format!("in {amount} {unit}{plural}"),
        DurationKind::Past => format!("{amount} {unit}{plural} ago"),
    }
}

/// Text colour class for the time since a machine was last seen.
///
/// Fresh contact is green, fading through yellow and orange to red, and
/// anything older than a month is grey.
#[must_use]
pub fn duration_color(delta: TimeDelta) -> &'static str {
    let total = delta.num_seconds().max(0);
    let days = total / 86_400;
    let hours = total / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    if days > 30 {
        "grey-text"
    } else if days > 14 {
        "red-text text-darken-2"
    } else if days > 1 {
        "deep-orange-text text-lighten-1"
    } else if hours > 12 {
        "orange-text"
    } else if hours > 1 {
        "orange-text text-lighten-2"
    } else if hours == 1 {
        "yellow-text"
    } else if minutes > 15 {
        "yellow-text text-lighten-2"
    } else if minutes > 5 {
        "green-text text-lighten-3"
    } else if seconds > 30 {
        "green-text text-lighten-2"
    } else {
        "green-text"
    }
}

/// Which colour palette to pick from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Palette {
    /// Background colours of failover route buttons.
    Failover,
    /// Text colours for user status icons.
    Text,
    /// Background colours for user badges.
    Default,
}

const FAILOVER_COLORS: [&str; 10] = [
    "teal lighten-1",
    "blue lighten-1",
    "blue-grey lighten-1",
    "indigo lighten-2",
    "brown lighten-1",
    "grey lighten-1",
    "indigo lighten-2",
    "deep-orange lighten-1",
    "yellow lighten-2",
    "purple lighten-2",
];

const TEXT_COLORS: [&str; 12] = [
    "red-text text-lighten-1",
    "teal-text text-lighten-1",
    "blue-text text-lighten-1",
    "blue-grey-text text-lighten-1",
    "indigo-text text-lighten-2",
    "green-text text-lighten-1",
    "deep-orange-text text-lighten-1",
    "yellow-text text-lighten-2",
    "purple-text text-lighten-2",
    "indigo-text text-lighten-2",
    "brown-text text-lighten-1",
    "grey-text text-lighten-1",
];

const DEFAULT_COLORS: [&str; 12] = [
    "red lighten-1",
    "teal lighten-1",
    "blue lighten-1",
    "blue-grey lighten-1",
    "indigo lighten-2",
    "green lighten-1",
    "deep-orange lighten-1",
    "yellow lighten-2",
    "purple lighten-2",
    "indigo lighten-2",
    "brown lighten-1",
    "grey lighten-1",
];

/// Colour at `index`, wrapping around the palette.
#[must_use]
pub fn palette_color(index: u64, palette: Palette) -> &'static str {
    let colors: &[&'static str] = match palette {
        Palette::Failover => &FAILOVER_COLORS,
        Palette::Text => &TEXT_COLORS,
        Palette::Default => &DEFAULT_COLORS,
    };
    let len = colors.len() as u64;
    usize::try_from(index % len)
        .ok()
        .and_then(|i| colors.get(i))
        .copied()
        .unwrap_or(colors[0])
}

/// Severity of a [`message_box`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Warning,
    Success,
    Error,
    Information,
}

/// A titled notice box. `body` is trusted HTML.
#[must_use]
pub fn message_box(kind: MessageKind, title: &str, body: &str) -> String {
    let (icon, label) = match kind {
        MessageKind::Warning => (r#"<i class="material-icons circle yellow">priority_high</i>"#, "Warning"),
        MessageKind::Success => (r#"<i class="material-icons circle green">check</i>"#, "Success"),
        MessageKind::Error => (r#"<i class="material-icons circle red">warning</i>"#, "Error"),
        MessageKind::Information => (r#"<i class="material-icons circle grey">help</i>"#, "Information"),
    };

    let mut html = String::with_capacity(256 + body.len());
    html.push_str(r#"<ul class="collection"><li class="collection-item avatar">"#);
    html.push_str(icon);
    html.push_str(r#"<span class="title">"#);
    html.push_str(label);
    html.push_str(" - ");
    html.push_str(&escape(title));
    html.push_str("</span>");
    html.push_str(body);
    html.push_str("</li></ul>");
    html
}

/// Escape text for HTML element content and quoted attributes.
#[must_use]
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
