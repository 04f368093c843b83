//! HTML rendering of transfers in progress

use artifact_cache::ProgressSnapshot;
use std::fmt::Write;

pub fn render(transfers: &[ProgressSnapshot]) -> String {
    let mut output = String::from("<html><body><h2>Dashboard</h2><ul>");
    for transfer in transfers {
        let _ = write!(
            output,
            "<li>{}&nbsp;&nbsp;{:.1}% - {} / {}</li>",
            escape(&transfer.url),
            transfer.percent(),
            human_size(transfer.bytes_copied),
            human_size(transfer.total_bytes),
        );
    }
    output.push_str("</ul></body></html>");
    output
}

/// Binary-prefixed size, e.g. `1.5MB`
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    if bytes < 1024 {
        return format!("{}B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1}{}", value, UNITS[unit])
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
