//! Security alert raised after every executed cleanup run.

use super::audit::CleanupLogEntry;

/// Closed connections listed individually before the "+N more" line.
pub const ALERT_LIST_LIMIT: usize = 10;

const SEPARATOR_WIDTH: usize = 60;

/// Render the multi-line alert text for a cleanup log entry.
pub fn format_alert(entry: &CleanupLogEntry, cleanup_fraction: f64, threshold: usize) -> String {
    let separator = "=".repeat(SEPARATOR_WIDTH);
    let percent = cleanup_fraction * 100.0;

    let mut lines = vec![
        String::new(),
        separator.clone(),
        "SECURITY ALERT - CONNECTION MANAGER".to_string(),
        separator.clone(),
        format!("Timestamp: {}", entry.timestamp.format("%Y-%m-%d %H:%M:%S")),
        "Event: automatic cleanup of inactive connections".to_string(),
        format!("Total connections before: {}", entry.total_connections_before),
        format!("Inactive connections found: {}", entry.inactive_connections_found),
        format!("Connections closed: {}", entry.connections_closed),
        format!("Cleanup percentage: {}%", percent),
        format!("Configured threshold: {} connections", threshold),
        String::new(),
        "INTEGRITY CHECK PASSED:".to_string(),
        "- Overload of inactive connections detected".to_string(),
        format!("- Automatic cleanup executed ({}% of inactive connections)", percent),
        "- System performance protected".to_string(),
        "- Mirrored suspicious-IP registry updated".to_string(),
        String::new(),
        "IPs of closed connections:".to_string(),
    ];

    lines.extend(
        entry
            .connections_closed_list
            .iter()
            .take(ALERT_LIST_LIMIT)
            .map(|conn| {
                format!(
                    "• {} - inactive for {:.1}s - webhook: {}",
                    conn.client_ip, conn.inactive_time, conn.is_webhook
                )
            }),
    );

    let total = entry.connections_closed_list.len();
    if total > ALERT_LIST_LIMIT {
        lines.push(format!("... +{} more", total - ALERT_LIST_LIMIT));
    }

    lines.push(String::new());
    lines.push(separator);

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Emit the alert through the log.
pub fn raise_alert(entry: &CleanupLogEntry, cleanup_fraction: f64, threshold: usize) {
    let alert = format_alert(entry, cleanup_fraction, threshold);
    tracing::warn!("[cleanup] [alert] log_id={}{}", entry.id, alert);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::audit::ClosedConnection;
    use crate::tracking::ConnectionId;
    use chrono::Utc;

    fn entry(closed: usize) -> CleanupLogEntry {
        CleanupLogEntry {
            id: 1,
            timestamp: Utc::now(),
            total_connections_before: 300,
            inactive_connections_found: 220,
            connections_closed: closed,
            cleanup_reason: "threshold".to_string(),
            connections_closed_list: (0..closed)
                .map(|i| ClosedConnection {
                    connection_id: ConnectionId::new(),
                    client_ip: format!("10.0.0.{}", i),
                    inactive_time: 42.3,
                    is_webhook: true,
                })
                .collect(),
        }
    }

    #[test]
    fn test_alert_summary_lines() {
        let text = format_alert(&entry(3), 0.5, 200);
        assert!(text.contains("Total connections before: 300"));
        assert!(text.contains("Inactive connections found: 220"));
        assert!(text.contains("Connections closed: 3"));
        assert!(text.contains("Cleanup percentage: 50%"));
        assert!(text.contains("Configured threshold: 200 connections"));
        assert!(text.contains("• 10.0.0.2 - inactive for 42.3s - webhook: true"));
        assert!(!text.contains("more"));
    }

    #[test]
    fn test_alert_truncates_after_ten() {
        let text = format_alert(&entry(25), 0.5, 200);
        assert_eq!(text.matches("• ").count(), ALERT_LIST_LIMIT);
        assert!(text.contains("... +15 more"));
        assert!(!text.contains("10.0.0.10 "));
    }

    #[test]
    fn test_alert_with_no_closures() {
        let text = format_alert(&entry(0), 0.5, 200);
        assert_eq!(text.matches("• ").count(), 0);
        assert!(text.contains("Connections closed: 0"));
    }
}
