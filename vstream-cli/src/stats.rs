//! Statistics display and formatting

use std::time::Duration;
use vstream::io::RuntimeStats;
use vstream::protocol::{ClientStats, StreamerStats};

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a rate in events per second
pub fn format_rate(count: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return "0.0/s".to_string();
    }
    format!("{:.1}/s", count as f64 / secs)
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// One-line client summary for periodic logging
pub fn format_client_line(stats: &ClientStats, ready: i64, elapsed: Duration) -> String {
    format!(
        "played={} ({}) ready={} underruns={} gaps={} recovered={} requests={} pause/resume={}/{} lost={}",
        stats.frames_played,
        format_rate(stats.frames_played, elapsed),
        ready,
        stats.underruns,
        stats.gaps_detected,
        stats.gaps_recovered,
        stats.requests_sent,
        stats.pauses_sent,
        stats.resumes_sent,
        stats.packets_dropped_loss,
    )
}

/// One-line streamer summary for periodic logging
pub fn format_streamer_line(stats: &StreamerStats, paused: bool, elapsed: Duration) -> String {
    format!(
        "frames={} ({}) sent={} retransmitted={} bytes={} paused={} requests={}",
        stats.frames_sent,
        format_rate(stats.frames_sent, elapsed),
        stats.packets_sent,
        stats.packets_retransmitted,
        format_bytes(stats.bytes_sent),
        paused,
        stats.requests_received,
    )
}

fn row(label: &str, value: impl std::fmt::Display) {
    println!("│ {:<26} {:>32} │", label, value.to_string());
}

fn header(title: &str) {
    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ {:<59} │", title);
    println!("├─────────────────────────────────────────────────────────────┤");
}

fn footer() {
    println!("└─────────────────────────────────────────────────────────────┘");
}

/// Print the final client report
pub fn display_client_summary(stats: &ClientStats, runtime: &RuntimeStats, elapsed: Duration) {
    header("CLIENT STATISTICS");
    row("Duration", format_duration(elapsed));
    row("Packets received", stats.packets_received);
    row("Bytes received", format_bytes(stats.bytes_received));
    row("Dropped (simulated loss)", stats.packets_dropped_loss);
    row("Dropped (tracker limit)", stats.packets_dropped_overflow);
    row("Malformed", stats.packets_malformed);
    row("Duplicates", stats.duplicate_slots);
    row("Late", stats.late_packets);
    row("Gaps detected / recovered", format!("{} / {}", stats.gaps_detected, stats.gaps_recovered));
    row("Retransmit requests", stats.requests_sent);
    row(
        "Frames admitted / dropped",
        format!("{} / {}", stats.frames_admitted, stats.frames_dropped),
    );
    row("Frames deferred / stale", format!("{} / {}", stats.frames_deferred, stats.frames_stale));
    row("Frames played", stats.frames_played);
    row("Underruns / idle ticks", format!("{} / {}", stats.underruns, stats.idle_ticks));
    row("PAUSE / RESUME sent", format!("{} / {}", stats.pauses_sent, stats.resumes_sent));
    row("Send failures", runtime.send_failures);
    footer();
}

/// Print the final streamer report
pub fn display_streamer_summary(stats: &StreamerStats, runtime: &RuntimeStats, elapsed: Duration) {
    header("STREAMER STATISTICS");
    row("Duration", format_duration(elapsed));
    row("Frames sent", stats.frames_sent);
    row("Packets sent", stats.packets_sent);
    row("Retransmitted", stats.packets_retransmitted);
    row("Bytes sent", format_bytes(stats.bytes_sent));
    row("Ticks paused", stats.ticks_paused);
    row(
        "PAUSE / RESUME received",
        format!("{} / {}", stats.pauses_received, stats.resumes_received),
    );
    row("Retransmit requests", stats.requests_received);
    row("Obsolete retransmits pruned", stats.retransmits_pruned);
    row("Control dropped (sim loss)", stats.control_dropped_loss);
    row("Send failures", runtime.send_failures);
    footer();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(120, Duration::from_secs(2)), "60.0/s");
        assert_eq!(format_rate(5, Duration::ZERO), "0.0/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 01m 01s");
    }

    #[test]
    fn test_client_line() {
        let stats = ClientStats {
            frames_played: 60,
            gaps_detected: 3,
            pauses_sent: 2,
            resumes_sent: 1,
            ..ClientStats::default()
        };
        let line = format_client_line(&stats, 12, Duration::from_secs(1));
        assert!(line.starts_with("played=60 (60.0/s) ready=12"));
        assert!(line.contains("gaps=3"));
        assert!(line.contains("pause/resume=2/1"));
    }

    #[test]
    fn test_streamer_line() {
        let stats = StreamerStats {
            frames_sent: 90,
            packets_sent: 9000,
            bytes_sent: 2048,
            ..StreamerStats::default()
        };
        let line = format_streamer_line(&stats, true, Duration::from_secs(1));
        assert!(line.contains("frames=90 (90.0/s)"));
        assert!(line.contains("bytes=2.00 KB"));
        assert!(line.contains("paused=true"));
    }
}
