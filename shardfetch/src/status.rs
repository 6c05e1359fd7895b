//! Human-facing status helpers: speed formatting, remaining time, and a
//! ready-made console observer.

use std::io::Write;

use crate::events::TaskStatus;

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Format a transfer rate with an auto-selected unit.
pub fn format_speed(bytes_per_second: f64) -> String {
    if bytes_per_second <= KIB {
        format!("{:.2} B/s", bytes_per_second.max(0.0))
    } else if bytes_per_second <= MIB {
        format!("{:.2} KiB/s", bytes_per_second / KIB)
    } else if bytes_per_second <= GIB {
        format!("{:.2} MiB/s", bytes_per_second / MIB)
    } else {
        format!("{:.2} GiB/s", bytes_per_second / GIB)
    }
}

/// Estimated milliseconds until completion at the snapshot's speed.
///
/// `None` when the speed is zero or the total is unknown.
pub fn remaining_millis(status: &TaskStatus) -> Option<f64> {
    if status.speed <= 0.0 || status.total_size == 0 {
        return None;
    }
    Some((status.total_size.saturating_sub(status.download_size)) as f64 / status.speed)
}

/// Percentage of the download completed, 0.0 when the total is unknown.
pub fn percent_done(status: &TaskStatus) -> f64 {
    if status.total_size == 0 {
        return 0.0;
    }
    status.download_size as f64 / status.total_size as f64 * 100.0
}

/// A status observer that rewrites a single console progress line.
///
/// Shows percent, active shard count, speed and estimated remaining time;
/// prints a closing newline on the terminal snapshot.
pub fn console_subscriber() -> impl FnMut(TaskStatus) + Send + 'static {
    move |status: TaskStatus| {
        // TaskStatus carries speed in bytes per millisecond.
        let speed = format_speed(status.speed * 1000.0);
        let eta = match remaining_millis(&status) {
            Some(ms) => format!("{:.1}s", ms / 1000.0),
            None => "--".to_string(),
        };
        print!(
            "\r{:6.2}%  shards: {}  {}  eta: {}    ",
            percent_done(&status),
            status.concurrency,
            speed,
            eta
        );
        let _ = std::io::stdout().flush();
        if status.is_shutdown {
            println!();
        }
    }
}
