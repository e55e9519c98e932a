use std::time::{Duration, Instant};
use tracing::info;

/// A simple wall-clock timer for logging elapsed time.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!("Finished: {} (took {:.2?})", self.label, self.start.elapsed());
    }
}

/// Format a price for terminal output: "EUR 1.065" (Dutch grouping, whole
/// euros).
pub fn fmt_eur(amount: f64) -> String {
    let rounded = amount.round() as i64;
    let digits = rounded.abs().to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    if rounded < 0 {
        grouped.push('-');
    }
    let grouped: String = grouped.chars().rev().collect();
    format!("EUR {grouped}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_eur() {
        assert_eq!(fmt_eur(1065.0), "EUR 1.065");
        assert_eq!(fmt_eur(524.4), "EUR 524");
        assert_eq!(fmt_eur(0.0), "EUR 0");
        assert_eq!(fmt_eur(-1250.0), "EUR -1.250");
    }
}
