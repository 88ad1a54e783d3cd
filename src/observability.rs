use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with the configured log level.
///
/// Accepts the usual tracing level names (case-insensitive) plus two
/// aliases kept for config compatibility: `warning` maps to WARN and
/// `disabled` installs no subscriber at all.
pub fn init_tracing(log_level: &str) {
    let level = log_level.trim().to_lowercase();

    if level == "disabled" {
        return;
    }

    let directive = match level.as_str() {
        "warning" => "warn",
        "" => "info",
        other => other,
    };

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
