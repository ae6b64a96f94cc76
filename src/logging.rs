use tracing_subscriber::EnvFilter;

/// Initialise structured logging for the bridge.
///
/// `verbosity` comes from `-v/--verbose`:
///   * `0` → INFO
///   * `1` → DEBUG
///   * `2+` → TRACE
///
/// `RUST_LOG` wins over the flag when set.
pub fn init(verbosity: u8, use_color: bool) {
  let level = match verbosity {
    0 => tracing::Level::INFO,
    1 => tracing::Level::DEBUG,
    _ => tracing::Level::TRACE,
  };

  // Handshake and frame internals of the socket library stay quiet unless
  // asked for explicitly.
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
    EnvFilter::new(format!(
      "{},tungstenite=warn,tokio_tungstenite=warn",
      level.as_str()
    ))
  });

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .with_level(true)
    .with_ansi(use_color)
    .compact()
    .init();
}
