/// Helpers for console command text.
pub mod command {
  /// Normalise a console command before it goes over RCON.
  ///
  /// Trailing carriage returns and line feeds are trimmed. Blank input yields
  /// `None`, meaning nothing should be executed.
  ///
  /// # Examples
  ///
  /// ```
  /// use fgate_client::util::command::sanitize;
  ///
  /// assert_eq!(sanitize("say Hello\n"), Some("say Hello".to_string()));
  /// assert_eq!(sanitize("\n\n"), None);
  /// ```
  #[must_use]
  pub fn sanitize(raw: &str) -> Option<String> {
    let trimmed = raw.trim_matches(['\r', '\n']);
    if trimmed.trim().is_empty() {
      None
    } else {
      Some(trimmed.to_string())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::command::sanitize;

  #[test]
  fn sanitize_removes_trailing_newlines() {
    assert_eq!(sanitize("list\n"), Some("list".to_string()));
    assert_eq!(sanitize("say hello\r\n"), Some("say hello".to_string()));
    assert_eq!(sanitize("say hello\r\n\n"), Some("say hello".to_string()));
  }

  #[test]
  fn sanitize_rejects_blank_input() {
    assert_eq!(sanitize("   \n"), None);
    assert_eq!(sanitize("\n\n"), None);
  }

  #[test]
  fn inner_whitespace_is_kept() {
    assert_eq!(
      sanitize("tellraw @a  {\"text\":\"hi\"}\n"),
      Some("tellraw @a  {\"text\":\"hi\"}".to_string())
    );
  }
}
