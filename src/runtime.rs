use crate::{Cli, run};
use owo_colors::OwoColorize;

/// Runs one client invocation and reports failures uniformly.
pub struct Runtime {
  cli: Cli,
}

impl Runtime {
  #[must_use]
  pub fn new(cli: Cli) -> Self {
    Self { cli }
  }

  /// Execute the client and return the process exit code.
  ///
  /// `run` decides the code on success (3 when the backend stayed
  /// unreachable). Errors print their cause chain and map to `1`.
  pub async fn execute(self) -> i32 {
    match run(self.cli).await {
      Ok(code) => code,
      Err(err) => {
        log_error_chain(&err);
        1
      }
    }
  }
}

fn log_error_chain(err: &anyhow::Error) {
  eprintln!("{} {}", "error:".red().bold(), err.to_string().red().bold());

  for cause in err.chain().skip(1) {
    eprintln!("  {} {}", "↳".red(), cause);
  }
}
