use std::io;

/// Logs a warning when `$cond` does not hold, and carries on.
#[macro_export]
macro_rules! check {
  ($cond: expr, $prompt: literal $(, $params: expr)* $(,)? ) => {
    if !$cond {
      ::tracing::warn!($prompt $(, $params)*);
    }
  }
}

pub fn prompt_password(prompt: &str) -> io::Result<String> {
    rpassword::prompt_password(prompt)
}

pub fn indent_str(string: &str, level: usize) -> String {
    string
        .lines()
        .map(|line| format!("{:indent$} |  {}", "", line, indent = level))
        .collect::<Vec<_>>()
        .join("\n")
}
