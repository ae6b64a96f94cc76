use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Dotted numeric API version; missing trailing segments count as zero.
#[derive(Debug, Clone)]
pub struct ApiVersion {
  segments: Vec<u64>,
}

impl ApiVersion {
  pub fn segments(&self) -> &[u64] {
    &self.segments
  }
}

impl PartialEq for ApiVersion {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for ApiVersion {}

impl PartialOrd for ApiVersion {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for ApiVersion {
  fn cmp(&self, other: &Self) -> Ordering {
    let width = self.segments.len().max(other.segments.len());
    (0..width)
      .map(|i| {
        let left = self.segments.get(i).copied().unwrap_or(0);
        let right = other.segments.get(i).copied().unwrap_or(0);
        left.cmp(&right)
      })
      .find(|ordering| ordering.is_ne())
      .unwrap_or(Ordering::Equal)
  }
}

impl fmt::Display for ApiVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let text = self
      .segments
      .iter()
      .map(u64::to_string)
      .collect::<Vec<_>>()
      .join(".");
    f.write_str(&text)
  }
}

/// Error returned when a version string has a non-numeric segment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid api version `{input}`")]
pub struct ParseVersionError {
  input: String,
}

impl ParseVersionError {
  pub fn input(&self) -> &str {
    &self.input
  }
}

impl FromStr for ApiVersion {
  type Err = ParseVersionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let trimmed = s.trim();
    let segments = trimmed
      .split('.')
      .map(|segment| segment.parse::<u64>())
      .collect::<Result<Vec<_>, _>>()
      .map_err(|_| ParseVersionError {
        input: s.to_string(),
      })?;
    Ok(Self { segments })
  }
}

/// Compare two dotted versions numerically, segment by segment.
pub fn compare_versions(
  left: &str,
  right: &str,
) -> Result<Ordering, ParseVersionError> {
  Ok(left.parse::<ApiVersion>()?.cmp(&right.parse::<ApiVersion>()?))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn segments_compare_numerically() {
    assert_eq!(compare_versions("1.2.0", "1.10.0"), Ok(Ordering::Less));
    assert_eq!(compare_versions("1.10.0", "1.9.9"), Ok(Ordering::Greater));
  }

  #[test]
  fn missing_segments_are_zero() {
    assert_eq!(compare_versions("2.0", "2.0.0"), Ok(Ordering::Equal));
    assert_eq!(compare_versions("2", "2.0.1"), Ok(Ordering::Less));
    assert_eq!(
      "3.1".parse::<ApiVersion>(),
      "3.1.0.0".parse::<ApiVersion>()
    );
  }

  #[test]
  fn rejects_non_numeric_segments() {
    let err = compare_versions("unknown", "1.0.0").unwrap_err();
    assert_eq!(err.input(), "unknown");
    assert!("1..2".parse::<ApiVersion>().is_err());
    assert!("".parse::<ApiVersion>().is_err());
  }

  #[test]
  fn display_round_trips_segments() {
    let version: ApiVersion = " 1.4.2 ".parse().unwrap();
    assert_eq!(version.to_string(), "1.4.2");
    assert_eq!(version.segments(), &[1, 4, 2]);
  }
}
