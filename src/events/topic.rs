//! Hierarchical topic matching.
//!
//! Topics are `/`-separated paths. In a pattern, `+` stands for exactly one segment and a
//! trailing `#` for one or more trailing segments. Wildcards never match a first segment that
//! starts with `$` (broker-internal topics).

use super::EventError;

const SINGLE_LEVEL: &str = "+";
const MULTI_LEVEL: &str = "#";

/// Check that `pattern` is a well-formed subscription pattern.
pub fn validate_pattern(pattern: &str) -> Result<(), EventError> {
	if pattern.is_empty() {
		return Err(EventError::InvalidPattern {
			pattern: pattern.to_string(),
			reason: "pattern is empty",
		});
	}

	let segments: Vec<&str> = pattern.split('/').collect();
	for (i, segment) in segments.iter().enumerate() {
		if segment.contains(MULTI_LEVEL) {
			if *segment != MULTI_LEVEL {
				return Err(EventError::InvalidPattern {
					pattern: pattern.to_string(),
					reason: "'#' must occupy a whole segment",
				});
			}
			if i != segments.len() - 1 {
				return Err(EventError::InvalidPattern {
					pattern: pattern.to_string(),
					reason: "'#' must be the last segment",
				});
			}
		}
		if segment.contains(SINGLE_LEVEL) && *segment != SINGLE_LEVEL {
			return Err(EventError::InvalidPattern {
				pattern: pattern.to_string(),
				reason: "'+' must occupy a whole segment",
			});
		}
	}
	Ok(())
}

/// Whether a concrete `topic` matches `pattern`.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
	let pattern: Vec<&str> = pattern.split('/').collect();
	let topic: Vec<&str> = topic.split('/').collect();
	let reserved = topic.first().is_some_and(|s| s.starts_with('$'));

	for (i, segment) in pattern.iter().enumerate() {
		if *segment == MULTI_LEVEL {
			if i == 0 && reserved {
				return false;
			}
			return topic.len() > i;
		}

		let Some(actual) = topic.get(i) else {
			return false;
		};

		if *segment == SINGLE_LEVEL {
			if i == 0 && reserved {
				return false;
			}
			continue;
		}

		if segment != actual {
			return false;
		}
	}

	pattern.len() == topic.len()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn single_level_wildcard_matches_one_segment() {
		assert!(topic_matches("banco/+/events", "banco/alice/events"));
		assert!(topic_matches("banco/+/events", "banco//events"));
		assert!(!topic_matches("banco/+/events", "banco/alice/bob/events"));
		assert!(!topic_matches("banco/+/events", "banco/events"));
		assert!(!topic_matches("banco/+/events", "other/alice/events"));
		assert!(topic_matches("+/+", "a/b"));
		assert!(!topic_matches("+", "a/b"));
	}

	#[test]
	fn multi_level_wildcard_matches_one_or_more_trailing_segments() {
		assert!(topic_matches("banco/#", "banco/alice"));
		assert!(topic_matches("banco/#", "banco/alice/events"));
		assert!(!topic_matches("banco/#", "banco"));
		assert!(topic_matches("banco/+/#", "banco/alice/events/deposit"));
		assert!(topic_matches("#", "anything/at/all"));
	}

	#[test]
	fn exact_patterns_need_exact_topics() {
		assert!(topic_matches("banco/alice/events", "banco/alice/events"));
		assert!(!topic_matches("banco/alice/events", "banco/alice/events/x"));
		assert!(!topic_matches("banco/alice/events", "banco/bob/events"));
	}

	#[test]
	fn wildcards_skip_reserved_topics() {
		assert!(!topic_matches("#", "$SYS/broker/uptime"));
		assert!(!topic_matches("+/broker/uptime", "$SYS/broker/uptime"));
		assert!(topic_matches("$SYS/#", "$SYS/broker/uptime"));
	}

	#[test]
	fn validation_rejects_misplaced_wildcards() {
		assert!(validate_pattern("banco/+/events").is_ok());
		assert!(validate_pattern("banco/#").is_ok());
		assert!(validate_pattern("#").is_ok());
		assert!(validate_pattern("").is_err());
		assert!(validate_pattern("banco/#/events").is_err());
		assert!(validate_pattern("banco/al+/events").is_err());
		assert!(validate_pattern("banco/ev#").is_err());
	}
}
