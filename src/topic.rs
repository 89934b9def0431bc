//! Topic validation and wildcard matching
//!
//! Subscriptions accept MQTT topic filters (`+` single level, `#` multi-level,
//! last segment only). Publishes require concrete topic names.

use crate::session::error::ArgumentError;

/// Topic length and depth limits
pub mod limits {
	/// Maximum encoded topic length allowed by the MQTT protocol
	pub const MAX_TOPIC_LENGTH: usize = 65535;

	/// Maximum topic nesting depth accepted by the session
	pub const MAX_TOPIC_DEPTH: usize = 32;
}

/// Validates a topic filter used for subscribe and unsubscribe calls.
pub fn validate_topic_filter(filter: &str) -> Result<(), ArgumentError> {
	validate_common(filter)?;

	let segments: Vec<&str> = filter.split('/').collect();
	let last = segments.len() - 1;
	for (index, segment) in segments.iter().enumerate() {
		if segment.contains('#') && (*segment != "#" || index != last) {
			return Err(ArgumentError::invalid_topic(
				filter,
				"# wildcard must occupy the whole last level",
			));
		}
		if segment.contains('+') && *segment != "+" {
			return Err(ArgumentError::invalid_topic(
				filter,
				"+ wildcard must occupy a whole level",
			));
		}
	}
	Ok(())
}

/// Validates a concrete topic name used for publishing.
pub fn validate_publish_topic(topic: &str) -> Result<(), ArgumentError> {
	validate_common(topic)?;
	if topic.chars().any(|c| matches!(c, '#' | '+')) {
		return Err(ArgumentError::invalid_topic(
			topic,
			"Topic contains wildcard characters ('#' or '+')",
		));
	}
	Ok(())
}

fn validate_common(topic: &str) -> Result<(), ArgumentError> {
	if topic.is_empty() {
		return Err(ArgumentError::EmptyTopic);
	}
	if topic.len() > limits::MAX_TOPIC_LENGTH {
		return Err(ArgumentError::invalid_topic(topic, "Topic is too long"));
	}
	if topic.contains('\0') {
		return Err(ArgumentError::invalid_topic(
			topic,
			"Topic contains a null byte",
		));
	}
	if topic.split('/').count() > limits::MAX_TOPIC_DEPTH {
		return Err(ArgumentError::invalid_topic(topic, "Topic is too deep"));
	}
	Ok(())
}

/// Returns true when `topic` is matched by the subscription `filter`.
///
/// Topics starting with `$` are not matched by filters starting with a
/// wildcard.
pub fn matches_filter(filter: &str, topic: &str) -> bool {
	if topic.starts_with('$') && filter.starts_with(['+', '#']) {
		return false;
	}

	let mut filter_levels = filter.split('/');
	let mut topic_levels = topic.split('/');
	loop {
		match (filter_levels.next(), topic_levels.next()) {
			| (Some("#"), _) => return true,
			| (Some("+"), Some(_)) => {}
			| (Some(expected), Some(actual)) if expected == actual => {}
			| (None, None) => return true,
			| _ => return false,
		}
	}
}
