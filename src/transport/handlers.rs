use std::collections::HashMap;

use super::{InboundMessage, MessageHandler};
use crate::topic::matches_filter;

/// Per-filter message handlers of a live transport.
///
/// A filter without a handler is simply absent; messages it matches are left
/// for the default route.
#[derive(Default)]
pub(crate) struct HandlerTable {
	handlers: HashMap<String, MessageHandler>,
}

impl HandlerTable {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	/// Installs or clears the handler for `filter`.
	pub(crate) fn set(&mut self, filter: &str, handler: Option<MessageHandler>) {
		match handler {
			| Some(handler) => {
				self.handlers.insert(filter.to_string(), handler);
			}
			| None => {
				self.handlers.remove(filter);
			}
		}
	}

	pub(crate) fn remove(&mut self, filter: &str) {
		self.handlers.remove(filter);
	}

	pub(crate) fn clear(&mut self) {
		self.handlers.clear();
	}

	pub(crate) fn len(&self) -> usize {
		self.handlers.len()
	}

	/// Handlers whose filter matches the message topic.
	pub(crate) fn matching(&self, topic: &str) -> Vec<MessageHandler> {
		self.handlers
			.iter()
			.filter(|(filter, _)| matches_filter(filter, topic))
			.map(|(_, handler)| handler.clone())
			.collect()
	}
}

/// Runs every handler against `message`. Returns false when there were none.
pub(crate) fn dispatch(
	handlers: &[MessageHandler],
	message: &InboundMessage,
) -> bool {
	for handler in handlers {
		handler(message);
	}
	!handlers.is_empty()
}
