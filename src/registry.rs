//! Subscription registry
//!
//! In-memory record of what the application wants to be subscribed to. One
//! [`SubscriptionIntent`] per topic filter, last write wins. The registry does
//! no I/O; the session controller owns it and replays a [`RegistrySnapshot`]
//! against every fresh connection.

use std::collections::HashMap;
use std::fmt;

use arcstr::ArcStr;
use rumqttc::QoS;

use crate::qos::IntoQos;
use crate::session::error::ArgumentError;
use crate::topic::validate_topic_filter;
use crate::transport::MessageHandler;

/// Subscription the application wants active.
#[derive(Clone)]
pub struct SubscriptionIntent {
	topic: ArcStr,
	qos: QoS,
	handler: Option<MessageHandler>,
}

impl SubscriptionIntent {
	/// Topic filter
	pub fn topic(&self) -> &ArcStr {
		&self.topic
	}

	/// Requested QoS
	pub fn qos(&self) -> QoS {
		self.qos
	}

	/// Per-topic handler; `None` routes messages to the default handler
	pub fn handler(&self) -> Option<&MessageHandler> {
		self.handler.as_ref()
	}
}

impl fmt::Debug for SubscriptionIntent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SubscriptionIntent")
			.field("topic", &self.topic)
			.field("qos", &self.qos)
			.field("has_handler", &self.handler.is_some())
			.finish()
	}
}

/// Topic-keyed map of subscription intents.
#[derive(Default, Debug)]
pub struct SubscriptionRegistry {
	entries: HashMap<ArcStr, SubscriptionIntent>,
}

impl SubscriptionRegistry {
	/// Creates an empty registry
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts or replaces the intent for `topic`.
	///
	/// Validation happens before any mutation; on error the registry is
	/// unchanged. Returns the replaced intent, if any.
	pub fn put(
		&mut self,
		topic: &str,
		qos: impl IntoQos,
		handler: Option<MessageHandler>,
	) -> Result<Option<SubscriptionIntent>, ArgumentError> {
		validate_topic_filter(topic)?;
		let qos = qos.into_qos()?;
		let topic = ArcStr::from(topic);
		let intent = SubscriptionIntent {
			topic: topic.clone(),
			qos,
			handler,
		};
		Ok(self.entries.insert(topic, intent))
	}

	/// Deletes the intent for `topic`. Absent topics are a no-op.
	pub fn remove(&mut self, topic: &str) -> Option<SubscriptionIntent> {
		self.entries.remove(topic)
	}

	/// Deletes every listed topic. Returns how many were present.
	///
	/// Under the controller's lock no snapshot can observe a partial batch.
	pub fn remove_all<S: AsRef<str>>(&mut self, topics: &[S]) -> usize {
		topics
			.iter()
			.filter(|topic| self.entries.remove(topic.as_ref()).is_some())
			.count()
	}

	/// Intent registered for `topic`
	pub fn get(&self, topic: &str) -> Option<&SubscriptionIntent> {
		self.entries.get(topic)
	}

	/// Whether `topic` is registered
	pub fn contains(&self, topic: &str) -> bool {
		self.entries.contains_key(topic)
	}

	/// Number of registered topics
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// True when nothing is registered
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Drops every intent
	pub fn clear(&mut self) {
		self.entries.clear();
	}

	/// Immutable point-in-time copy of all intents.
	pub fn snapshot(&self) -> RegistrySnapshot {
		RegistrySnapshot {
			intents: self.entries.values().cloned().collect(),
		}
	}
}

/// Point-in-time copy of the registry. Iteration order is unspecified.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
	intents: Vec<SubscriptionIntent>,
}

impl RegistrySnapshot {
	/// Number of intents captured
	pub fn len(&self) -> usize {
		self.intents.len()
	}

	/// True when the registry was empty
	pub fn is_empty(&self) -> bool {
		self.intents.is_empty()
	}

	/// Intent for `topic`, if captured
	pub fn get(&self, topic: &str) -> Option<&SubscriptionIntent> {
		self.intents.iter().find(|intent| intent.topic.as_str() == topic)
	}

	/// Iterates over captured intents
	pub fn iter(&self) -> std::slice::Iter<'_, SubscriptionIntent> {
		self.intents.iter()
	}

	/// Captured topics
	pub fn topics(&self) -> Vec<ArcStr> {
		self.intents.iter().map(|intent| intent.topic.clone()).collect()
	}
}

impl IntoIterator for RegistrySnapshot {
	type IntoIter = std::vec::IntoIter<SubscriptionIntent>;
	type Item = SubscriptionIntent;

	fn into_iter(self) -> Self::IntoIter {
		self.intents.into_iter()
	}
}

impl<'a> IntoIterator for &'a RegistrySnapshot {
	type IntoIter = std::slice::Iter<'a, SubscriptionIntent>;
	type Item = &'a SubscriptionIntent;

	fn into_iter(self) -> Self::IntoIter {
		self.intents.iter()
	}
}
