//! Application tasks run on connection lifecycle changes

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use tracing::debug;

/// Task run after a (re)connection or a connection loss.
pub type LifecycleHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps an async closure into a [`LifecycleHook`].
pub fn lifecycle_hook<F, Fut>(f: F) -> LifecycleHook
where
	F: Fn() -> Fut + Send + Sync + 'static,
	Fut: Future<Output = ()> + Send + 'static,
{
	Arc::new(move || Box::pin(f()))
}

/// Identifies a registered hook for later removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Which lifecycle change a hook reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
	/// After replay of a (re)connection
	Connect,
	/// After a connection loss
	Disconnect,
}

#[derive(Default)]
pub(crate) struct LifecycleHooks {
	next_id: AtomicU64,
	on_connect: RwLock<Vec<(HookId, LifecycleHook)>>,
	on_disconnect: RwLock<Vec<(HookId, LifecycleHook)>>,
}

impl LifecycleHooks {
	fn list(&self, kind: HookKind) -> &RwLock<Vec<(HookId, LifecycleHook)>> {
		match kind {
			| HookKind::Connect => &self.on_connect,
			| HookKind::Disconnect => &self.on_disconnect,
		}
	}

	pub(crate) fn add(&self, kind: HookKind, hook: LifecycleHook) -> HookId {
		let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
		self.list(kind)
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.push((id, hook));
		id
	}

	pub(crate) fn remove(&self, kind: HookKind, id: HookId) -> bool {
		let mut hooks = self
			.list(kind)
			.write()
			.unwrap_or_else(PoisonError::into_inner);
		let before = hooks.len();
		hooks.retain(|(hook_id, _)| *hook_id != id);
		hooks.len() != before
	}

	/// Spawns every hook of `kind` on its own task.
	pub(crate) fn spawn_all(&self, kind: HookKind) {
		let hooks: Vec<LifecycleHook> = self
			.list(kind)
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.iter()
			.map(|(_, hook)| hook.clone())
			.collect();
		if !hooks.is_empty() {
			debug!(kind = ?kind, count = hooks.len(), "Running lifecycle hooks");
		}
		for hook in hooks {
			tokio::spawn(hook());
		}
	}
}
