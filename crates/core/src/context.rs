//! Thread-local override scopes for service lookup.
//!
//! A [`Context`] binds service names to instances and chains to the context
//! that was on top of this thread's stack when it was pushed. Lookups try the
//! local bindings, then each parent, then a [`ServiceRegistry`]. Contexts
//! never cross threads: a worker thread sees an empty stack.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::marker::PhantomData;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::error::{ManagerError, Result};
use crate::registry::ServiceRegistry;
use crate::service::{Service, downcast_service, is_service};

pub type Bindings = IndexMap<String, Arc<dyn Service>>;

thread_local! {
	static STACK: RefCell<Vec<Context>> = const { RefCell::new(Vec::new()) };
}

struct ContextInner {
	name: String,
	bindings: Bindings,
	parent: Option<Context>,
	registry: Option<Arc<ServiceRegistry>>,
	lenient: bool,
}

/// One override scope. Cheap to clone.
#[derive(Clone)]
pub struct Context {
	inner: Arc<ContextInner>,
}

impl std::fmt::Debug for Context {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Context")
			.field("name", &self.inner.name)
			.field("bindings", &self.inner.bindings.keys().collect::<Vec<_>>())
			.field("parent", &self.inner.parent.as_ref().map(Context::name))
			.field("lenient", &self.inner.lenient)
			.finish()
	}
}

impl Context {
	pub fn builder(name: impl Into<String>) -> ContextBuilder {
		ContextBuilder::new(name)
	}

	pub fn name(&self) -> &str {
		&self.inner.name
	}

	pub fn parent(&self) -> Option<&Context> {
		self.inner.parent.as_ref()
	}

	/// Whether [`Self::resolve_service`] skips its type check.
	pub fn is_test_mode(&self) -> bool {
		self.inner.lenient
	}

	pub fn ptr_eq(&self, other: &Context) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}

	fn lookup(&self, name: &str) -> Option<Arc<dyn Service>> {
		let mut ctx = Some(self);
		while let Some(current) = ctx {
			if let Some(service) = current.inner.bindings.get(name) {
				return Some(Arc::clone(service));
			}
			ctx = current.parent();
		}
		None
	}

	/// Nearest registry bound on this context or a parent.
	fn bound_registry(&self) -> Option<&ServiceRegistry> {
		let mut ctx = Some(self);
		while let Some(current) = ctx {
			if let Some(registry) = &current.inner.registry {
				return Some(registry);
			}
			ctx = current.parent();
		}
		None
	}

	/// Registry consulted after the chain: the bound one, else the global
	/// registry.
	fn fallback_registry(&self) -> &ServiceRegistry {
		match self.bound_registry() {
			Some(registry) => registry,
			None => ServiceRegistry::global(),
		}
	}

	fn find(&self, name: &str) -> Result<Arc<dyn Service>> {
		match self.lookup(name) {
			Some(service) => Ok(service),
			None => self.fallback_registry().get(name),
		}
	}

	/// Resolves `name` expecting a `T`. Test-mode contexts hand back whatever
	/// is bound without checking.
	pub fn resolve_service<T: Service>(&self, name: &str) -> Result<Arc<dyn Service>> {
		let service = self.find(name)?;
		if !self.inner.lenient && !is_service::<T>(service.as_ref()) {
			return Err(ManagerError::TypeMismatch {
				name: name.to_owned(),
				expected: std::any::type_name::<T>(),
				actual: service.as_ref().type_name(),
			});
		}
		Ok(service)
	}

	/// Resolves `name` as a concrete `T`.
	pub fn resolve<T: Service>(&self, name: &str) -> Result<Arc<T>> {
		downcast_service(name, self.find(name)?)
	}

	/// Like [`Self::resolve`], but falls back to `registry` instead of the
	/// global one when no context in the chain has a registry bound.
	pub fn resolve_or<T: Service>(&self, name: &str, registry: &ServiceRegistry) -> Result<Arc<T>> {
		let service = match self.lookup(name) {
			Some(service) => service,
			None => self.bound_registry().unwrap_or(registry).get(name)?,
		};
		downcast_service(name, service)
	}

	pub fn has_service(&self, name: &str) -> bool {
		self.lookup(name).is_some() || self.fallback_registry().get(name).is_ok()
	}

	/// Every resolvable name: local first, then parents, then the registry.
	pub fn available_services(&self) -> Vec<String> {
		let mut names = IndexSet::new();
		let mut ctx = Some(self);
		while let Some(current) = ctx {
			names.extend(current.inner.bindings.keys().cloned());
			ctx = current.parent();
		}
		names.extend(self.fallback_registry().service_names().into_iter().map(str::to_owned));
		names.into_iter().collect()
	}

	/// New context chained to `self`, inheriting its test mode. Not pushed.
	pub fn child(&self, name: impl Into<String>, bindings: Bindings) -> Context {
		Context {
			inner: Arc::new(ContextInner {
				name: name.into(),
				bindings,
				parent: Some(self.clone()),
				registry: None,
				lenient: self.inner.lenient,
			}),
		}
	}

	/// Multi-line dump of the chain, innermost first.
	pub fn debug_info(&self) -> String {
		let mut out = String::new();
		let mut ctx = Some(self);
		let mut depth = 0usize;
		while let Some(current) = ctx {
			let names: Vec<&str> = current.inner.bindings.keys().map(String::as_str).collect();
			let _ = writeln!(out, "{:indent$}{} [{}]", "", current.name(), names.join(", "), indent = depth * 2);
			ctx = current.parent();
			depth += 1;
		}
		out
	}
}

pub struct ContextBuilder {
	name: String,
	bindings: Bindings,
	registry: Option<Arc<ServiceRegistry>>,
	lenient: bool,
}

impl ContextBuilder {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			bindings: Bindings::new(),
			registry: None,
			lenient: false,
		}
	}

	#[must_use]
	pub fn bind(mut self, name: impl Into<String>, service: Arc<dyn Service>) -> Self {
		self.bindings.insert(name.into(), service);
		self
	}

	/// Registry used instead of the global one once the chain is exhausted.
	#[must_use]
	pub fn registry(mut self, registry: Arc<ServiceRegistry>) -> Self {
		self.registry = Some(registry);
		self
	}

	#[must_use]
	pub fn test_mode(mut self, lenient: bool) -> Self {
		self.lenient = lenient;
		self
	}

	/// Builds a context whose parent is the current top of this thread's
	/// stack, without pushing it.
	pub fn build(self) -> Context {
		let parent = current();
		let lenient = self.lenient || parent.as_ref().is_some_and(Context::is_test_mode);
		Context {
			inner: Arc::new(ContextInner {
				name: self.name,
				bindings: self.bindings,
				parent,
				registry: self.registry,
				lenient,
			}),
		}
	}

	pub fn push(self) -> Context {
		let context = self.build();
		push_context(context.clone());
		context
	}

	/// Pushes and returns a guard that pops on drop.
	pub fn enter(self) -> ContextGuard {
		ContextGuard {
			context: self.push(),
			_not_send: PhantomData,
		}
	}
}

/// Pops its context when dropped. Tied to the pushing thread.
#[must_use = "the context is popped as soon as the guard is dropped"]
pub struct ContextGuard {
	context: Context,
	_not_send: PhantomData<*const ()>,
}

impl ContextGuard {
	pub fn context(&self) -> &Context {
		&self.context
	}
}

impl std::ops::Deref for ContextGuard {
	type Target = Context;

	fn deref(&self) -> &Context {
		&self.context
	}
}

impl Drop for ContextGuard {
	fn drop(&mut self) {
		STACK.with_borrow_mut(|stack| {
			let Some(pos) = stack.iter().rposition(|c| c.ptr_eq(&self.context)) else {
				tracing::warn!(context = self.context.name(), "context.guard_already_popped");
				return;
			};
			if pos + 1 != stack.len() {
				let above: Vec<&str> = stack[pos + 1..].iter().map(Context::name).collect();
				tracing::warn!(context = self.context.name(), ?above, "context.popped_out_of_order");
			}
			stack.truncate(pos);
		});
	}
}

fn push_context(context: Context) {
	tracing::trace!(context = context.name(), "context.pushed");
	STACK.with_borrow_mut(|stack| stack.push(context));
}

/// Pushes a context built from `bindings` on top of the current one.
pub fn push(bindings: Bindings, name: impl Into<String>) -> Context {
	let mut builder = ContextBuilder::new(name);
	builder.bindings = bindings;
	builder.push()
}

/// Removes and returns the top context.
pub fn pop() -> Option<Context> {
	let popped = STACK.with_borrow_mut(Vec::pop);
	if let Some(context) = &popped {
		tracing::trace!(context = context.name(), "context.popped");
	}
	popped
}

pub fn current() -> Option<Context> {
	STACK.with_borrow(|stack| stack.last().cloned())
}

pub fn depth() -> usize {
	STACK.with_borrow(Vec::len)
}

/// [`Context::resolve_service`] on the current context, or the global
/// registry when the stack is empty.
pub fn resolve_service<T: Service>(name: &str) -> Result<Arc<dyn Service>> {
	match current() {
		Some(context) => context.resolve_service::<T>(name),
		None => {
			let service = ServiceRegistry::global().get(name)?;
			if is_service::<T>(service.as_ref()) {
				Ok(service)
			} else {
				Err(ManagerError::TypeMismatch {
					name: name.to_owned(),
					expected: std::any::type_name::<T>(),
					actual: service.as_ref().type_name(),
				})
			}
		}
	}
}

/// [`Context::resolve`] on the current context, or the global registry when
/// the stack is empty.
pub fn resolve<T: Service>(name: &str) -> Result<Arc<T>> {
	match current() {
		Some(context) => context.resolve(name),
		None => ServiceRegistry::global().get_typed(name),
	}
}

#[cfg(test)]
mod tests;
