//! Ordered composition of transport decorators.
//!
//! A chain `[d1, d2, ..., dn]` applied to a base transport `t` yields `d1(d2(...dn(t)))`: the
//! first decorator is the outermost, seeing the request first and the response last.

// std
use std::{
	borrow::Cow,
	fmt::{Debug, Formatter, Result as FmtResult},
};
// self
use crate::{_prelude::*, transport::Transport};

type WrapFn = dyn Fn(Transport) -> Transport + Send + Sync;

/// Named transport-to-transport transformation.
#[derive(Clone)]
pub struct Decorator {
	name: Cow<'static, str>,
	wrap: Arc<WrapFn>,
}
impl Decorator {
	/// Create a decorator from its wrapping function.
	pub fn new<F>(name: impl Into<Cow<'static, str>>, wrap: F) -> Self
	where
		F: Fn(Transport) -> Transport + Send + Sync + 'static,
	{
		Self { name: name.into(), wrap: Arc::new(wrap) }
	}

	/// Name used when inspecting a chain.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Wrap a single transport.
	pub fn decorate(&self, inner: Transport) -> Transport {
		(self.wrap)(inner)
	}
}
impl Debug for Decorator {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_tuple("Decorator").field(&self.name).finish()
	}
}

/// Ordered list of decorators, outermost first.
#[derive(Clone, Debug, Default)]
pub struct Chain {
	decorators: Vec<Decorator>,
}
impl Chain {
	/// Empty chain; applying it returns the base transport unchanged.
	pub fn new() -> Self {
		Self::default()
	}

	/// Append a decorator, which becomes the innermost one so far.
	pub fn with(mut self, decorator: Decorator) -> Self {
		self.decorators.push(decorator);

		self
	}

	/// Append a decorator in place.
	pub fn push(&mut self, decorator: Decorator) {
		self.decorators.push(decorator);
	}

	/// Decorator names from outermost to innermost.
	pub fn names(&self) -> Vec<&str> {
		self.decorators.iter().map(Decorator::name).collect()
	}

	/// Number of decorators.
	pub fn len(&self) -> usize {
		self.decorators.len()
	}

	/// Whether the chain has no decorators.
	pub fn is_empty(&self) -> bool {
		self.decorators.is_empty()
	}

	/// Compose the chain around `base`, folding right to left.
	pub fn apply(&self, base: Transport) -> Transport {
		self.decorators.iter().rev().fold(base, |inner, decorator| decorator.decorate(inner))
	}
}
impl FromIterator<Decorator> for Chain {
	fn from_iter<I>(iter: I) -> Self
	where
		I: IntoIterator<Item = Decorator>,
	{
		Self { decorators: iter.into_iter().collect() }
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use parking_lot::Mutex;
	// self
	use super::*;
	use crate::{ResponseBody, transport};

	fn recording(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Decorator {
		Decorator::new(name, move |inner: Transport| {
			let log = log.clone();

			transport::from_fn(move |request| {
				let inner = inner.clone();
				let log = log.clone();

				async move {
					log.lock().push(format!("{name}:request"));

					let response = inner.round_trip(request).await;

					log.lock().push(format!("{name}:response"));

					response
				}
			})
		})
	}

	#[tokio::test]
	async fn first_decorator_is_outermost() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let base_log = log.clone();
		let base = transport::from_fn(move |_| {
			let log = base_log.clone();

			async move {
				log.lock().push("base".into());

				Ok(http::Response::new(ResponseBody::empty()))
			}
		});
		let chain = Chain::new()
			.with(recording("d1", log.clone()))
			.with(recording("d2", log.clone()))
			.with(recording("d3", log.clone()));

		assert_eq!(chain.names(), ["d1", "d2", "d3"]);

		chain.apply(base).round_trip(Request::default()).await.expect("round trip");

		assert_eq!(
			*log.lock(),
			[
				"d1:request",
				"d2:request",
				"d3:request",
				"base",
				"d3:response",
				"d2:response",
				"d1:response"
			]
		);
	}

	#[test]
	fn empty_chain_is_identity() {
		let base = transport::from_fn(|_| async { Ok(http::Response::new(ResponseBody::empty())) });
		let composed = Chain::new().apply(base.clone());

		assert!(Chain::new().is_empty());
		assert!(Arc::ptr_eq(&base, &composed));
	}

	#[tokio::test]
	async fn separately_composed_chains_share_no_state() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let chain: Chain = [recording("only", log.clone())].into_iter().collect();
		let base = transport::from_fn(|_| async { Ok(http::Response::new(ResponseBody::empty())) });
		let first = chain.apply(base.clone());
		let second = chain.apply(base);

		first.round_trip(Request::default()).await.expect("first");
		second.round_trip(Request::default()).await.expect("second");

		assert_eq!(chain.len(), 1);
		assert_eq!(log.lock().len(), 4);
	}
}
