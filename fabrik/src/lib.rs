//! A dependency-injection factory runtime built around *rules*: small
//! producers which declare the component names they can build and hand out
//! an engine (a build procedure plus its bill of dependency materials) per
//! name. A [factory](crate::factory::Factory) resolves queries by name or by
//! type, expands the dependency graph on demand, materializes components in
//! topological order, memoizes them in a warehouse and applies
//! post-construction customizers.
//!
//! Rules come from static registration ([crate::submit_rule!]), direct
//! builder calls, scoped [overlays](crate::overlay), and even from other
//! rules: the builder runs a fixed-point loop, so rules producing rules
//! converge before the final factory is assembled.
//!
//! ### Simple usage example
//!
//! ```
//! use fabrik::engine::{Bom, StdEngine};
//! use fabrik::factory::FactoryBuilder;
//! use fabrik::name::TypedName;
//! use fabrik::query::Query;
//! use fabrik::rule::{SingletonRule, StdRule};
//!
//! let audience = TypedName::<String>::new("audience");
//! let greeting = TypedName::<String>::new("greeting");
//!
//! // "greeting" declares a dependency on "audience" in its bill of materials
//! let dependency = Query::by_name(&audience);
//! let factory = FactoryBuilder::new()
//!     .add_rule(SingletonRule::new(audience.clone(), "world".to_string()))
//!     .add_rule(StdRule::new(StdEngine::new(
//!         greeting.clone(),
//!         Bom::of([dependency.clone()]),
//!         move |bom| Ok(format!("hello, {}", bom.one_as::<String>(&dependency)?)),
//!     )))
//!     .build()?;
//!
//! assert_eq!(*factory.component(&greeting)?, "hello, world");
//! # Ok::<(), fabrik::error::FactoryError>(())
//! ```

pub mod customizer;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod factory;
pub mod metrics;
pub mod name;
pub mod overlay;
pub mod query;
pub mod registry;
mod resolver;
pub mod rule;
pub mod warehouse;
