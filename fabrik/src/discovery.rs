//! Static discovery of rule sources. Crates register rules at link time
//! through [inventory]; the builder collects every registration into the
//! discovered-rules bucket unless discovery is switched off.

use crate::rule::RulePtr;
use itertools::Itertools;

pub use inventory::submit;

/// A statically registered rule source. Register with [crate::submit_rule!].
pub struct RuleRegistration {
    pub construct: fn() -> RulePtr,
}

inventory::collect!(RuleRegistration);

/// Registers a rule source for static discovery.
///
/// ```
/// use fabrik::name::TypedName;
/// use fabrik::rule::{RulePtr, SingletonRule};
/// use std::sync::Arc;
///
/// fabrik::submit_rule!(|| {
///     Arc::new(SingletonRule::new(
///         TypedName::<&'static str>::new("discovered-greeting"),
///         "hello",
///     )) as RulePtr
/// });
/// ```
#[macro_export]
macro_rules! submit_rule {
    ($construct:expr) => {
        $crate::discovery::submit! {
            $crate::discovery::RuleRegistration {
                construct: $construct,
            }
        }
    };
}

pub(crate) fn discovered_rules() -> Vec<RulePtr> {
    inventory::iter::<RuleRegistration>
        .into_iter()
        .map(|registration| (registration.construct)())
        .collect_vec()
}
