//! Topic identity and subscription-type discriminants (spec §3).

use std::fmt;

use serde::{Deserialize, Serialize};

/// `(tenant, namespace, localName)` plus the persistence discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicName {
    pub tenant: String,
    pub namespace: String,
    pub local_name: String,
    pub persistent: bool,
}

impl TopicName {
    pub fn new(tenant: impl Into<String>, namespace: impl Into<String>, local_name: impl Into<String>, persistent: bool) -> Self {
        Self { tenant: tenant.into(), namespace: namespace.into(), local_name: local_name.into(), persistent }
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.persistent { "persistent" } else { "non-persistent" };
        write!(f, "{scheme}://{}/{}/{}", self.tenant, self.namespace, self.local_name)
    }
}

/// A subscription's fixed dispatch semantics. Immutable after creation
/// (spec §3, Subscription invariant (i)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubType {
    Exclusive,
    Failover,
    Shared,
    Compactor,
}
