//! Symbol resolution for loaded scripts.
//!
//! A [`ResolverChain`] asks each resolver in order and takes the first
//! answer. The driver puts the runtime resolvers first and any caller-supplied
//! fallbacks after them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Address a symbol resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolAddress(pub u64);

impl fmt::Display for SymbolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A source of symbol addresses.
pub trait SymbolResolver: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Returns the address of `symbol`, or `None` if unknown here.
    fn resolve(&self, symbol: &str) -> Option<SymbolAddress>;
}

/// A fixed table of symbols.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    name: String,
    symbols: HashMap<String, SymbolAddress>,
}

impl SymbolTable {
    /// Creates an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbols: HashMap::new(),
        }
    }

    /// Adds or replaces a symbol.
    pub fn insert(&mut self, symbol: impl Into<String>, address: SymbolAddress) {
        self.symbols.insert(symbol.into(), address);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, symbol: impl Into<String>, address: u64) -> Self {
        self.insert(symbol, SymbolAddress(address));
        self
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Returns `true` if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl SymbolResolver for SymbolTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, symbol: &str) -> Option<SymbolAddress> {
        self.symbols.get(symbol).copied()
    }
}

/// Resolves symbols through a caller-supplied lookup function.
pub struct LookupFunctionResolver<F> {
    name: String,
    lookup: F,
}

impl<F> LookupFunctionResolver<F>
where
    F: Fn(&str) -> Option<SymbolAddress> + Send + Sync,
{
    /// Wraps `lookup`.
    pub fn new(name: impl Into<String>, lookup: F) -> Self {
        Self {
            name: name.into(),
            lookup,
        }
    }
}

impl<F> SymbolResolver for LookupFunctionResolver<F>
where
    F: Fn(&str) -> Option<SymbolAddress> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, symbol: &str) -> Option<SymbolAddress> {
        (self.lookup)(symbol)
    }
}

impl<F> fmt::Debug for LookupFunctionResolver<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupFunctionResolver")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// An ordered list of resolvers; the first to answer wins.
#[derive(Clone, Default)]
pub struct ResolverChain {
    resolvers: Vec<Arc<dyn SymbolResolver>>,
}

impl ResolverChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `resolver` after the existing ones.
    pub fn chain(&mut self, resolver: impl SymbolResolver + 'static) {
        self.resolvers.push(Arc::new(resolver));
    }

    /// Appends an already shared resolver.
    pub fn chain_shared(&mut self, resolver: Arc<dyn SymbolResolver>) {
        self.resolvers.push(resolver);
    }

    /// Returns a chain consulting `self` first, then `fallback`.
    pub fn followed_by(&self, fallback: &ResolverChain) -> ResolverChain {
        let mut resolvers = self.resolvers.clone();
        resolvers.extend(fallback.resolvers.iter().cloned());
        ResolverChain { resolvers }
    }

    /// Resolves `symbol`.
    pub fn resolve(&self, symbol: &str) -> Option<SymbolAddress> {
        self.resolve_with_source(symbol).map(|(address, _)| address)
    }

    /// Resolves `symbol`, also naming the resolver that answered.
    pub fn resolve_with_source(&self, symbol: &str) -> Option<(SymbolAddress, &str)> {
        self.resolvers
            .iter()
            .find_map(|r| r.resolve(symbol).map(|address| (address, r.name())))
    }

    /// Number of resolvers.
    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    /// Returns `true` if the chain has no resolvers.
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl fmt::Debug for ResolverChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.resolvers.iter().map(|r| r.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_resolver_wins() {
        let mut chain = ResolverChain::new();
        chain.chain(SymbolTable::new("bcc-runtime").with("memcpy", 0x1000));
        chain.chain(
            SymbolTable::new("rs-runtime")
                .with("memcpy", 0x2000)
                .with("rsDebug", 0x2100),
        );

        assert_eq!(
            chain.resolve_with_source("memcpy"),
            Some((SymbolAddress(0x1000), "bcc-runtime"))
        );
        assert_eq!(
            chain.resolve_with_source("rsDebug"),
            Some((SymbolAddress(0x2100), "rs-runtime"))
        );
        assert_eq!(chain.resolve("missing"), None);
    }

    #[test]
    fn lookup_function_consulted() {
        let mut chain = ResolverChain::new();
        chain.chain(LookupFunctionResolver::new("host", |name: &str| {
            name.strip_prefix("host_").map(|_| SymbolAddress(0xbeef))
        }));
        assert_eq!(chain.resolve("host_log"), Some(SymbolAddress(0xbeef)));
        assert_eq!(chain.resolve("log"), None);
    }

    #[test]
    fn followed_by_keeps_order() {
        let mut runtime = ResolverChain::new();
        runtime.chain(SymbolTable::new("runtime").with("sqrt", 1));
        let mut fallback = ResolverChain::new();
        fallback.chain(SymbolTable::new("user").with("sqrt", 2).with("blend", 3));

        let joined = runtime.followed_by(&fallback);
        assert_eq!(joined.len(), 2);
        assert_eq!(joined.resolve("sqrt"), Some(SymbolAddress(1)));
        assert_eq!(joined.resolve("blend"), Some(SymbolAddress(3)));
        assert_eq!(format!("{joined:?}"), "[\"runtime\", \"user\"]");
    }

    #[test]
    fn empty_chain_resolves_nothing() {
        let chain = ResolverChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.resolve("anything"), None);
    }

    #[test]
    fn address_display_is_hex() {
        assert_eq!(SymbolAddress(0x2a).to_string(), "0x2a");
    }
}
