//! Capability registry
//!
//! Built once at startup through [`RegistryBuilder`] and read-only afterwards,
//! so lookups need no locking. Capabilities are indexed by the trait object
//! type: `registry.implementing::<dyn ArtistArtwork>()`.

use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{AggregateError, ProviderError};
use crate::stats::StatsSnapshot;

/// Unit of upstream access owned by the registry
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Declare every capability this provider satisfies
    fn register_capabilities(self: Arc<Self>, capabilities: &mut CapabilitySet);

    /// Called once before serving; pools may still be created lazily
    async fn init(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn shutdown(&self) {}

    /// Outcome counters, for providers that make outbound HTTP calls
    fn stats(&self) -> Option<StatsSnapshot> {
        None
    }
}

/// Capability lists keyed by trait object type, in registration order
#[derive(Default)]
pub struct CapabilitySet {
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl CapabilitySet {
    pub fn add<C>(&mut self, capability: Arc<C>)
    where
        C: ?Sized + Send + Sync + 'static,
    {
        let entry = self
            .entries
            .entry(TypeId::of::<C>())
            .or_insert_with(|| Box::new(Vec::<Arc<C>>::new()) as Box<dyn Any + Send + Sync>);

        if let Some(list) = entry.downcast_mut::<Vec<Arc<C>>>() {
            list.push(capability);
        }
    }

    fn get<C>(&self) -> &[Arc<C>]
    where
        C: ?Sized + Send + Sync + 'static,
    {
        self.entries
            .get(&TypeId::of::<C>())
            .and_then(|entry| entry.downcast_ref::<Vec<Arc<C>>>())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

pub struct RegistryBuilder {
    providers: Vec<Arc<dyn Provider>>,
    capabilities: CapabilitySet,
}

impl RegistryBuilder {
    pub fn register<P: Provider>(mut self, provider: P) -> Self {
        self.register_arc(Arc::new(provider));
        self
    }

    pub fn register_arc<P: Provider>(&mut self, provider: Arc<P>) {
        info!(provider = provider.name(), "Registering provider");
        provider.clone().register_capabilities(&mut self.capabilities);
        self.providers.push(provider);
    }

    pub fn build(self) -> Registry {
        Registry {
            providers: self.providers,
            capabilities: self.capabilities,
        }
    }
}

/// Process-wide provider list, ordered by preference
pub struct Registry {
    providers: Vec<Arc<dyn Provider>>,
    capabilities: CapabilitySet,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            providers: Vec::new(),
            capabilities: CapabilitySet::default(),
        }
    }

    /// All providers implementing `C`, possibly none
    pub fn implementing<C>(&self) -> &[Arc<C>]
    where
        C: ?Sized + Send + Sync + 'static,
    {
        self.capabilities.get::<C>()
    }

    /// Preferred provider for an essential capability
    pub fn first<C>(&self) -> Result<&Arc<C>, AggregateError>
    where
        C: ?Sized + Send + Sync + 'static,
    {
        self.implementing::<C>()
            .first()
            .ok_or_else(|| AggregateError::MissingProvider(capability_name::<C>()))
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    pub async fn init_all(&self) -> Result<(), ProviderError> {
        for provider in &self.providers {
            provider.init().await.map_err(|e| {
                warn!(provider = provider.name(), error = %e, "Provider init failed");
                e
            })?;
        }
        Ok(())
    }

    pub async fn shutdown_all(&self) {
        for provider in self.providers.iter().rev() {
            provider.shutdown().await;
        }
    }
}

/// Short trait name, e.g. `ArtistById` for `dyn mdagg_service::capabilities::ArtistById`
pub fn capability_name<C: ?Sized>() -> &'static str {
    std::any::type_name::<C>()
        .rsplit("::")
        .next()
        .unwrap_or("unknown")
}
