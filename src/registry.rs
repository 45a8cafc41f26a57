use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

use crate::{
    AsyncReading, AsyncWriting,
    config::MuxConfig,
    error::{MuxError, Result},
    mux::Mux,
};

pub type MuxId = u32;

/// every running mux instance, by id
#[derive(Debug, Default)]
pub struct MuxRegistry {
    muxes: RwLock<HashMap<MuxId, Arc<Mux>>>,
}

impl MuxRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// starts a mux over the given transport and keeps it under `id`
    pub async fn register(
        &self,
        id: MuxId,
        reader: impl AsyncReading + 'static,
        writer: impl AsyncWriting + 'static,
        config: MuxConfig,
    ) -> Result<Arc<Mux>> {
        let mut muxes = self.muxes.write().await;

        if muxes.contains_key(&id) {
            return Err(MuxError::AlreadyRegistered(id));
        }

        let mux = Arc::new(Mux::new(id, reader, writer, config));
        muxes.insert(id, mux.clone());

        log::info!(target: "ts0710mux::registry", "registered mux {id}");

        Ok(mux)
    }

    /// shuts the mux down and forgets it
    pub async fn unregister(&self, id: MuxId) -> Result<()> {
        let mux = self
            .muxes
            .write()
            .await
            .remove(&id)
            .ok_or(MuxError::NotRegistered(id))?;

        mux.shutdown().await;

        log::info!(target: "ts0710mux::registry", "unregistered mux {id}");

        Ok(())
    }

    pub async fn get(&self, id: MuxId) -> Result<Arc<Mux>> {
        self.muxes
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(MuxError::NotRegistered(id))
    }

    pub async fn ids(&self) -> Vec<MuxId> {
        let mut ids: Vec<_> = self.muxes.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;

    #[tokio::test]
    async fn register_get_unregister() {
        let registry = MuxRegistry::new();
        let (local, _peer) = duplex(1024);
        let (reader, writer) = tokio::io::split(local);

        registry
            .register(3, reader, writer, MuxConfig::without_handshake())
            .await
            .unwrap();

        assert_eq!(registry.get(3).await.unwrap().id(), 3);
        assert_eq!(registry.ids().await, vec![3]);
        assert!(matches!(registry.get(4).await, Err(MuxError::NotRegistered(4))));

        registry.unregister(3).await.unwrap();

        assert!(matches!(registry.get(3).await, Err(MuxError::NotRegistered(3))));
        assert!(matches!(registry.unregister(3).await, Err(MuxError::NotRegistered(3))));
    }

    #[tokio::test]
    async fn duplicate_id() {
        let registry = MuxRegistry::new();
        let (a, _pa) = duplex(64);
        let (b, _pb) = duplex(64);
        let (ra, wa) = tokio::io::split(a);
        let (rb, wb) = tokio::io::split(b);

        registry.register(1, ra, wa, MuxConfig::without_handshake()).await.unwrap();
        let second = registry.register(1, rb, wb, MuxConfig::without_handshake()).await;

        assert!(matches!(second, Err(MuxError::AlreadyRegistered(1))));
    }
}
