//! Open sessions by instrument name, with link resolution across instruments.
//!
//! The registry is what the experiment engine talks to: it implements
//! [`QuantityIo`] so a run can address any quantity by `(instrument, quantity)`
//! regardless of which session owns it or where its links point.

use crate::catalogue::Catalogue;
use crate::session::{LinkDirection, Session};
use async_trait::async_trait;
use daq_core::limits::MAX_LINK_HOPS;
use daq_core::{
    DaqError, DaqResult, DataType, QuantityId, QuantityIo, QuantityLookup, Transport, Value,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct InstrumentRegistry {
    sessions: BTreeMap<String, Session>,
}

impl InstrumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for `name` using the driver the catalogue has for it.
    pub async fn connect(
        &mut self,
        name: &str,
        catalogue: Arc<dyn Catalogue>,
        transport: Box<dyn Transport>,
    ) -> DaqResult<&mut Session> {
        if self.sessions.contains_key(name) {
            return Err(DaqError::Config(format!(
                "instrument '{}' is already connected",
                name
            )));
        }
        let driver = catalogue.get_driver(name)?;
        let session = Session::open_with_catalogue(name, driver, transport, catalogue).await?;
        self.insert(session)
    }

    /// Take ownership of an already open session.
    pub fn insert(&mut self, session: Session) -> DaqResult<&mut Session> {
        let name = session.name().to_string();
        if self.sessions.contains_key(&name) {
            return Err(DaqError::Config(format!(
                "instrument '{}' is already connected",
                name
            )));
        }
        Ok(self.sessions.entry(name).or_insert(session))
    }

    /// Remove a session without closing it.
    pub fn remove(&mut self, name: &str) -> Option<Session> {
        self.sessions.remove(name)
    }

    pub fn session(&self, name: &str) -> Option<&Session> {
        self.sessions.get(name)
    }

    pub fn session_mut(&mut self, name: &str) -> Option<&mut Session> {
        self.sessions.get_mut(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.sessions.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn session_for(&self, id: &QuantityId) -> DaqResult<&Session> {
        self.sessions.get(&id.instrument).ok_or_else(|| {
            DaqError::value(
                id.to_string(),
                format!("instrument '{}' is not connected", id.instrument),
            )
        })
    }

    fn session_for_mut(&mut self, id: &QuantityId) -> DaqResult<&mut Session> {
        self.sessions.get_mut(&id.instrument).ok_or_else(|| {
            DaqError::value(
                id.to_string(),
                format!("instrument '{}' is not connected", id.instrument),
            )
        })
    }

    /// Link `origin` to `target`, possibly on another instrument.
    pub fn link(
        &mut self,
        origin: &QuantityId,
        target: QuantityId,
        link_set: bool,
        link_get: bool,
    ) -> DaqResult<()> {
        if !self.contains(&target) {
            return Err(DaqError::value(
                origin.to_string(),
                format!("link target {} does not exist", target),
            ));
        }
        let session = self.session_for_mut(origin)?;
        let previous = (
            session.link_target(&origin.quantity, LinkDirection::Set)?,
            session.link_target(&origin.quantity, LinkDirection::Get)?,
        );
        session.link(&origin.quantity, target, link_set, link_get)?;

        let chain_ok = self
            .resolve(origin, LinkDirection::Set)
            .and_then(|_| self.resolve(origin, LinkDirection::Get));
        if let Err(e) = chain_ok {
            self.session_for_mut(origin)?
                .restore_links(&origin.quantity, previous.0, previous.1)?;
            return Err(e);
        }
        Ok(())
    }

    /// Follow links from `id` to the quantity that does the wire I/O.
    pub fn resolve(&self, id: &QuantityId, direction: LinkDirection) -> DaqResult<QuantityId> {
        let mut current = id.clone();
        for _ in 0..=MAX_LINK_HOPS {
            let session = self.session_for(&current)?;
            match session.link_target(&current.quantity, direction)? {
                None => return Ok(current),
                Some(next) => current = next,
            }
        }
        Err(DaqError::value(
            id.to_string(),
            format!("link chain exceeds {} hops (cycle?)", MAX_LINK_HOPS),
        ))
    }

    /// Close every session, in name order. All sessions are closed even when some
    /// fail; the first error is returned.
    pub async fn close_all(&mut self) -> DaqResult<()> {
        let mut first_error = None;
        for (name, session) in self.sessions.iter_mut() {
            if let Err(e) = session.close().await {
                warn!(instrument = %name, error = %e, "Close failed");
                first_error.get_or_insert(e);
            }
        }
        info!(sessions = self.sessions.len(), "Closed all sessions");
        first_error.map_or(Ok(()), Err)
    }
}

impl QuantityLookup for InstrumentRegistry {
    fn data_type(&self, id: &QuantityId) -> Option<DataType> {
        self.sessions.get(&id.instrument)?.data_type(&id.quantity)
    }
}

#[async_trait]
impl QuantityIo for InstrumentRegistry {
    async fn set(&mut self, id: &QuantityId, value: Value) -> DaqResult<Value> {
        let target = self.resolve(id, LinkDirection::Set)?;
        let stored = self
            .session_for_mut(&target)?
            .set_unlinked(&target.quantity, value)
            .await?;
        if &target != id {
            self.session_for_mut(id)?
                .record_value(&id.quantity, stored.clone());
        }
        Ok(stored)
    }

    async fn get(&mut self, id: &QuantityId) -> DaqResult<Value> {
        let target = self.resolve(id, LinkDirection::Get)?;
        let value = self
            .session_for_mut(&target)?
            .get_unlinked(&target.quantity)
            .await?;
        if &target != id {
            self.session_for_mut(id)?
                .record_value(&id.quantity, value.clone());
        }
        Ok(value)
    }

    fn get_latest(&self, id: &QuantityId) -> Option<Value> {
        self.sessions
            .get(&id.instrument)?
            .get_latest(&id.quantity)
            .ok()
            .flatten()
    }
}
