//! Instrument session: a driver bound to a live transport.
//!
//! Opening a session is all-or-nothing. The transport is configured, the model is
//! checked, options are detected, quantities are instantiated and the `init`
//! command is written; if any step fails the transport is closed and the error is
//! returned. Close is explicit and idempotent, and writes the driver's `final`
//! command on a best-effort basis.
//!
//! Every transport call is bounded by the driver timeout. Transport failures come
//! back as [`DaqError::Transport`] annotated with the instrument name and operation.

use crate::catalogue::Catalogue;
use crate::config::{DriverConfig, QuantityDef};
use crate::quantity::{self, Quantity};
use daq_core::limits::MAX_LINK_HOPS;
use daq_core::{DaqError, DaqResult, DataType, Permission, QuantityId, Transport, Value};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

const VISIBILITY_CHANNEL_CAPACITY: usize = 64;

/// Published when a quantity's visibility flips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityChange {
    pub instrument: String,
    pub quantity: String,
    pub visible: bool,
}

/// Which operation a link redirects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    Set,
    Get,
}

pub struct Session {
    name: String,
    driver: Arc<DriverConfig>,
    link: Box<dyn Transport>,
    quantities: Vec<Quantity>,
    index: HashMap<String, usize>,
    model_id: Option<String>,
    options: Vec<String>,
    catalogue: Option<Arc<dyn Catalogue>>,
    visibility_tx: broadcast::Sender<VisibilityChange>,
    /// A query failed mid-reply; input may still hold its late answer.
    input_stale: bool,
    closed: bool,
}

impl Session {
    /// Open a session named `name` for `driver` over `transport`.
    pub async fn open(
        name: impl Into<String>,
        driver: Arc<DriverConfig>,
        transport: Box<dyn Transport>,
    ) -> DaqResult<Self> {
        Self::open_inner(name.into(), driver, transport, None).await
    }

    /// Like [`Session::open`], with latest values seeded from and written through to
    /// `catalogue`.
    pub async fn open_with_catalogue(
        name: impl Into<String>,
        driver: Arc<DriverConfig>,
        transport: Box<dyn Transport>,
        catalogue: Arc<dyn Catalogue>,
    ) -> DaqResult<Self> {
        Self::open_inner(name.into(), driver, transport, Some(catalogue)).await
    }

    async fn open_inner(
        name: String,
        driver: Arc<DriverConfig>,
        transport: Box<dyn Transport>,
        catalogue: Option<Arc<dyn Catalogue>>,
    ) -> DaqResult<Self> {
        let (visibility_tx, _) = broadcast::channel(VISIBILITY_CHANNEL_CAPACITY);
        let mut session = Self {
            name,
            driver,
            link: transport,
            quantities: Vec::new(),
            index: HashMap::new(),
            model_id: None,
            options: Vec::new(),
            catalogue,
            visibility_tx,
            input_stale: false,
            closed: false,
        };

        match session.initialize().await {
            Ok(()) => {
                info!(
                    instrument = %session.name,
                    driver = %session.driver.name,
                    transport = %session.link.describe(),
                    model = ?session.model_id,
                    quantities = session.quantities.len(),
                    "Session opened"
                );
                Ok(session)
            }
            Err(e) => {
                warn!(instrument = %session.name, error = %e, "Session open failed; closing transport");
                session.closed = true;
                if let Err(close_err) = session.link.close().await {
                    debug!(instrument = %session.name, error = %close_err, "Transport close after failed open");
                }
                Err(e)
            }
        }
    }

    async fn initialize(&mut self) -> DaqResult<()> {
        let driver = Arc::clone(&self.driver);

        let configured = self.link.configure(&driver.transport).await;
        configured.map_err(|e| DaqError::transport(&self.name, "configure", e))?;
        if let Some(serial) = &driver.transport.serial {
            let configured = self.link.configure_serial(serial).await;
            configured.map_err(|e| DaqError::transport(&self.name, "configure serial", e))?;
        }

        if driver.model.check_model && !driver.model.models.is_empty() {
            let reply = self.query(&driver.model.model_cmd, "model check").await?;
            let matched = driver
                .model
                .models
                .iter()
                .find(|m| reply.contains(&m.matcher));
            match matched {
                Some(model) => self.model_id = Some(model.id.clone()),
                None => {
                    let accepted: Vec<&str> =
                        driver.model.models.iter().map(|m| m.matcher.as_str()).collect();
                    return Err(DaqError::identity(
                        &self.name,
                        format!(
                            "reply '{}' to '{}' contains none of [{}]",
                            reply.trim(),
                            driver.model.model_cmd,
                            accepted.join(", ")
                        ),
                    ));
                }
            }
        }

        if driver.model.check_options && !driver.model.option_cmd.is_empty() {
            let reply = self.query(&driver.model.option_cmd, "option check").await?;
            self.options = driver
                .model
                .options
                .iter()
                .filter(|o| reply.contains(&o.matcher))
                .map(|o| o.id.clone())
                .collect();
            debug!(instrument = %self.name, options = ?self.options, "Detected options");
        }

        for def in driver.quantities() {
            if !self.is_installed(def) {
                debug!(instrument = %self.name, quantity = %def.label, "Skipping quantity not supported by model/options");
                continue;
            }
            let mut q = Quantity::new(Arc::new(def.clone()));
            if let Some(state) = def.state_quant.as_deref().and_then(|s| driver.quantity(s)) {
                let normalized = def
                    .state_values
                    .iter()
                    .map(|raw| {
                        quantity::coerce(state, &driver.bools, &Value::Text(raw.clone()))
                            .unwrap_or_else(|_| Value::Text(raw.clone()))
                    })
                    .collect();
                q.set_state_match(normalized);
            }
            if let Some(catalogue) = &self.catalogue {
                if let Some(latest) = catalogue.get_latest(&self.name, &def.label) {
                    match quantity::coerce(def, &driver.bools, &latest) {
                        Ok(user) => q.store(user),
                        Err(e) => warn!(instrument = %self.name, quantity = %def.label, error = %e, "Ignoring stale catalogue value"),
                    }
                }
            }
            self.index.insert(def.label.clone(), self.quantities.len());
            self.quantities.push(q);
        }
        self.refresh_all_visibility();

        if !driver.init.is_empty() {
            self.write_command(&driver.init, "init").await?;
        }
        Ok(())
    }

    /// Model and option filters for one definition.
    fn is_installed(&self, def: &QuantityDef) -> bool {
        let model_ok = match (&self.model_id, def.model_values.is_empty()) {
            (_, true) | (None, _) => true,
            (Some(model), false) => def.model_values.iter().any(|m| m == model),
        };
        let checked_options =
            self.driver.model.check_options && !self.driver.model.option_cmd.is_empty();
        let option_ok = !checked_options
            || def.option_values.is_empty()
            || def.option_values.iter().any(|o| self.options.contains(o));
        model_ok && option_ok
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> &DriverConfig {
        &self.driver
    }

    /// Model id matched during the model check.
    pub fn model_id(&self) -> Option<&str> {
        self.model_id.as_deref()
    }

    /// Installed option ids.
    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn quantities(&self) -> &[Quantity] {
        &self.quantities
    }

    pub fn quantity(&self, label: &str) -> Option<&Quantity> {
        self.index.get(label).map(|&i| &self.quantities[i])
    }

    pub fn data_type(&self, label: &str) -> Option<DataType> {
        self.quantity(label).map(Quantity::data_type)
    }

    pub fn id(&self, label: &str) -> QuantityId {
        QuantityId::new(&self.name, label)
    }

    fn index_of(&self, label: &str) -> DaqResult<usize> {
        self.index.get(label).copied().ok_or_else(|| {
            DaqError::value(
                label,
                format!("not a quantity of instrument '{}'", self.name),
            )
        })
    }

    // =========================================================================
    // Quantity operations
    // =========================================================================

    /// Set `label` and return the stored user-form value. Same-instrument links are
    /// followed; a link to another instrument must go through the registry.
    pub async fn set(&mut self, label: &str, value: impl Into<Value>) -> DaqResult<Value> {
        let target = self.resolve_local(label, LinkDirection::Set)?;
        let stored = self.set_unlinked(&target, value.into()).await?;
        if target != label {
            self.record_value(label, stored.clone());
        }
        Ok(stored)
    }

    /// Read `label` from the instrument (or its link target).
    pub async fn get(&mut self, label: &str) -> DaqResult<Value> {
        let target = self.resolve_local(label, LinkDirection::Get)?;
        let value = self.get_unlinked(&target).await?;
        if target != label {
            self.record_value(label, value.clone());
        }
        Ok(value)
    }

    /// Cached user-form value; `Ok(None)` when never set or read.
    pub fn get_latest(&self, label: &str) -> DaqResult<Option<Value>> {
        let idx = self.index_of(label)?;
        Ok(self.quantities[idx].latest().cloned())
    }

    /// Set the driver default, if one is defined.
    pub async fn set_default(&mut self, label: &str) -> DaqResult<Option<Value>> {
        let idx = self.index_of(label)?;
        match self.quantities[idx].def().default.clone() {
            Some(default) => self.set(label, Value::Text(default)).await.map(Some),
            None => Ok(None),
        }
    }

    /// Redirect `set` and/or `get` of `label` to `target`. Passing `false` for both
    /// removes any link.
    pub fn link(
        &mut self,
        label: &str,
        target: QuantityId,
        link_set: bool,
        link_get: bool,
    ) -> DaqResult<()> {
        let idx = self.index_of(label)?;
        if target == self.id(label) {
            return Err(DaqError::value(label, "cannot link a quantity to itself"));
        }
        if target.instrument == self.name {
            self.index_of(&target.quantity)?;
        }

        let previous = (
            self.quantities[idx].linked_set().cloned(),
            self.quantities[idx].linked_get().cloned(),
        );
        self.quantities[idx].set_links(
            link_set.then(|| target.clone()),
            link_get.then(|| target.clone()),
        );

        let chain_ok = self
            .resolve_local_any(label, LinkDirection::Set)
            .and_then(|_| self.resolve_local_any(label, LinkDirection::Get));
        if let Err(e) = chain_ok {
            self.restore_links(label, previous.0, previous.1)?;
            return Err(e);
        }
        debug!(instrument = %self.name, quantity = %label, %target, link_set, link_get, "Linked quantity");
        Ok(())
    }

    pub(crate) fn restore_links(
        &mut self,
        label: &str,
        set: Option<QuantityId>,
        get: Option<QuantityId>,
    ) -> DaqResult<()> {
        let idx = self.index_of(label)?;
        self.quantities[idx].set_links(set, get);
        Ok(())
    }

    pub fn unlink(&mut self, label: &str) -> DaqResult<()> {
        let idx = self.index_of(label)?;
        self.quantities[idx].set_links(None, None);
        Ok(())
    }

    /// Immediate link target of `label` for `direction`.
    pub fn link_target(&self, label: &str, direction: LinkDirection) -> DaqResult<Option<QuantityId>> {
        let q = &self.quantities[self.index_of(label)?];
        Ok(match direction {
            LinkDirection::Set => q.linked_set().cloned(),
            LinkDirection::Get => q.linked_get().cloned(),
        })
    }

    /// Labels of the currently visible quantities in driver order.
    pub fn visible_quantities(&self) -> Vec<&str> {
        self.quantities
            .iter()
            .filter(|q| q.is_visible())
            .map(Quantity::label)
            .collect()
    }

    pub fn is_visible(&self, label: &str) -> DaqResult<bool> {
        let idx = self.index_of(label)?;
        Ok(self.quantities[idx].is_visible())
    }

    pub fn subscribe_visibility(&self) -> broadcast::Receiver<VisibilityChange> {
        self.visibility_tx.subscribe()
    }

    /// Write `final` (best-effort) and release the transport. Safe to call again.
    pub async fn close(&mut self) -> DaqResult<()> {
        if self.closed {
            return Ok(());
        }
        if !self.driver.final_cmd.is_empty() {
            let command = self.driver.final_cmd.clone();
            if let Err(e) = self.write_command(&command, "final").await {
                warn!(instrument = %self.name, error = %e, "Final command failed");
            }
        }
        self.closed = true;
        info!(instrument = %self.name, "Session closed");
        let closed = self.link.close().await;
        closed.map_err(|e| DaqError::transport(&self.name, "close", e))
    }

    // =========================================================================
    // Link-free operations (the registry resolves cross-instrument links)
    // =========================================================================

    pub(crate) async fn set_unlinked(&mut self, label: &str, value: Value) -> DaqResult<Value> {
        let idx = self.index_of(label)?;
        let def = self.quantities[idx].def_arc();

        if def.permission == Permission::Read {
            return Err(DaqError::value(label, "quantity is read-only"));
        }
        let touches_wire = def.permission != Permission::None && !def.set_cmd.is_empty();

        if def.data_type == DataType::Button {
            if touches_wire {
                let operation = format!("set {}", label);
                self.write_command(&def.set_cmd, &operation).await?;
                self.check_instrument_errors(&operation).await?;
            }
            return Ok(Value::Boolean(true));
        }

        let user = quantity::coerce(&def, &self.driver.bools, &value)?;
        if touches_wire {
            let wire = quantity::to_wire(&def, &self.driver.bools, &user);
            let command = quantity::render_set_command(&def.set_cmd, &wire);
            let operation = format!("set {}", label);
            self.write_command(&command, &operation).await?;
            self.check_instrument_errors(&operation).await?;
        }
        self.record_value(label, user.clone());
        Ok(user)
    }

    pub(crate) async fn get_unlinked(&mut self, label: &str) -> DaqResult<Value> {
        let idx = self.index_of(label)?;
        let def = self.quantities[idx].def_arc();

        if def.data_type == DataType::Button {
            return Err(DaqError::value(label, "a BUTTON has no readable value"));
        }
        if !def.permission.can_read() || def.get_cmd.is_empty() {
            return self.quantities[idx]
                .latest()
                .cloned()
                .or_else(|| quantity::default_value(&def, &self.driver.bools))
                .ok_or_else(|| DaqError::value(label, "no value known and no get_cmd to read it"));
        }

        let reply = self.query(&def.get_cmd, &format!("get {}", label)).await?;
        let value = quantity::from_wire(&def, &self.driver.bools, &reply)?;
        self.record_value(label, value.clone());
        Ok(value)
    }

    /// Store a user-form value as latest, write it through to the catalogue and
    /// update dependent visibility.
    pub(crate) fn record_value(&mut self, label: &str, value: Value) {
        let Some(&idx) = self.index.get(label) else {
            return;
        };
        if let Some(catalogue) = &self.catalogue {
            catalogue.set_latest(&self.name, label, &value);
        }
        self.quantities[idx].store(value);
        self.refresh_dependents(label);
    }

    // =========================================================================
    // Links
    // =========================================================================

    /// Follow same-instrument links from `label`; fail on cross-instrument targets.
    fn resolve_local(&self, label: &str, direction: LinkDirection) -> DaqResult<String> {
        let resolved = self.resolve_local_any(label, direction)?;
        match resolved {
            Resolved::Local(label) => Ok(label),
            Resolved::Remote(target) => Err(DaqError::value(
                label,
                format!(
                    "linked to '{}' on another instrument; use the instrument registry",
                    target
                ),
            )),
        }
    }

    fn resolve_local_any(&self, label: &str, direction: LinkDirection) -> DaqResult<Resolved> {
        let mut current = label.to_string();
        for _ in 0..=MAX_LINK_HOPS {
            match self.link_target(&current, direction)? {
                None => return Ok(Resolved::Local(current)),
                Some(target) if target.instrument == self.name => current = target.quantity,
                Some(target) => return Ok(Resolved::Remote(target)),
            }
        }
        Err(DaqError::value(
            label,
            format!("link chain exceeds {} hops (cycle?)", MAX_LINK_HOPS),
        ))
    }

    // =========================================================================
    // Visibility
    // =========================================================================

    /// Current value used for visibility: latest, or the default when nothing is
    /// known yet.
    fn state_value(&self, label: &str) -> Option<Value> {
        let q = self.quantity(label)?;
        q.latest()
            .cloned()
            .or_else(|| quantity::default_value(q.def(), &self.driver.bools))
    }

    fn refresh_dependents(&mut self, state_label: &str) {
        let state = self.state_value(state_label);
        for i in 0..self.quantities.len() {
            if self.quantities[i].def().state_quant.as_deref() == Some(state_label) {
                self.apply_visibility(i, state.as_ref());
            }
        }
    }

    fn refresh_all_visibility(&mut self) {
        for i in 0..self.quantities.len() {
            let state = self.quantities[i]
                .def()
                .state_quant
                .clone()
                .and_then(|s| self.state_value(&s));
            self.apply_visibility(i, state.as_ref());
        }
    }

    fn apply_visibility(&mut self, idx: usize, state: Option<&Value>) {
        if self.quantities[idx].update_visibility(state) {
            let change = VisibilityChange {
                instrument: self.name.clone(),
                quantity: self.quantities[idx].label().to_string(),
                visible: self.quantities[idx].is_visible(),
            };
            trace!(instrument = %self.name, quantity = %change.quantity, visible = change.visible, "Visibility changed");
            // No subscribers is fine.
            let _ = self.visibility_tx.send(change);
        }
    }

    // =========================================================================
    // Wire I/O
    // =========================================================================

    fn ensure_open(&self, operation: &str) -> DaqResult<()> {
        if self.closed {
            return Err(DaqError::transport(
                &self.name,
                operation,
                io::Error::new(io::ErrorKind::NotConnected, "session is closed"),
            ));
        }
        Ok(())
    }

    fn timed_out(&self, operation: &str, timeout: Duration) -> DaqError {
        DaqError::transport(
            &self.name,
            operation,
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no completion within {:?}", timeout),
            ),
        )
    }

    async fn write_command(&mut self, command: &str, operation: &str) -> DaqResult<()> {
        self.ensure_open(operation)?;
        debug!(instrument = %self.name, operation, command, "write");
        let timeout = self.driver.transport.timeout;
        let result = tokio::time::timeout(timeout, self.link.write(command)).await;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DaqError::transport(&self.name, operation, e)),
            Err(_) => Err(self.timed_out(operation, timeout)),
        }
    }

    async fn query(&mut self, command: &str, operation: &str) -> DaqResult<String> {
        if self.input_stale {
            self.discard_input(operation).await;
            self.input_stale = false;
        }
        self.write_command(command, operation).await?;
        let timeout = self.driver.transport.timeout;
        let result = tokio::time::timeout(timeout, self.link.read()).await;
        let err = match result {
            Ok(Ok(reply)) => {
                debug!(instrument = %self.name, operation, reply = %reply, "read");
                return Ok(reply);
            }
            Ok(Err(e)) => DaqError::transport(&self.name, operation, e),
            Err(_) => self.timed_out(operation, timeout),
        };
        // The reply to this query may still arrive; it must not answer the next one.
        self.discard_input(operation).await;
        self.input_stale = !err.is_disconnect();
        Err(err)
    }

    async fn discard_input(&mut self, operation: &str) {
        if let Err(e) = self.link.clear().await {
            debug!(instrument = %self.name, operation, error = %e, "Clearing input failed");
        }
    }

    /// Query `error_cmd` after a write when the driver asks for it.
    async fn check_instrument_errors(&mut self, operation: &str) -> DaqResult<()> {
        if !self.driver.transport.query_errors || self.driver.error_cmd.is_empty() {
            return Ok(());
        }
        let error_cmd = self.driver.error_cmd.clone();
        let reply = self.query(&error_cmd, operation).await?;
        let code = reply
            .split([',', ' ', ';'])
            .next()
            .and_then(|field| field.trim().parse::<i64>().ok());
        match code {
            Some(code) if (code as u64) & self.driver.error_bit_mask != 0 => {
                Err(DaqError::transport(
                    &self.name,
                    operation,
                    io::Error::other(format!("instrument reported error: {}", reply.trim())),
                ))
            }
            Some(_) => Ok(()),
            None => {
                debug!(instrument = %self.name, reply = %reply, "Unparsed error query reply");
                Ok(())
            }
        }
    }
}

enum Resolved {
    Local(String),
    Remote(QuantityId),
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                instrument = %self.name,
                "Session dropped without close; final command was not sent"
            );
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("driver", &self.driver.name)
            .field("transport", &self.link.describe())
            .field("quantities", &self.quantities.len())
            .field("closed", &self.closed)
            .finish()
    }
}
