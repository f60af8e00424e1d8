//! Optimizers shared by every worker training the same network.
//!
//! The shared state is a table with one slot per parameter tensor. A slot holds the parameter
//! variable and the update rule's moving averages behind its own mutex, so applying a proposal
//! is atomic per tensor while different tensors (and different workers) proceed independently.
//! A per-table gate lets snapshot and restore take a consistent view: applies hold it shared,
//! export and import hold it exclusively.

pub mod grads;
pub mod queue;
pub mod rules;

use crate::networks::{NetworkRole, Parameterized};
use candle_core::{Tensor, Var};
use grads::NamedGrads;
use parking_lot::{Mutex, RwLock};
use rules::{UpdateRule, UpdateRuleKind};
use spiral_core::{Result, SpiralError};
use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicU64, Ordering},
};
use tracing::{debug, warn};

struct ParamSlot {
    var: Var,
    state: Vec<Tensor>,
}

struct ParamTable {
    role: NetworkRole,
    gate: RwLock<()>,
    slots: BTreeMap<String, Mutex<ParamSlot>>,
}

/// Copies of a table's parameters and update-rule state taken under its exclusive gate.
#[derive(Debug, Default)]
pub struct TableExport {
    pub parameters: HashMap<String, Tensor>,
    /// Keyed `<parameter>/<state name>`; empty for stateless rules.
    pub state: HashMap<String, Tensor>,
}

fn state_key(param: &str, state: &str) -> String {
    format!("{param}/{state}")
}

fn mismatch(role: NetworkRole, detail: String) -> SpiralError {
    SpiralError::SnapshotMismatch {
        network: role.to_string(),
        detail,
    }
}

fn check_same_layout(role: NetworkRole, name: &str, expected: &Tensor, found: &Tensor) -> Result<()> {
    if expected.dims() != found.dims() || expected.dtype() != found.dtype() {
        return Err(mismatch(
            role,
            format!(
                "{name}: expected {:?} {:?}, found {:?} {:?}",
                expected.dtype(),
                expected.dims(),
                found.dtype(),
                found.dims()
            ),
        ));
    }
    Ok(())
}

pub struct AsyncOptimizer {
    rule: UpdateRuleKind,
    table: Option<ParamTable>,
    applied: AtomicU64,
}

impl AsyncOptimizer {
    pub fn new(rule: UpdateRuleKind) -> Self {
        Self {
            rule,
            table: None,
            applied: AtomicU64::new(0),
        }
    }

    pub fn rule(&self) -> &UpdateRuleKind {
        &self.rule
    }

    /// Binds the optimizer to the parameter set of `network`, with fresh update-rule state.
    /// Calling it again rebinds.
    pub fn setup(&mut self, network: &impl Parameterized) -> Result<()> {
        let mut slots = BTreeMap::new();
        for (name, var) in network.named_vars()? {
            let state = self.rule.init_state(var.as_tensor())?;
            slots.insert(name, Mutex::new(ParamSlot { var, state }));
        }
        debug!(network = %network.role(), parameters = slots.len(), "optimizer bound");
        self.table = Some(ParamTable {
            role: network.role(),
            gate: RwLock::new(()),
            slots,
        });
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.table.is_some()
    }

    /// Whether the optimizer updates exactly the variables of `network`.
    pub fn is_bound_to(&self, network: &impl Parameterized) -> Result<bool> {
        let Some(table) = &self.table else {
            return Ok(false);
        };
        let vars = network.named_vars()?;
        Ok(table.role == network.role()
            && vars.len() == table.slots.len()
            && vars.iter().all(|(name, var)| {
                table
                    .slots
                    .get(name)
                    .is_some_and(|slot| slot.lock().var.id() == var.id())
            }))
    }

    /// Number of proposals applied since construction.
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    fn table(&self) -> Result<&ParamTable> {
        self.table
            .as_ref()
            .ok_or_else(|| SpiralError::OptimizerNotBound(self.rule_name().into()))
    }

    /// Stable name of the update rule, recorded next to saved optimizer state.
    pub fn rule_name(&self) -> &'static str {
        match self.rule {
            UpdateRuleKind::RmsPropAsync(_) => "rmsprop_async",
            UpdateRuleKind::Sgd(_) => "sgd",
        }
    }

    /// Applies one gradient proposal. Every name, shape and dtype is checked and every update
    /// computed before anything is written. The touched slots stay locked from the check to the
    /// write, taken in name order.
    pub fn apply(&self, grads: &NamedGrads) -> Result<()> {
        let table = self.table()?;
        let _gate = table.gate.read();
        let mut staged = Vec::with_capacity(grads.len());
        for (name, grad) in grads.iter() {
            let slot = table.slots.get(name).ok_or_else(|| SpiralError::GradientMismatch {
                network: table.role.to_string(),
                detail: format!("unknown parameter {name}"),
            })?;
            let slot = slot.lock();
            if slot.var.dims() != grad.dims() || slot.var.dtype() != grad.dtype() {
                return Err(SpiralError::GradientMismatch {
                    network: table.role.to_string(),
                    detail: format!(
                        "{name}: parameter {:?} {:?}, gradient {:?} {:?}",
                        slot.var.dtype(),
                        slot.var.dims(),
                        grad.dtype(),
                        grad.dims()
                    ),
                });
            }
            staged.push((slot, grad));
        }
        let mut updates = Vec::with_capacity(staged.len());
        for (slot, grad) in &staged {
            let mut state = slot.state.clone();
            let updated = self
                .rule
                .update(&slot.var.as_tensor().detach(), &grad.detach(), &mut state)?;
            updates.push((updated, state));
        }
        for ((mut slot, _), (updated, state)) in staged.into_iter().zip(updates) {
            slot.var.set(&updated)?;
            slot.state = state;
        }
        self.applied.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Overwrites the parameters of a worker's local copy with the shared values.
    pub fn pull_into(&self, local: &impl Parameterized) -> Result<()> {
        let table = self.table()?;
        let _gate = table.gate.read();
        let vars = local.named_vars()?;
        if vars.len() != table.slots.len() {
            return Err(SpiralError::OptimizerBindingMismatch(table.role.to_string()));
        }
        for (name, local_var) in vars {
            let slot = table
                .slots
                .get(&name)
                .ok_or_else(|| SpiralError::OptimizerBindingMismatch(table.role.to_string()))?;
            let slot = slot.lock();
            local_var.set(&slot.var.as_tensor().copy()?)?;
        }
        Ok(())
    }

    pub fn export(&self) -> Result<TableExport> {
        let table = self.table()?;
        let _gate = table.gate.write();
        let names = self.rule.state_names();
        let mut export = TableExport::default();
        for (name, slot) in &table.slots {
            let slot = slot.lock();
            export
                .parameters
                .insert(name.clone(), slot.var.as_tensor().copy()?);
            for (state_name, tensor) in names.iter().zip(&slot.state) {
                export
                    .state
                    .insert(state_key(name, state_name), tensor.copy()?);
            }
        }
        Ok(export)
    }

    /// Checks that `parameters` (and `state`, when given) match the bound parameter set name
    /// for name, shape for shape and dtype for dtype.
    pub fn validate_import(
        &self,
        parameters: &HashMap<String, Tensor>,
        state: Option<&HashMap<String, Tensor>>,
    ) -> Result<()> {
        let table = self.table()?;
        let _gate = table.gate.read();
        self.check_import(table, parameters, state)
    }

    fn check_import(
        &self,
        table: &ParamTable,
        parameters: &HashMap<String, Tensor>,
        state: Option<&HashMap<String, Tensor>>,
    ) -> Result<()> {
        let role = table.role;
        let names = self.rule.state_names();
        for name in parameters.keys() {
            if !table.slots.contains_key(name) {
                return Err(mismatch(role, format!("unexpected parameter {name}")));
            }
        }
        for (name, slot) in &table.slots {
            let slot = slot.lock();
            let found = parameters
                .get(name)
                .ok_or_else(|| mismatch(role, format!("missing parameter {name}")))?;
            check_same_layout(role, name, slot.var.as_tensor(), found)?;
            if let Some(state) = state {
                for (state_name, expected) in names.iter().zip(&slot.state) {
                    let key = state_key(name, state_name);
                    let found = state
                        .get(&key)
                        .ok_or_else(|| mismatch(role, format!("missing optimizer state {key}")))?;
                    check_same_layout(role, &key, expected, found)?;
                }
            }
        }
        if let Some(state) = state {
            let expected = table.slots.len() * names.len();
            if state.len() != expected {
                return Err(mismatch(
                    role,
                    format!(
                        "expected {expected} optimizer state tensors, found {}",
                        state.len()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Restores parameters and, when given, update-rule state. Nothing is written unless
    /// `validate_import` would pass. Without state the moving averages restart from zero.
    pub fn import(
        &self,
        parameters: &HashMap<String, Tensor>,
        state: Option<&HashMap<String, Tensor>>,
    ) -> Result<()> {
        let table = self.table()?;
        let _gate = table.gate.write();
        self.check_import(table, parameters, state)?;
        let names = self.rule.state_names();
        if state.is_none() && !names.is_empty() {
            warn!(network = %table.role, "no optimizer state to restore, moving averages restart");
        }
        for (name, slot) in &table.slots {
            let mut slot = slot.lock();
            let ParamSlot {
                var,
                state: slot_state,
            } = &mut *slot;
            if let Some(found) = parameters.get(name) {
                var.set(&found.copy()?)?;
            }
            *slot_state = match state {
                Some(state) => names
                    .iter()
                    .filter_map(|state_name| state.get(&state_key(name, state_name)))
                    .map(|tensor| tensor.copy())
                    .collect::<candle_core::Result<Vec<_>>>()?,
                None => self.rule.init_state(var.as_tensor())?,
            };
        }
        Ok(())
    }
}
