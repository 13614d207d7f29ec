//! Contracts
//!
//! A contract is built in three phases, always in this order:
//!
//! 1. setup: fresh variables and allocations (with optional initial contents)
//! 2. execution: the call under test and its arguments, exactly once
//! 3. postconditions: points-to assertions and at most one return assertion
//!
//! [`ContractBuilder`] enforces the order with an explicit [`Phase`]; every
//! misuse is reported by the offending call and nothing is reordered.

mod output;

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use crate::error::ContractError;
use crate::heap::{Allocation, Heap, Locator, PointsTo};
use crate::protocol::ContractMessage;
use crate::types::TypeDescriptor;
use crate::value::{FreshVar, SymbolicValue};

/// Identity of one contract build; values carry it so they cannot leak
/// into another contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContractId(u64);

impl ContractId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        ContractId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Builder phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Executed,
    Postconditioned,
}

/// Setup statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupStatement {
    Fresh(FreshVar),
    Allocate {
        allocation: Allocation,
        points_to: Option<SymbolicValue>,
    },
}

/// Execution argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    Value(SymbolicValue),
    Allocation(Allocation),
}

impl From<SymbolicValue> for Argument {
    fn from(value: SymbolicValue) -> Self {
        Argument::Value(value)
    }
}

impl From<&SymbolicValue> for Argument {
    fn from(value: &SymbolicValue) -> Self {
        Argument::Value(value.clone())
    }
}

impl From<&Allocation> for Argument {
    fn from(allocation: &Allocation) -> Self {
        Argument::Allocation(allocation.clone())
    }
}

/// The call under test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub args: Vec<Argument>,
}

/// Expected return
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Return {
    Value(SymbolicValue),
    Void,
}

impl From<SymbolicValue> for Return {
    fn from(value: SymbolicValue) -> Self {
        Return::Value(value)
    }
}

impl From<&SymbolicValue> for Return {
    fn from(value: &SymbolicValue) -> Self {
        Return::Value(value.clone())
    }
}

/// Postcondition statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Postcondition {
    PointsTo(PointsTo),
    Returns(Return),
}

/// Something that can describe a contract
///
/// `specification` is called exactly once per [`Contract::build`].
pub trait Specification {
    fn specification(&self, contract: &mut ContractBuilder) -> Result<(), ContractError>;
}

impl<F> Specification for F
where
    F: Fn(&mut ContractBuilder) -> Result<(), ContractError>,
{
    fn specification(&self, contract: &mut ContractBuilder) -> Result<(), ContractError> {
        self(contract)
    }
}

/// Contract under construction
#[derive(Debug)]
pub struct ContractBuilder {
    id: ContractId,
    phase: Phase,
    fresh: Vec<FreshVar>,
    heap: Heap,
    setup: Vec<SetupStatement>,
    execution: Option<Execution>,
    postconditions: Vec<Postcondition>,
}

impl ContractBuilder {
    pub fn new() -> Self {
        let id = ContractId::next();
        Self {
            id,
            phase: Phase::Setup,
            fresh: Vec::new(),
            heap: Heap::new(id),
            setup: Vec::new(),
            execution: None,
            postconditions: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Declare a fresh variable. Names are advisory; reusing one is allowed
    /// but logged.
    pub fn fresh_var(
        &mut self,
        ty: TypeDescriptor,
        name: impl Into<String>,
    ) -> Result<SymbolicValue, ContractError> {
        let name = name.into();
        self.require_setup(&format!("fresh variable `{name}`"))?;
        ty.check_storable()?;

        if self.fresh.iter().any(|var| var.name == name) {
            warn!(name = %name, "fresh variable name declared more than once");
        }

        let var = FreshVar {
            owner: self.id,
            slot: self.fresh.len(),
            name,
            ty,
        };
        self.fresh.push(var.clone());
        self.setup.push(SetupStatement::Fresh(var.clone()));
        Ok(SymbolicValue::Fresh(var))
    }

    /// Allocate a mutable region, optionally with initial contents
    pub fn alloc(
        &mut self,
        ty: TypeDescriptor,
        points_to: Option<SymbolicValue>,
    ) -> Result<Allocation, ContractError> {
        self.allocate(ty, true, points_to)
    }

    /// Allocate a region the function must not write to
    pub fn alloc_readonly(
        &mut self,
        ty: TypeDescriptor,
        points_to: Option<SymbolicValue>,
    ) -> Result<Allocation, ContractError> {
        self.allocate(ty, false, points_to)
    }

    fn allocate(
        &mut self,
        ty: TypeDescriptor,
        mutable: bool,
        points_to: Option<SymbolicValue>,
    ) -> Result<Allocation, ContractError> {
        self.require_setup(&format!("allocation of {ty}"))?;
        if let Some(value) = &points_to {
            self.check_value(value)?;
        }

        let allocation = self.heap.allocate(ty, mutable, points_to.clone())?;
        self.setup.push(SetupStatement::Allocate {
            allocation: allocation.clone(),
            points_to,
        });
        Ok(allocation)
    }

    /// Declare the call under test
    pub fn execute_func<I, A>(&mut self, args: I) -> Result<(), ContractError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Argument>,
    {
        if self.execution.is_some() {
            return Err(ContractError::DuplicateExecution);
        }

        let args: Vec<Argument> = args.into_iter().map(Into::into).collect();
        for arg in &args {
            match arg {
                Argument::Value(value) => self.check_value(value)?,
                Argument::Allocation(allocation) => {
                    if !self.heap.contains(allocation) {
                        return Err(ContractError::unknown_location(format!(
                            "argument {} was not allocated by this contract",
                            allocation.server_name()
                        )));
                    }
                }
            }
        }

        self.execution = Some(Execution { args });
        self.phase = Phase::Executed;
        Ok(())
    }

    /// Assert that `target` holds `value` after the call
    pub fn points_to(
        &mut self,
        target: impl Into<Locator>,
        value: impl Into<SymbolicValue>,
    ) -> Result<(), ContractError> {
        let target = target.into();
        let value = value.into();
        self.require_executed(&format!("points-to assertion on {target}"))?;
        self.check_value(&value)?;

        let points_to = self.heap.assert_points_to(target, value)?;
        self.postconditions.push(Postcondition::PointsTo(points_to));
        self.phase = Phase::Postconditioned;
        Ok(())
    }

    /// Assert the return value (or `Return::Void`)
    pub fn returns(&mut self, ret: impl Into<Return>) -> Result<(), ContractError> {
        let ret = ret.into();
        self.require_executed("return assertion")?;
        if self
            .postconditions
            .iter()
            .any(|post| matches!(post, Postcondition::Returns(_)))
        {
            return Err(ContractError::DuplicateReturn);
        }
        if let Return::Value(value) = &ret {
            self.check_value(value)?;
        }

        self.postconditions.push(Postcondition::Returns(ret));
        self.phase = Phase::Postconditioned;
        Ok(())
    }

    /// Validate and freeze the contract
    pub fn finish(self) -> Result<Contract, ContractError> {
        let execution = self
            .execution
            .ok_or_else(|| ContractError::ill_formed("contract has no execution statement"))?;

        Ok(Contract {
            id: self.id,
            setup: self.setup,
            execution,
            postconditions: self.postconditions,
            heap: self.heap,
        })
    }

    fn require_setup(&self, what: &str) -> Result<(), ContractError> {
        match self.phase {
            Phase::Setup => Ok(()),
            Phase::Executed | Phase::Postconditioned => Err(ContractError::ill_formed(format!(
                "{what} declared after the execution statement"
            ))),
        }
    }

    fn require_executed(&self, what: &str) -> Result<(), ContractError> {
        match self.phase {
            Phase::Setup => Err(ContractError::ill_formed(format!(
                "{what} declared before the execution statement"
            ))),
            Phase::Executed | Phase::Postconditioned => Ok(()),
        }
    }

    /// Every fresh variable and pointer in `value` must belong to this contract
    fn check_value(&self, value: &SymbolicValue) -> Result<(), ContractError> {
        value.check_literals()?;
        for var in value.fresh_vars() {
            if var.owner != self.id || self.fresh.get(var.slot) != Some(var) {
                return Err(ContractError::unknown_location(format!(
                    "fresh variable `{}` was not declared by this contract",
                    var.name
                )));
            }
        }
        self.heap.check_pointees(value)
    }
}

impl Default for ContractBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A complete, validated contract
///
/// Immutable once built. `Clone` gives an independent deep copy, so the same
/// description can be submitted again in another session.
#[derive(Debug, Clone)]
pub struct Contract {
    id: ContractId,
    setup: Vec<SetupStatement>,
    execution: Execution,
    postconditions: Vec<Postcondition>,
    heap: Heap,
}

impl Contract {
    /// Run `spec` against a fresh builder
    pub fn build<S: Specification + ?Sized>(spec: &S) -> Result<Contract, ContractError> {
        let mut builder = ContractBuilder::new();
        spec.specification(&mut builder)?;
        builder.finish()
    }

    pub fn id(&self) -> ContractId {
        self.id
    }

    pub fn setup(&self) -> &[SetupStatement] {
        &self.setup
    }

    pub fn execution(&self) -> &Execution {
        &self.execution
    }

    pub fn postconditions(&self) -> &[Postcondition] {
        &self.postconditions
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Initial contents recorded for `allocation`
    pub fn initial_points_to(&self, allocation: &Allocation) -> Option<&SymbolicValue> {
        self.heap.initial_points_to(allocation)
    }

    pub fn return_value(&self) -> Option<&Return> {
        self.postconditions.iter().find_map(|post| match post {
            Postcondition::Returns(ret) => Some(ret),
            Postcondition::PointsTo(_) => None,
        })
    }

    pub fn fresh_vars(&self) -> impl Iterator<Item = &FreshVar> {
        self.setup.iter().filter_map(|stmt| match stmt {
            SetupStatement::Fresh(var) => Some(var),
            SetupStatement::Allocate { .. } => None,
        })
    }

    /// Same statements over the same declarations, whichever contract owns them
    ///
    /// `==` on values and allocations also compares the owning contract, so
    /// two builds of one specification are never `==`; this is the equality
    /// to use for those.
    pub fn structurally_eq(&self, other: &Contract) -> bool {
        ContractMessage::encode("", self) == ContractMessage::encode("", other)
    }
}
