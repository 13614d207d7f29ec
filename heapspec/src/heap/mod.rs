//! Heap model
//!
//! Symbolic memory regions created during contract setup, the locations
//! inside them, and the points-to relations asserted over those locations.
//!
//! The heap only records what the contract author asserts. It does no alias
//! analysis; proving or refuting the relations is the engine's job.

use std::fmt;

use crate::contract::ContractId;
use crate::error::ContractError;
use crate::types::TypeDescriptor;
use crate::value::SymbolicValue;

/// Handle to a symbolic memory region
///
/// Owned by the contract that created it; everything else (points-to
/// statements, execution arguments, pointer values) holds a copy of the handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Allocation {
    pub(crate) owner: ContractId,
    pub(crate) slot: usize,
    pub(crate) ty: TypeDescriptor,
    pub(crate) mutable: bool,
}

impl Allocation {
    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Name used for this region in protocol messages
    pub fn server_name(&self) -> String {
        format!("alloc{}", self.slot)
    }

    /// The whole region
    pub fn whole(&self) -> Locator {
        Locator::Whole(self.clone())
    }

    /// Element `index` of an array-typed region. The index is checked when
    /// the locator is used, not here.
    pub fn at(&self, index: usize) -> Locator {
        Locator::Element(self.clone(), index)
    }
}

/// A location a points-to statement can target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Whole(Allocation),
    Element(Allocation, usize),
}

impl Locator {
    pub fn allocation(&self) -> &Allocation {
        match self {
            Locator::Whole(allocation) | Locator::Element(allocation, _) => allocation,
        }
    }

    pub fn index(&self) -> Option<usize> {
        match self {
            Locator::Whole(_) => None,
            Locator::Element(_, index) => Some(*index),
        }
    }
}

impl From<&Allocation> for Locator {
    fn from(allocation: &Allocation) -> Self {
        allocation.whole()
    }
}

impl From<Allocation> for Locator {
    fn from(allocation: Allocation) -> Self {
        Locator::Whole(allocation)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Whole(allocation) => write!(f, "{}", allocation.server_name()),
            Locator::Element(allocation, index) => {
                write!(f, "{}[{index}]", allocation.server_name())
            }
        }
    }
}

/// Assertion that `target` (of type `ty`) holds `value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointsTo {
    pub target: Locator,
    pub ty: TypeDescriptor,
    pub value: SymbolicValue,
}

#[derive(Debug, Clone)]
struct Region {
    allocation: Allocation,
    initial: Option<SymbolicValue>,
    asserted: Vec<PointsTo>,
}

/// All regions of one contract
#[derive(Debug, Clone)]
pub struct Heap {
    owner: ContractId,
    regions: Vec<Region>,
}

impl Heap {
    pub(crate) fn new(owner: ContractId) -> Self {
        Self {
            owner,
            regions: Vec::new(),
        }
    }

    /// Register a new region, optionally with its initial contents
    pub(crate) fn allocate(
        &mut self,
        ty: TypeDescriptor,
        mutable: bool,
        initial: Option<SymbolicValue>,
    ) -> Result<Allocation, ContractError> {
        ty.check_storable()?;
        if let Some(value) = &initial {
            ty.expect(&value.ty())?;
            self.check_pointees(value)?;
        }

        let allocation = Allocation {
            owner: self.owner,
            slot: self.regions.len(),
            ty,
            mutable,
        };
        self.regions.push(Region {
            allocation: allocation.clone(),
            initial,
            asserted: Vec::new(),
        });
        Ok(allocation)
    }

    /// Record a postcondition points-to assertion
    pub(crate) fn assert_points_to(
        &mut self,
        target: Locator,
        value: SymbolicValue,
    ) -> Result<PointsTo, ContractError> {
        let ty = self.resolve(&target)?;
        ty.expect(&value.ty())?;
        self.check_pointees(&value)?;

        let points_to = PointsTo { target, ty, value };
        self.regions[points_to.target.allocation().slot]
            .asserted
            .push(points_to.clone());
        Ok(points_to)
    }

    /// Whether `allocation` was created by this heap
    pub fn contains(&self, allocation: &Allocation) -> bool {
        allocation.owner == self.owner
            && self
                .regions
                .get(allocation.slot)
                .is_some_and(|region| region.allocation == *allocation)
    }

    /// Type stored at `locator`
    pub fn resolve(&self, locator: &Locator) -> Result<TypeDescriptor, ContractError> {
        let allocation = locator.allocation();
        if !self.contains(allocation) {
            return Err(ContractError::unknown_location(format!(
                "{} was not allocated by this contract",
                allocation.server_name()
            )));
        }

        match locator {
            Locator::Whole(allocation) => Ok(allocation.ty.clone()),
            Locator::Element(allocation, index) => {
                let (length, element) = allocation.ty.as_array().ok_or_else(|| {
                    ContractError::invalid_type(&allocation.ty, "cannot index a non-array allocation")
                })?;
                if (*index as u64) < length {
                    Ok(element.clone())
                } else {
                    Err(ContractError::IndexOutOfRange {
                        index: *index,
                        length,
                        ty: allocation.ty.clone(),
                    })
                }
            }
        }
    }

    /// Every pointer inside `value` must point into this heap
    pub(crate) fn check_pointees(&self, value: &SymbolicValue) -> Result<(), ContractError> {
        match value.pointees().into_iter().find(|a| !self.contains(a)) {
            Some(foreign) => Err(ContractError::unknown_location(format!(
                "pointer to {} which was not allocated by this contract",
                foreign.server_name()
            ))),
            None => Ok(()),
        }
    }

    /// Initial contents given when the region was allocated
    pub fn initial_points_to(&self, allocation: &Allocation) -> Option<&SymbolicValue> {
        if !self.contains(allocation) {
            return None;
        }
        self.regions[allocation.slot].initial.as_ref()
    }

    /// Postcondition assertions recorded against the region
    pub fn asserted_points_to(&self, allocation: &Allocation) -> &[PointsTo] {
        if !self.contains(allocation) {
            return &[];
        }
        &self.regions[allocation.slot].asserted
    }

    pub fn allocations(&self) -> impl Iterator<Item = &Allocation> {
        self.regions.iter().map(|region| &region.allocation)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
