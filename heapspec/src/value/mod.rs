//! Symbolic values
//!
//! Values that appear inside a contract: fresh variables whose concrete value
//! the engine chooses, literals, composite arrays, and pointers to the
//! contract's own allocations.

use std::fmt;

use crate::contract::ContractId;
use crate::error::ContractError;
use crate::heap::Allocation;
use crate::types::TypeDescriptor;

/// A named, typed placeholder declared in a contract's setup
///
/// Two fresh variables are equal only when they come from the same
/// declaration: same contract, same slot, same name and type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FreshVar {
    pub(crate) owner: ContractId,
    pub(crate) slot: usize,
    pub(crate) name: String,
    pub(crate) ty: TypeDescriptor,
}

impl FreshVar {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Name used for this variable in protocol messages
    pub fn server_name(&self) -> String {
        format!("fresh{}", self.slot)
    }
}

/// Symbolic value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolicValue {
    /// Fresh variable
    Fresh(FreshVar),
    /// Integer literal
    Int { width: u32, value: i128 },
    /// Array built from element values
    Array {
        ty: TypeDescriptor,
        elements: Vec<SymbolicValue>,
    },
    /// Pointer to the start of an allocation
    Pointer(Allocation),
    /// Null pointer
    Null,
}

impl SymbolicValue {
    /// Integer literal of the given width
    pub fn int(width: u32, value: i128) -> Self {
        SymbolicValue::Int { width, value }
    }

    /// Build an array value, checking arity and element types
    pub fn array(ty: TypeDescriptor, elements: Vec<SymbolicValue>) -> Result<Self, ContractError> {
        let (length, element_ty) = ty
            .as_array()
            .ok_or_else(|| ContractError::invalid_type(&ty, "array value needs an array type"))?;

        if elements.len() as u64 != length {
            return Err(ContractError::ArityMismatch {
                ty: ty.clone(),
                expected: length,
                found: elements.len(),
            });
        }
        for element in &elements {
            element_ty.expect(&element.ty())?;
        }

        Ok(SymbolicValue::Array { ty, elements })
    }

    pub fn pointer(allocation: &Allocation) -> Self {
        SymbolicValue::Pointer(allocation.clone())
    }

    pub fn null() -> Self {
        SymbolicValue::Null
    }

    pub fn ty(&self) -> TypeDescriptor {
        match self {
            SymbolicValue::Fresh(var) => var.ty.clone(),
            SymbolicValue::Int { width, .. } => TypeDescriptor::integer(*width),
            SymbolicValue::Array { ty, .. } => ty.clone(),
            SymbolicValue::Pointer(_) | SymbolicValue::Null => TypeDescriptor::Pointer,
        }
    }

    /// Every fresh variable mentioned by this value, depth first
    pub fn fresh_vars(&self) -> Vec<&FreshVar> {
        let mut out = Vec::new();
        self.walk(&mut |value| {
            if let SymbolicValue::Fresh(var) = value {
                out.push(var);
            }
        });
        out
    }

    /// Every allocation this value points to, depth first
    pub fn pointees(&self) -> Vec<&Allocation> {
        let mut out = Vec::new();
        self.walk(&mut |value| {
            if let SymbolicValue::Pointer(allocation) = value {
                out.push(allocation);
            }
        });
        out
    }

    fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a SymbolicValue)) {
        visit(self);
        if let SymbolicValue::Array { elements, .. } = self {
            for element in elements {
                element.walk(visit);
            }
        }
    }

    /// Check that integer literals fit their width (signed or unsigned reading)
    pub(crate) fn check_literals(&self) -> Result<(), ContractError> {
        match self {
            SymbolicValue::Int { width, value } => {
                if *width == 0 {
                    return Err(ContractError::invalid_type(
                        &TypeDescriptor::integer(0),
                        "integer width must be nonzero",
                    ));
                }
                if !literal_fits(*width, *value) {
                    return Err(ContractError::invalid_type(
                        &TypeDescriptor::integer(*width),
                        format!("literal {value} does not fit"),
                    ));
                }
                Ok(())
            }
            SymbolicValue::Array { elements, .. } => {
                elements.iter().try_for_each(SymbolicValue::check_literals)
            }
            _ => Ok(()),
        }
    }
}

fn literal_fits(width: u32, value: i128) -> bool {
    match width {
        0 => false,
        128.. => true,
        _ => {
            // [-2^(w-1), 2^w - 1]
            let min = i128::MIN >> (128 - width);
            let max = i128::MAX >> (127 - width);
            (min..=max).contains(&value)
        }
    }
}

impl From<FreshVar> for SymbolicValue {
    fn from(var: FreshVar) -> Self {
        SymbolicValue::Fresh(var)
    }
}

impl fmt::Display for SymbolicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolicValue::Fresh(var) => write!(f, "{}", var.name),
            SymbolicValue::Int { width, value } => write!(f, "{value}:i{width}"),
            SymbolicValue::Array { elements, .. } => {
                write!(f, "[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, "]")
            }
            SymbolicValue::Pointer(allocation) => write!(f, "&{}", allocation.server_name()),
            SymbolicValue::Null => write!(f, "null"),
        }
    }
}
