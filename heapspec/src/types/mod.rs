//! Type descriptors
//!
//! The small type language contracts are written against: fixed-width
//! integers, fixed-length arrays, opaque pointers and `void`.

use serde::{Deserialize, Serialize};

use crate::error::ContractError;

/// Type representation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TypeDescriptor {
    /// Integer of `width` bits
    Integer { width: u32 },
    /// Fixed-length array of `length` elements
    Array {
        length: u64,
        element: Box<TypeDescriptor>,
    },
    /// Opaque pointer
    Pointer,
    /// No value (function returns only)
    Void,
}

impl TypeDescriptor {
    pub fn integer(width: u32) -> Self {
        TypeDescriptor::Integer { width }
    }

    pub fn i1() -> Self {
        Self::integer(1)
    }

    pub fn i8() -> Self {
        Self::integer(8)
    }

    pub fn i16() -> Self {
        Self::integer(16)
    }

    pub fn i32() -> Self {
        Self::integer(32)
    }

    pub fn i64() -> Self {
        Self::integer(64)
    }

    pub fn i128() -> Self {
        Self::integer(128)
    }

    pub fn array(length: u64, element: TypeDescriptor) -> Self {
        TypeDescriptor::Array {
            length,
            element: Box::new(element),
        }
    }

    pub fn pointer() -> Self {
        TypeDescriptor::Pointer
    }

    pub fn void() -> Self {
        TypeDescriptor::Void
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeDescriptor::Void)
    }

    /// Element type and length, if this is an array
    pub fn as_array(&self) -> Option<(u64, &TypeDescriptor)> {
        match self {
            TypeDescriptor::Array { length, element } => Some((*length, element)),
            _ => None,
        }
    }

    /// Check that this type can describe a stored value: a fresh variable,
    /// an allocation or an array element.
    ///
    /// `void` is rejected at every level and integer widths must be nonzero.
    pub fn check_storable(&self) -> Result<(), ContractError> {
        match self {
            TypeDescriptor::Integer { width: 0 } => {
                Err(ContractError::invalid_type(self, "integer width must be nonzero"))
            }
            TypeDescriptor::Integer { .. } | TypeDescriptor::Pointer => Ok(()),
            TypeDescriptor::Array { element, .. } => element
                .check_storable()
                .map_err(|_| ContractError::invalid_type(self, "array element type is not storable")),
            TypeDescriptor::Void => Err(ContractError::invalid_type(self, "void has no values")),
        }
    }

    /// Fail with `TypeMismatch` unless `found` is structurally equal to `self`
    pub fn expect(&self, found: &TypeDescriptor) -> Result<(), ContractError> {
        if self == found {
            Ok(())
        } else {
            Err(ContractError::type_mismatch(self, found))
        }
    }
}

impl std::fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeDescriptor::Integer { width } => write!(f, "i{width}"),
            TypeDescriptor::Array { length, element } => write!(f, "[{length} x {element}]"),
            TypeDescriptor::Pointer => write!(f, "ptr"),
            TypeDescriptor::Void => write!(f, "void"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(TypeDescriptor::i32().to_string(), "i32");
        assert_eq!(
            TypeDescriptor::array(2, TypeDescriptor::array(3, TypeDescriptor::i8())).to_string(),
            "[2 x [3 x i8]]"
        );
        assert_eq!(TypeDescriptor::pointer().to_string(), "ptr");
        assert_eq!(TypeDescriptor::void().to_string(), "void");
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(
            TypeDescriptor::array(2, TypeDescriptor::i32()),
            TypeDescriptor::array(2, TypeDescriptor::integer(32))
        );
        assert_ne!(
            TypeDescriptor::array(2, TypeDescriptor::i32()),
            TypeDescriptor::array(3, TypeDescriptor::i32())
        );
    }

    #[test]
    fn test_check_storable() {
        assert!(TypeDescriptor::i64().check_storable().is_ok());
        assert!(TypeDescriptor::array(0, TypeDescriptor::pointer()).check_storable().is_ok());
        assert!(TypeDescriptor::void().check_storable().is_err());
        assert!(TypeDescriptor::integer(0).check_storable().is_err());
        assert!(TypeDescriptor::array(4, TypeDescriptor::void()).check_storable().is_err());
    }

    #[test]
    fn test_wire_form() {
        let ty = TypeDescriptor::array(2, TypeDescriptor::i32());
        let json = serde_json::to_value(&ty).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "array",
                "length": 2,
                "element": { "type": "integer", "width": 32 }
            })
        );
        let back: TypeDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, ty);
    }
}
