//! Contract wire format
//!
//! A contract travels as a self-contained document: every fresh variable and
//! allocation is introduced by a setup statement (`fresh<n>` / `alloc<n>`)
//! before anything refers to it.
//!
//! ```json
//! {
//!   "setup": [
//!     { "kind": "fresh", "id": "fresh0", "name": "a0", "type": { "type": "integer", "width": 32 } },
//!     { "kind": "allocate", "id": "alloc0", "type": { ... }, "mutable": true, "points_to": { ... } }
//!   ],
//!   "execution": { "function": "array_swap", "args": [ { "allocation": "alloc0" } ] },
//!   "postconditions": [
//!     { "kind": "points_to", "target": { "allocation": "alloc0", "index": 0 }, "type": { ... }, "value": { ... } },
//!     { "kind": "returns", "value": null }
//!   ]
//! }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::contract::{
    Argument, Contract, ContractBuilder, Postcondition, Return, SetupStatement,
};
use crate::error::ContractError;
use crate::heap::{Allocation, Locator};
use crate::types::TypeDescriptor;
use crate::value::SymbolicValue;

/// Opaque handle to a module loaded into server state
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleHandle(String);

impl ModuleHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Verification request: module, function and the full contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub module: ModuleHandle,
    pub function: String,
    #[serde(flatten)]
    pub contract: ContractMessage,
}

impl VerifyRequest {
    pub fn new(module: &ModuleHandle, function: &str, contract: &Contract) -> Self {
        Self {
            module: module.clone(),
            function: function.to_string(),
            contract: ContractMessage::encode(function, contract),
        }
    }
}

/// Contract document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractMessage {
    pub setup: Vec<SetupMessage>,
    pub execution: ExecutionMessage,
    pub postconditions: Vec<PostconditionMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SetupMessage {
    Fresh {
        id: String,
        name: String,
        #[serde(rename = "type")]
        ty: TypeDescriptor,
    },
    Allocate {
        id: String,
        #[serde(rename = "type")]
        ty: TypeDescriptor,
        #[serde(default = "default_mutable")]
        mutable: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        points_to: Option<ValueMessage>,
    },
}

fn default_mutable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMessage {
    pub function: String,
    pub args: Vec<ArgumentMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentMessage {
    Allocation(String),
    Value(ValueMessage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueMessage {
    Fresh {
        id: String,
    },
    /// Literals travel as decimal strings so 128-bit values survive JSON
    Int {
        width: u32,
        #[serde(with = "decimal")]
        literal: i128,
    },
    Array {
        #[serde(rename = "type")]
        ty: TypeDescriptor,
        elements: Vec<ValueMessage>,
    },
    Pointer {
        allocation: String,
    },
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatorMessage {
    pub allocation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PostconditionMessage {
    PointsTo {
        target: LocatorMessage,
        #[serde(rename = "type")]
        ty: TypeDescriptor,
        value: ValueMessage,
    },
    /// `value: null` asserts a `void` return
    Returns { value: Option<ValueMessage> },
}

impl ContractMessage {
    /// Encode a built contract; the execution entry names `function`
    pub fn encode(function: &str, contract: &Contract) -> Self {
        let setup = contract
            .setup()
            .iter()
            .map(|stmt| match stmt {
                SetupStatement::Fresh(var) => SetupMessage::Fresh {
                    id: var.server_name(),
                    name: var.name().to_string(),
                    ty: var.ty().clone(),
                },
                SetupStatement::Allocate {
                    allocation,
                    points_to,
                } => SetupMessage::Allocate {
                    id: allocation.server_name(),
                    ty: allocation.ty().clone(),
                    mutable: allocation.is_mutable(),
                    points_to: points_to.as_ref().map(encode_value),
                },
            })
            .collect();

        let args = contract
            .execution()
            .args
            .iter()
            .map(|arg| match arg {
                Argument::Value(value) => ArgumentMessage::Value(encode_value(value)),
                Argument::Allocation(allocation) => {
                    ArgumentMessage::Allocation(allocation.server_name())
                }
            })
            .collect();

        let postconditions = contract
            .postconditions()
            .iter()
            .map(|post| match post {
                Postcondition::PointsTo(points_to) => PostconditionMessage::PointsTo {
                    target: LocatorMessage {
                        allocation: points_to.target.allocation().server_name(),
                        index: points_to.target.index(),
                    },
                    ty: points_to.ty.clone(),
                    value: encode_value(&points_to.value),
                },
                Postcondition::Returns(Return::Value(value)) => PostconditionMessage::Returns {
                    value: Some(encode_value(value)),
                },
                Postcondition::Returns(Return::Void) => PostconditionMessage::Returns { value: None },
            })
            .collect();

        Self {
            setup,
            execution: ExecutionMessage {
                function: function.to_string(),
                args,
            },
            postconditions,
        }
    }
}

fn encode_value(value: &SymbolicValue) -> ValueMessage {
    match value {
        SymbolicValue::Fresh(var) => ValueMessage::Fresh {
            id: var.server_name(),
        },
        SymbolicValue::Int { width, value } => ValueMessage::Int {
            width: *width,
            literal: *value,
        },
        SymbolicValue::Array { ty, elements } => ValueMessage::Array {
            ty: ty.clone(),
            elements: elements.iter().map(encode_value).collect(),
        },
        SymbolicValue::Pointer(allocation) => ValueMessage::Pointer {
            allocation: allocation.server_name(),
        },
        SymbolicValue::Null => ValueMessage::Null,
    }
}

/// Rebuild a contract from its wire form
///
/// The document is replayed statement by statement through a
/// [`ContractBuilder`], so it is held to the same rules as a contract built
/// in code, and any reference to an id no earlier setup statement introduced
/// is an `UnknownLocation`.
pub fn decode_contract(message: &ContractMessage) -> Result<Contract, ContractError> {
    let mut decoder = Decoder::default();
    let mut builder = ContractBuilder::new();

    for stmt in &message.setup {
        match stmt {
            SetupMessage::Fresh { id, name, ty } => {
                decoder.check_new_id(id)?;
                let var = builder.fresh_var(ty.clone(), name.clone())?;
                decoder.fresh.insert(id.clone(), var);
            }
            SetupMessage::Allocate {
                id,
                ty,
                mutable,
                points_to,
            } => {
                decoder.check_new_id(id)?;
                let initial = points_to.as_ref().map(|v| decoder.value(v)).transpose()?;
                let allocation = if *mutable {
                    builder.alloc(ty.clone(), initial)?
                } else {
                    builder.alloc_readonly(ty.clone(), initial)?
                };
                decoder.allocations.insert(id.clone(), allocation);
            }
        }
    }

    let args = message
        .execution
        .args
        .iter()
        .map(|arg| match arg {
            ArgumentMessage::Allocation(id) => decoder.allocation(id).map(Argument::Allocation),
            ArgumentMessage::Value(value) => decoder.value(value).map(Argument::Value),
        })
        .collect::<Result<Vec<_>, _>>()?;
    builder.execute_func(args)?;

    for post in &message.postconditions {
        match post {
            PostconditionMessage::PointsTo { target, ty, value } => {
                let allocation = decoder.allocation(&target.allocation)?;
                let locator = match target.index {
                    Some(index) => Locator::Element(allocation, index),
                    None => Locator::Whole(allocation),
                };
                let value = decoder.value(value)?;
                // the declared target type must agree with what the heap resolves
                ty.expect(&value.ty())?;
                builder.points_to(locator, value)?;
            }
            PostconditionMessage::Returns { value: Some(value) } => {
                builder.returns(decoder.value(value)?)?;
            }
            PostconditionMessage::Returns { value: None } => builder.returns(Return::Void)?,
        }
    }

    builder.finish()
}

/// Rebuild the contract a verification request carries
///
/// The request names its function twice, at the top level and in the
/// execution statement; the two must agree.
pub fn decode_request(request: &VerifyRequest) -> Result<Contract, ContractError> {
    if request.function != request.contract.execution.function {
        return Err(ContractError::ill_formed(format!(
            "request targets `{}` but its execution calls `{}`",
            request.function, request.contract.execution.function
        )));
    }
    decode_contract(&request.contract)
}

#[derive(Default)]
struct Decoder {
    fresh: HashMap<String, SymbolicValue>,
    allocations: HashMap<String, Allocation>,
}

impl Decoder {
    fn check_new_id(&self, id: &str) -> Result<(), ContractError> {
        if self.fresh.contains_key(id) || self.allocations.contains_key(id) {
            return Err(ContractError::ill_formed(format!("id `{id}` declared twice")));
        }
        Ok(())
    }

    fn allocation(&self, id: &str) -> Result<Allocation, ContractError> {
        self.allocations
            .get(id)
            .cloned()
            .ok_or_else(|| ContractError::unknown_location(format!("no allocation `{id}`")))
    }

    fn value(&self, message: &ValueMessage) -> Result<SymbolicValue, ContractError> {
        match message {
            ValueMessage::Fresh { id } => self
                .fresh
                .get(id)
                .cloned()
                .ok_or_else(|| ContractError::unknown_location(format!("no fresh variable `{id}`"))),
            ValueMessage::Int { width, literal } => Ok(SymbolicValue::int(*width, *literal)),
            ValueMessage::Array { ty, elements } => {
                let elements = elements
                    .iter()
                    .map(|element| self.value(element))
                    .collect::<Result<Vec<_>, _>>()?;
                SymbolicValue::array(ty.clone(), elements)
            }
            ValueMessage::Pointer { allocation } => {
                self.allocation(allocation).map(SymbolicValue::Pointer)
            }
            ValueMessage::Null => Ok(SymbolicValue::Null),
        }
    }
}

/// Serde helper: integers as decimal strings
mod decimal {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i128, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
