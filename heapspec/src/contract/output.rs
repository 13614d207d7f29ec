//! Contract Output Formatting
//!
//! Human-readable rendering of a built contract, used in logs and by
//! `heapspec check`.

use std::fmt;

use super::{Argument, Contract, Postcondition, Return, SetupStatement};

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "setup:")?;
        for stmt in &self.setup {
            match stmt {
                SetupStatement::Fresh(var) => writeln!(f, "  fresh {}: {}", var.name(), var.ty())?,
                SetupStatement::Allocate {
                    allocation,
                    points_to,
                } => {
                    let kind = if allocation.is_mutable() { "alloc" } else { "alloc readonly" };
                    write!(f, "  {kind} {}: {}", allocation.server_name(), allocation.ty())?;
                    if let Some(value) = points_to {
                        write!(f, " = {value}")?;
                    }
                    writeln!(f)?;
                }
            }
        }

        write!(f, "execute(")?;
        for (i, arg) in self.execution.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            fmt::Display::fmt(arg, f)?;
        }
        writeln!(f, ")")?;

        write!(f, "postconditions:")?;
        for post in &self.postconditions {
            writeln!(f)?;
            match post {
                Postcondition::PointsTo(points_to) => {
                    write!(f, "  {} |-> {}", points_to.target, points_to.value)?
                }
                Postcondition::Returns(ret) => write!(f, "  returns {ret}")?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Value(value) => write!(f, "{value}"),
            Argument::Allocation(allocation) => write!(f, "{}", allocation.server_name()),
        }
    }
}

impl fmt::Display for Return {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Return::Value(value) => write!(f, "{value}"),
            Return::Void => write!(f, "void"),
        }
    }
}
