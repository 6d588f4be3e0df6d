//! Wire-facing query types.
//!
//! These are the messages the MySQL front door consumes and produces. They are
//! generated from the same definitions as the RPC-facing schema in
//! [`crate::be::pb`]; see [`crate::cast`] for how values cross between them.

#[allow(clippy::all)]
pub mod query {
    include!(concat!(env!("OUT_DIR"), "/wire/query.rs"));
}

#[allow(clippy::all)]
pub mod vtrpc {
    include!(concat!(env!("OUT_DIR"), "/wire/vtrpc.rs"));
}

mod row;

pub use row::{make_row, RowValues};

use std::collections::HashMap;

use query::{BindVariable, Field, QueryResult, Type};

/// Bind variables keyed by placeholder name (`v1`, `v2`, ...).
pub type BindVars = HashMap<String, BindVariable>;

/// Everything the front door remembers about a prepared statement.
#[derive(Debug, Clone, Default)]
pub struct PrepareData {
    pub statement_id: u32,
    pub prepare_stmt: String,
    pub param_count: u16,
    pub bind_vars: BindVars,
}

impl BindVariable {
    pub fn typed(ty: Type, value: impl Into<Vec<u8>>) -> Self {
        Self {
            r#type: ty as i32,
            value: value.into(),
            values: Vec::new(),
        }
    }

    pub fn null() -> Self {
        Self::typed(Type::NullType, Vec::new())
    }

    pub fn int64(v: i64) -> Self {
        Self::typed(Type::Int64, v.to_string())
    }

    pub fn uint64(v: u64) -> Self {
        Self::typed(Type::Uint64, v.to_string())
    }

    pub fn float64(v: f64) -> Self {
        Self::typed(Type::Float64, v.to_string())
    }

    pub fn varbinary(v: impl Into<Vec<u8>>) -> Self {
        Self::typed(Type::Varbinary, v)
    }
}

impl Field {
    pub fn named(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            r#type: ty as i32,
            ..Default::default()
        }
    }
}

impl QueryResult {
    /// Number of rows carried by this page.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

pub fn is_unsigned(ty: Type) -> bool {
    matches!(
        ty,
        Type::Uint8 | Type::Uint16 | Type::Uint24 | Type::Uint32 | Type::Uint64 | Type::Year
    )
}

pub fn is_binary(ty: Type) -> bool {
    matches!(
        ty,
        Type::Blob | Type::Varbinary | Type::Binary | Type::Bit | Type::Geometry
    )
}
