//! Conversions between the RPC-facing schema (`be::pb::vitess`) and the
//! wire-facing schema (`sqltypes`).
//!
//! Both schemas are generated from the same message definitions, so every
//! conversion only moves owned buffers across: strings, byte vectors and row
//! vectors change type without their contents being copied, and
//! `Vec<A> -> Vec<B>` through `into_iter().map().collect()` reuses the source
//! allocation because the element layouts match.
//!
//! Two guards keep the schemas from drifting apart silently:
//! - every conversion destructures its source without `..`, so a field added
//!   on either side is a compile error here;
//! - every pair carries a compile-time size and alignment assertion.

use std::collections::HashMap;
use std::mem::{align_of, size_of};

use crate::be::pb::vitess::query::v16 as rpc;
use crate::be::pb::vitess::vtrpc::v16 as rpcerr;
use crate::sqltypes::{query as wire, vtrpc as wireerr};

macro_rules! assert_same_layout {
    ($($a:ty => $b:ty),* $(,)?) => {
        $(
            const _: () = assert!(
                size_of::<$a>() == size_of::<$b>() && align_of::<$a>() == align_of::<$b>()
            );
        )*
    };
}

assert_same_layout! {
    wire::Value => rpc::Value,
    wire::BindVariable => rpc::BindVariable,
    wire::Field => rpc::Field,
    wire::Row => rpc::Row,
    wire::QueryResult => rpc::QueryResult,
    wireerr::RpcError => rpcerr::RpcError,
}

/// Wire bind variables as sent to the backend.
pub fn cast_bind_vars(
    bind_vars: HashMap<String, wire::BindVariable>,
) -> HashMap<String, rpc::BindVariable> {
    bind_vars
        .into_iter()
        .map(|(name, bv)| (name, cast_bind_var(bv)))
        .collect()
}

fn cast_bind_var(bv: wire::BindVariable) -> rpc::BindVariable {
    let wire::BindVariable {
        r#type,
        value,
        values,
    } = bv;
    rpc::BindVariable {
        r#type,
        value,
        values: values.into_iter().map(cast_value).collect(),
    }
}

fn cast_value(v: wire::Value) -> rpc::Value {
    let wire::Value { r#type, value } = v;
    rpc::Value { r#type, value }
}

/// Backend error payload as reported to the front door.
pub fn cast_rpc_error(err: rpcerr::RpcError) -> wireerr::RpcError {
    let rpcerr::RpcError { message, code } = err;
    wireerr::RpcError { message, code }
}

pub fn cast_fields(fields: Vec<rpc::Field>) -> Vec<wire::Field> {
    fields.into_iter().map(cast_field).collect()
}

fn cast_field(field: rpc::Field) -> wire::Field {
    let rpc::Field {
        name,
        r#type,
        table,
        org_table,
        database,
        org_name,
        column_length,
        charset,
        decimals,
        flags,
        column_type,
    } = field;
    wire::Field {
        name,
        r#type,
        table,
        org_table,
        database,
        org_name,
        column_length,
        charset,
        decimals,
        flags,
        column_type,
    }
}

pub fn cast_rows(rows: Vec<rpc::Row>) -> Vec<wire::Row> {
    rows.into_iter().map(cast_row).collect()
}

fn cast_row(row: rpc::Row) -> wire::Row {
    let rpc::Row { lengths, values } = row;
    wire::Row { lengths, values }
}

pub fn cast_query_result(result: rpc::QueryResult) -> wire::QueryResult {
    let rpc::QueryResult {
        fields,
        rows_affected,
        insert_id,
        rows,
        info,
        session_state_changes,
    } = result;
    wire::QueryResult {
        fields: cast_fields(fields),
        rows_affected,
        insert_id,
        rows: cast_rows(rows),
        info,
        session_state_changes,
    }
}
