use std::collections::HashMap;

use crate::backend::{BackendConnection, QueryResult, ResultStatus};
use crate::error::{DatabaseError, Result};
use crate::types::{dynamic_type, oid, sql3, ArrayKind, CompatMode};

/// Per-connection memo of which result types carry multiple elements.
#[derive(Debug)]
pub(crate) struct TypeCache {
    kinds: HashMap<u32, ArrayKind>,
}

impl Default for TypeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeCache {
    pub(crate) fn new() -> Self {
        let mut kinds = HashMap::new();

        for vector in [
            oid::INT2VECTOR,
            oid::OIDVECTOR,
            oid::POINT,
            oid::LSEG,
            oid::BOX,
            oid::LINE,
        ] {
            kinds.insert(vector, ArrayKind::Vector);
        }

        for scalar in [
            oid::BOOL,
            oid::BYTEA,
            oid::CHAR,
            oid::NAME,
            oid::INT8,
            oid::INT2,
            oid::INT4,
            oid::REGPROC,
            oid::TEXT,
            oid::OID,
            oid::TID,
            oid::XID,
            oid::CID,
            oid::PATH,
            oid::POLYGON,
            oid::FLOAT4,
            oid::FLOAT8,
            oid::UNKNOWN,
            oid::CIRCLE,
            oid::MONEY,
            oid::INET,
            oid::CIDR,
            oid::BPCHAR,
            oid::VARCHAR,
            oid::DATE,
            oid::TIME,
            oid::TIMESTAMP,
            oid::TIMESTAMPTZ,
            oid::INTERVAL,
            oid::TIMETZ,
            oid::BIT,
            oid::VARBIT,
            oid::NUMERIC,
        ] {
            kinds.insert(scalar, ArrayKind::None);
        }

        Self { kinds }
    }

    pub(crate) fn get(&self, type_oid: u32) -> Option<ArrayKind> {
        self.kinds.get(&type_oid).copied()
    }

    /// Classifies `type_oid`, asking the server about types it has not seen yet.
    pub(crate) fn array_kind(
        &mut self,
        backend: &mut dyn BackendConnection,
        line: i32,
        compat: CompatMode,
        type_oid: u32,
    ) -> Result<ArrayKind> {
        if let Some(kind) = self.get(type_oid) {
            return Ok(kind);
        }

        let query = format!("select typlen from pg_type where oid={type_oid} and typelem<>0");
        log::debug!(target: "ecpg", "on line {line}: looking up array kind of type {type_oid}");
        let result = backend.exec(&query);

        let kind = match result {
            Some(result) if result.status() == ResultStatus::TuplesOk => classify(&result, type_oid),
            other => {
                return Err(DatabaseError::from_backend(line, compat, other.as_ref(), backend).into())
            }
        };

        log::trace!(target: "ecpg", "on line {line}: type {type_oid} is {kind:?}");

        self.kinds.insert(type_oid, kind);
        Ok(kind)
    }
}

fn classify(result: &QueryResult, type_oid: u32) -> ArrayKind {
    if result.ntuples() == 0 {
        return ArrayKind::None;
    }

    // character types are read as a whole even when the server calls them arrays
    if matches!(
        dynamic_type(type_oid),
        sql3::CHARACTER | sql3::CHARACTER_VARYING
    ) {
        return ArrayKind::None;
    }

    match result.value(0, 0).and_then(|len| atoi::atoi::<i64>(len.as_bytes())) {
        Some(-1) => ArrayKind::Array,
        _ => ArrayKind::Vector,
    }
}
