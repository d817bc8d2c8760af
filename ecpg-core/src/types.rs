//! Type tags shared by generated code and the runtime.

use std::fmt::{self, Display, Formatter};

/// The type of a host variable as declared in the embedded SQL program.
///
/// Discriminants are the values generated code passes on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum HostType {
    Char = 1,
    UnsignedChar = 2,
    Short = 3,
    UnsignedShort = 4,
    Int = 5,
    UnsignedInt = 6,
    Long = 7,
    UnsignedLong = 8,
    LongLong = 9,
    UnsignedLongLong = 10,
    Bool = 11,
    Float = 12,
    Double = 13,
    Varchar = 14,
    Varchar2 = 15,
    Numeric = 16,
    Decimal = 17,
    Date = 18,
    Timestamp = 19,
    Interval = 20,
    Array = 21,
    Struct = 22,
    Union = 23,
    Descriptor = 24,
    CharVariable = 25,
    Const = 26,
    EndOfInput = 27,
    EndOfList = 28,
    NoIndicator = 29,
    String = 30,
    Sqlda = 31,
}

impl HostType {
    pub fn from_code(code: i16) -> Option<Self> {
        use HostType::*;

        Some(match code {
            1 => Char,
            2 => UnsignedChar,
            3 => Short,
            4 => UnsignedShort,
            5 => Int,
            6 => UnsignedInt,
            7 => Long,
            8 => UnsignedLong,
            9 => LongLong,
            10 => UnsignedLongLong,
            11 => Bool,
            12 => Float,
            13 => Double,
            14 => Varchar,
            15 => Varchar2,
            16 => Numeric,
            17 => Decimal,
            18 => Date,
            19 => Timestamp,
            20 => Interval,
            21 => Array,
            22 => Struct,
            23 => Union,
            24 => Descriptor,
            25 => CharVariable,
            26 => Const,
            27 => EndOfInput,
            28 => EndOfList,
            29 => NoIndicator,
            30 => String,
            31 => Sqlda,
            _ => return None,
        })
    }

    pub fn code(self) -> i16 {
        self as i16
    }

    /// Size in bytes of one host cell of this type, for fixed-width types.
    pub fn fixed_size(self) -> Option<usize> {
        use HostType::*;

        Some(match self {
            Short | UnsignedShort => 2,
            Int | UnsignedInt | Float | Date => 4,
            Long | UnsignedLong | LongLong | UnsignedLongLong | Double | Timestamp => 8,
            Numeric | Decimal | Interval => 16,
            Bool => 1,
            _ => return None,
        })
    }

    pub fn is_char(self) -> bool {
        matches!(
            self,
            HostType::Char | HostType::UnsignedChar | HostType::String
        )
    }

    pub fn is_varchar(self) -> bool {
        matches!(self, HostType::Varchar | HostType::Varchar2)
    }

    /// Integer and floating types, the ones a descriptor header or item can be read into.
    pub fn is_numeric(self) -> bool {
        use HostType::*;

        matches!(
            self,
            Short
                | UnsignedShort
                | Int
                | UnsignedInt
                | Long
                | UnsignedLong
                | LongLong
                | UnsignedLongLong
                | Float
                | Double
        )
    }

    /// Name used in diagnostics.
    pub fn name(self) -> &'static str {
        use HostType::*;

        match self {
            Char => "char",
            UnsignedChar => "unsigned char",
            Short => "short",
            UnsignedShort => "unsigned short",
            Int => "int",
            UnsignedInt => "unsigned int",
            Long => "long",
            UnsignedLong => "unsigned long",
            LongLong => "long long",
            UnsignedLongLong => "unsigned long long",
            Bool => "bool",
            Float => "float",
            Double => "double",
            Varchar | Varchar2 => "varchar",
            Numeric => "numeric",
            Decimal => "decimal",
            Date => "date",
            Timestamp => "timestamp",
            Interval => "interval",
            Array => "array",
            Struct => "struct",
            Union => "union",
            Descriptor => "descriptor",
            CharVariable => "char variable",
            Const => "const",
            EndOfInput => "end of input list",
            EndOfList => "end of list",
            NoIndicator => "no indicator",
            String => "string",
            Sqlda => "sqlda",
        }
    }
}

impl Display for HostType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Vendor emulation mode of a statement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum CompatMode {
    #[default]
    Pgsql,
    Informix,
    InformixSe,
    Oracle,
}

impl CompatMode {
    pub fn is_informix(self) -> bool {
        matches!(self, CompatMode::Informix | CompatMode::InformixSe)
    }

    pub fn is_oracle(self) -> bool {
        matches!(self, CompatMode::Oracle)
    }
}

/// How the text of a result field encodes multiple elements.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ArrayKind {
    /// A scalar.
    None,

    /// Fixed-size vector such as `int2vector`: elements separated by spaces, no brackets.
    Vector,

    /// Variable-size array: `{a,b,c}`.
    Array,
}

impl ArrayKind {
    pub fn is_array(self) -> bool {
        !matches!(self, ArrayKind::None)
    }

    pub(crate) fn is_delimiter(self, c: u8) -> bool {
        match self {
            ArrayKind::Array => c == b',',
            ArrayKind::Vector => c == b' ',
            ArrayKind::None => false,
        }
    }

    pub(crate) fn is_boundary(self, c: u8) -> bool {
        match self {
            ArrayKind::Array => c == b'}',
            ArrayKind::Vector => c == b'\0',
            ArrayKind::None => false,
        }
    }
}

/// Well-known type OIDs.
pub mod oid {
    pub const BOOL: u32 = 16;
    pub const BYTEA: u32 = 17;
    pub const CHAR: u32 = 18;
    pub const NAME: u32 = 19;
    pub const INT8: u32 = 20;
    pub const INT2: u32 = 21;
    pub const INT2VECTOR: u32 = 22;
    pub const INT4: u32 = 23;
    pub const REGPROC: u32 = 24;
    pub const TEXT: u32 = 25;
    pub const OID: u32 = 26;
    pub const TID: u32 = 27;
    pub const XID: u32 = 28;
    pub const CID: u32 = 29;
    pub const OIDVECTOR: u32 = 30;
    pub const POINT: u32 = 600;
    pub const LSEG: u32 = 601;
    pub const PATH: u32 = 602;
    pub const BOX: u32 = 603;
    pub const POLYGON: u32 = 604;
    pub const LINE: u32 = 628;
    pub const FLOAT4: u32 = 700;
    pub const FLOAT8: u32 = 701;
    pub const UNKNOWN: u32 = 705;
    pub const CIRCLE: u32 = 718;
    pub const MONEY: u32 = 790;
    pub const INET: u32 = 869;
    pub const CIDR: u32 = 650;
    pub const BPCHAR: u32 = 1042;
    pub const VARCHAR: u32 = 1043;
    pub const DATE: u32 = 1082;
    pub const TIME: u32 = 1083;
    pub const TIMESTAMP: u32 = 1114;
    pub const TIMESTAMPTZ: u32 = 1184;
    pub const INTERVAL: u32 = 1186;
    pub const TIMETZ: u32 = 1266;
    pub const BIT: u32 = 1560;
    pub const VARBIT: u32 = 1562;
    pub const NUMERIC: u32 = 1700;
}

/// SQL3 dynamic type codes reported through descriptor `TYPE` items.
pub mod sql3 {
    pub const CHARACTER: i32 = 1;
    pub const NUMERIC: i32 = 2;
    pub const DECIMAL: i32 = 3;
    pub const INTEGER: i32 = 4;
    pub const SMALLINT: i32 = 5;
    pub const FLOAT: i32 = 6;
    pub const REAL: i32 = 7;
    pub const DOUBLE_PRECISION: i32 = 8;
    pub const DATE_TIME_TIMESTAMP: i32 = 9;
    pub const INTERVAL: i32 = 10;
    pub const CHARACTER_VARYING: i32 = 12;
    pub const ENUMERATED: i32 = 13;
    pub const BIT: i32 = 14;
    pub const BIT_VARYING: i32 = 15;
    pub const BOOLEAN: i32 = 16;

    pub const DDT_DATE: i32 = 1;
    pub const DDT_TIME: i32 = 2;
    pub const DDT_TIMESTAMP: i32 = 3;
    pub const DDT_TIME_WITH_TIME_ZONE: i32 = 4;
    pub const DDT_TIMESTAMP_WITH_TIME_ZONE: i32 = 5;
    pub const DDT_ILLEGAL: i32 = -1;
}

/// Maps a backend type OID to its SQL3 dynamic type code.
///
/// Types without a standard code are reported as the negated OID.
pub fn dynamic_type(type_oid: u32) -> i32 {
    match type_oid {
        oid::BOOL => sql3::BOOLEAN,
        oid::INT2 => sql3::SMALLINT,
        oid::INT4 => sql3::INTEGER,
        oid::TEXT | oid::BPCHAR => sql3::CHARACTER,
        oid::FLOAT4 => sql3::REAL,
        oid::FLOAT8 => sql3::DOUBLE_PRECISION,
        oid::VARCHAR => sql3::CHARACTER_VARYING,
        oid::DATE | oid::TIME | oid::TIMESTAMP | oid::TIMESTAMPTZ => sql3::DATE_TIME_TIMESTAMP,
        oid::NUMERIC => sql3::NUMERIC,
        oid::INTERVAL => sql3::INTERVAL,
        other => -(other as i32),
    }
}

/// Datetime subcode companion of [`dynamic_type`].
pub fn dynamic_type_ddt(type_oid: u32) -> i32 {
    match type_oid {
        oid::DATE => sql3::DDT_DATE,
        oid::TIME => sql3::DDT_TIME,
        oid::TIMESTAMP => sql3::DDT_TIMESTAMP,
        oid::TIMESTAMPTZ => sql3::DDT_TIMESTAMP_WITH_TIME_ZONE,
        oid::TIMETZ => sql3::DDT_TIME_WITH_TIME_ZONE,
        _ => sql3::DDT_ILLEGAL,
    }
}

/// Host type a SQLDA column of the given backend type is decoded into.
pub fn sqlda_type(type_oid: u32, compat: CompatMode) -> HostType {
    match type_oid {
        oid::CHAR | oid::VARCHAR | oid::BPCHAR | oid::TEXT => HostType::Char,
        oid::INT2 => HostType::Short,
        oid::INT4 => HostType::Int,
        oid::INT8 => HostType::LongLong,
        oid::FLOAT8 => HostType::Double,
        oid::FLOAT4 => HostType::Float,
        oid::NUMERIC if compat.is_informix() => HostType::Decimal,
        oid::NUMERIC => HostType::Numeric,
        oid::DATE => HostType::Date,
        oid::TIMESTAMP | oid::TIMESTAMPTZ => HostType::Timestamp,
        oid::INTERVAL => HostType::Interval,
        // everything else travels as text
        _ => HostType::Char,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_round_trips_type_codes() {
        for code in 1..=31 {
            let ty = HostType::from_code(code).unwrap();
            assert_eq!(ty.code(), code);
        }

        assert_eq!(HostType::from_code(0), None);
        assert_eq!(HostType::from_code(32), None);
    }

    #[test]
    fn it_maps_dynamic_types() {
        assert_eq!(dynamic_type(oid::INT4), sql3::INTEGER);
        assert_eq!(dynamic_type(oid::VARCHAR), sql3::CHARACTER_VARYING);
        assert_eq!(dynamic_type(oid::POINT), -600);
        assert_eq!(dynamic_type_ddt(oid::DATE), sql3::DDT_DATE);
        assert_eq!(sqlda_type(oid::NUMERIC, CompatMode::Informix), HostType::Decimal);
        assert_eq!(sqlda_type(oid::NUMERIC, CompatMode::Pgsql), HostType::Numeric);
        assert_eq!(sqlda_type(oid::BOOL, CompatMode::Pgsql), HostType::Char);
    }
}
