use opensrv_mysql::{Column, ColumnFlags, ColumnType, ErrorKind};

use crate::error::SqlError;
use crate::sqltypes::query::{Field, Type};
use crate::sqltypes::{is_binary, is_unsigned};

// MySQL server status flags
pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;

pub fn map_column_type(ty: Type) -> ColumnType {
    use ColumnType::*;

    match ty {
        Type::NullType => MYSQL_TYPE_NULL,
        Type::Int8 | Type::Uint8 => MYSQL_TYPE_TINY,
        Type::Int16 | Type::Uint16 => MYSQL_TYPE_SHORT,
        Type::Int24 | Type::Uint24 => MYSQL_TYPE_INT24,
        Type::Int32 | Type::Uint32 => MYSQL_TYPE_LONG,
        Type::Int64 | Type::Uint64 => MYSQL_TYPE_LONGLONG,
        Type::Float32 => MYSQL_TYPE_FLOAT,
        Type::Float64 => MYSQL_TYPE_DOUBLE,
        Type::Timestamp => MYSQL_TYPE_TIMESTAMP,
        Type::Date => MYSQL_TYPE_DATE,
        Type::Time => MYSQL_TYPE_TIME,
        Type::Datetime => MYSQL_TYPE_DATETIME,
        Type::Year => MYSQL_TYPE_YEAR,
        Type::Decimal => MYSQL_TYPE_NEWDECIMAL,
        Type::Text | Type::Blob => MYSQL_TYPE_BLOB,
        Type::Char | Type::Binary | Type::Enum | Type::Set => MYSQL_TYPE_STRING,
        Type::Bit => MYSQL_TYPE_BIT,
        Type::Geometry => MYSQL_TYPE_GEOMETRY,
        Type::Json => MYSQL_TYPE_JSON,
        Type::Varchar
        | Type::Varbinary
        | Type::Tuple
        | Type::Expression
        | Type::Hexnum
        | Type::Hexval
        | Type::Bitnum => MYSQL_TYPE_VAR_STRING,
    }
}

/// Column flags: the ones the backend reported plus those implied by the type.
pub fn map_column_flags(ty: Type, backend_flags: u32) -> ColumnFlags {
    let mut flags = ColumnFlags::from_bits_truncate(backend_flags as u16);
    if is_unsigned(ty) {
        flags |= ColumnFlags::UNSIGNED_FLAG;
    }
    if is_binary(ty) {
        flags |= ColumnFlags::BINARY_FLAG;
    }
    match ty {
        Type::Enum => flags |= ColumnFlags::ENUM_FLAG,
        Type::Set => flags |= ColumnFlags::SET_FLAG,
        _ => {}
    }
    flags
}

/// Column definition for a result field.
///
/// Row values always travel as the backend's text encoding. The text protocol
/// carries every type that way; the binary protocol only does so for string
/// columns, so prepared statement results are described as `VAR_STRING`.
pub fn map_column(field: &Field, binary_protocol: bool) -> Column {
    let ty = field.r#type();
    let coltype = if binary_protocol {
        ColumnType::MYSQL_TYPE_VAR_STRING
    } else {
        map_column_type(ty)
    };
    Column {
        table: field.table.clone(),
        column: field.name.clone(),
        coltype,
        colflags: map_column_flags(ty, field.flags),
    }
}

/// `ErrorKind` carrying the error number of a SQL error.
///
/// opensrv only writes error numbers it knows, so numbers outside the table
/// fall back to `ER_UNKNOWN_ERROR`; the original number stays in the message.
pub fn map_sql_error(err: &SqlError) -> (ErrorKind, String) {
    let kind = match err.num {
        1045 => ErrorKind::ER_ACCESS_DENIED_ERROR,
        1047 => ErrorKind::ER_UNKNOWN_COM_ERROR,
        1049 => ErrorKind::ER_BAD_DB_ERROR,
        1054 => ErrorKind::ER_BAD_FIELD_ERROR,
        1062 => ErrorKind::ER_DUP_ENTRY,
        1064 => ErrorKind::ER_PARSE_ERROR,
        1146 => ErrorKind::ER_NO_SUCH_TABLE,
        1149 => ErrorKind::ER_SYNTAX_ERROR,
        1203 => ErrorKind::ER_TOO_MANY_USER_CONNECTIONS,
        1205 => ErrorKind::ER_LOCK_WAIT_TIMEOUT,
        1213 => ErrorKind::ER_LOCK_DEADLOCK,
        1235 => ErrorKind::ER_NOT_SUPPORTED_YET,
        1317 => ErrorKind::ER_QUERY_INTERRUPTED,
        _ => ErrorKind::ER_UNKNOWN_ERROR,
    };
    (kind, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_types() {
        assert_eq!(map_column_type(Type::Int32), ColumnType::MYSQL_TYPE_LONG);
        assert_eq!(map_column_type(Type::Uint64), ColumnType::MYSQL_TYPE_LONGLONG);
        assert_eq!(map_column_type(Type::Decimal), ColumnType::MYSQL_TYPE_NEWDECIMAL);
        assert_eq!(map_column_type(Type::Varchar), ColumnType::MYSQL_TYPE_VAR_STRING);
        assert_eq!(map_column_type(Type::Json), ColumnType::MYSQL_TYPE_JSON);
    }

    #[test]
    fn column_flags() {
        assert!(map_column_flags(Type::Uint8, 0).contains(ColumnFlags::UNSIGNED_FLAG));
        assert!(map_column_flags(Type::Blob, 0).contains(ColumnFlags::BINARY_FLAG));
        assert!(map_column_flags(Type::Enum, 0).contains(ColumnFlags::ENUM_FLAG));
        let not_null = ColumnFlags::NOT_NULL_FLAG.bits() as u32;
        assert!(map_column_flags(Type::Int64, not_null).contains(ColumnFlags::NOT_NULL_FLAG));
    }

    #[test]
    fn binary_protocol_columns_are_strings() {
        let mut field = Field::named("id", Type::Int64);
        field.table = "t".to_string();

        let text = map_column(&field, false);
        assert_eq!(text.coltype, ColumnType::MYSQL_TYPE_LONGLONG);
        assert_eq!(text.table, "t");
        assert_eq!(text.column, "id");

        let binary = map_column(&field, true);
        assert_eq!(binary.coltype, ColumnType::MYSQL_TYPE_VAR_STRING);
    }

    #[test]
    fn error_kinds() {
        let err = SqlError::new(1054, "42S22", "Unknown column 'x'");
        let (kind, msg) = map_sql_error(&err);
        assert_eq!(kind, ErrorKind::ER_BAD_FIELD_ERROR);
        assert!(msg.contains("Unknown column 'x'"));

        let (kind, msg) = map_sql_error(&SqlError::new(1815, "HY000", "internal"));
        assert_eq!(kind, ErrorKind::ER_UNKNOWN_ERROR);
        assert!(msg.contains("errno 1815"));

        let (kind, _) = map_sql_error(&SqlError::not_implemented());
        assert_eq!(kind, ErrorKind::ER_UNKNOWN_ERROR);
    }
}
