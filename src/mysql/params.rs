//! Prepared statement parameters: placeholder counting and conversion of
//! binary-protocol values into bind variables.

use opensrv_mysql::{ColumnType, ParamValue, ValueInner};

use crate::sqltypes::query::{BindVariable, Type};
use crate::sqltypes::BindVars;

/// Name of the bind variable for the `index`-th placeholder (0-based).
pub fn bind_var_name(index: usize) -> String {
    format!("v{}", index + 1)
}

/// Counts `?` placeholders outside quoted strings, quoted identifiers and
/// comments.
pub fn count_placeholders(query: &str) -> usize {
    let bytes = query.as_bytes();
    let mut count = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'?' => count += 1,
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\\' && quote != b'`' {
                        i += 1;
                    } else if bytes[i] == quote {
                        // A doubled quote is an escaped quote.
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 1;
                        } else {
                            break;
                        }
                    }
                    i += 1;
                }
            }
            b'#' => i = skip_line(bytes, i),
            b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_line(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    count
}

fn skip_line(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    i
}

/// Bind variables `v1..vN` for the parameters of one `COM_STMT_EXECUTE`.
pub fn bind_vars<'a, I>(params: I) -> BindVars
where
    I: IntoIterator<Item = ParamValue<'a>>,
{
    params
        .into_iter()
        .enumerate()
        .map(|(i, param)| (bind_var_name(i), bind_variable(param.coltype, param.value.into_inner())))
        .collect()
}

pub fn bind_variable(coltype: ColumnType, value: ValueInner<'_>) -> BindVariable {
    match value {
        ValueInner::NULL => BindVariable::null(),
        ValueInner::Int(v) => BindVariable::int64(v),
        ValueInner::UInt(v) => BindVariable::uint64(v),
        ValueInner::Double(v) => BindVariable::float64(v),
        ValueInner::Bytes(b) => match coltype {
            ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
                BindVariable::typed(Type::Decimal, b)
            }
            _ => BindVariable::varbinary(b),
        },
        ValueInner::Date(b) => BindVariable::typed(Type::Date, format_date(b)),
        ValueInner::Datetime(b) => match coltype {
            ColumnType::MYSQL_TYPE_DATE => BindVariable::typed(Type::Date, format_date(b)),
            ColumnType::MYSQL_TYPE_TIMESTAMP => {
                BindVariable::typed(Type::Timestamp, format_datetime(b))
            }
            _ => BindVariable::typed(Type::Datetime, format_datetime(b)),
        },
        ValueInner::Time(b) => BindVariable::typed(Type::Time, format_time(b)),
    }
}

/// Binary DATE/DATETIME layout: year (u16 LE), month, day, then optionally
/// hour, minute, second and microseconds (u32 LE).
fn format_date(b: &[u8]) -> String {
    if b.len() < 4 {
        return "0000-00-00".to_string();
    }
    let year = u16::from_le_bytes([b[0], b[1]]);
    format!("{:04}-{:02}-{:02}", year, b[2], b[3])
}

fn format_datetime(b: &[u8]) -> String {
    let date = format_date(b);
    let (hour, minute, second) = if b.len() >= 7 {
        (b[4], b[5], b[6])
    } else {
        (0, 0, 0)
    };
    let mut out = format!("{} {:02}:{:02}:{:02}", date, hour, minute, second);
    if b.len() >= 11 {
        let micros = u32::from_le_bytes([b[7], b[8], b[9], b[10]]);
        out.push_str(&format!(".{:06}", micros));
    }
    out
}

/// Binary TIME layout: sign, days (u32 LE), hour, minute, second, then
/// optionally microseconds (u32 LE).
fn format_time(b: &[u8]) -> String {
    if b.len() < 8 {
        return "00:00:00".to_string();
    }
    let negative = b[0] == 1;
    let days = u32::from_le_bytes([b[1], b[2], b[3], b[4]]);
    let hours = u64::from(days) * 24 + u64::from(b[5]);
    let mut out = format!(
        "{}{:02}:{:02}:{:02}",
        if negative { "-" } else { "" },
        hours,
        b[6],
        b[7]
    );
    if b.len() >= 12 {
        let micros = u32::from_le_bytes([b[8], b[9], b[10], b[11]]);
        out.push_str(&format!(".{:06}", micros));
    }
    out
}
