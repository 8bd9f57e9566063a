//! Dialect tags and the dialect-neutral column type vocabulary.
//!
//! Every adapter reports the declared type exactly as its catalog spells it
//! (`character varying`, `int(11) unsigned`, `TEXT`, `datetime2`, ...). [`DataType::normalize`]
//! folds those spellings into one small vocabulary so that quality analysis,
//! prompts and exports never branch on a dialect.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Source database engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Postgres,
    Mysql,
    Sqlite,
    #[serde(rename = "sqlserver")]
    SqlServer,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
            Dialect::Sqlite => "sqlite",
            Dialect::SqlServer => "sqlserver",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "sqlserver" | "mssql" | "sql_server" => Ok(Dialect::SqlServer),
            other => Err(format!(
                "unsupported dialect '{}': expected postgres, mysql, sqlite or sqlserver",
                other
            )),
        }
    }
}

/// Dialect-neutral column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Integer,
    Decimal,
    Float,
    Boolean,
    Text,
    Date,
    Time,
    Timestamp,
    Interval,
    Uuid,
    Json,
    Binary,
    Array,
    Other,
}

impl DataType {
    /// Map a catalog-reported type name onto the neutral vocabulary.
    ///
    /// Length/precision suffixes and MySQL modifiers are ignored, except for
    /// `tinyint(1)`, which MySQL uses as its boolean.
    pub fn normalize(declared: &str) -> DataType {
        let lower = declared.trim().to_ascii_lowercase();

        if lower.starts_with("tinyint(1)") {
            return DataType::Boolean;
        }
        if lower.ends_with("[]") || lower == "array" {
            return DataType::Array;
        }

        let base = lower
            .split('(')
            .next()
            .unwrap_or("")
            .replace(" unsigned", "")
            .replace(" zerofill", "");
        let base = base.trim();

        match base {
            "bool" | "boolean" | "bit" => DataType::Boolean,
            "smallint" | "integer" | "int" | "int2" | "int4" | "int8" | "bigint" | "tinyint"
            | "mediumint" | "serial" | "bigserial" | "smallserial" | "year" => DataType::Integer,
            "decimal" | "numeric" | "dec" | "fixed" | "money" | "smallmoney" => DataType::Decimal,
            "real" | "float" | "float4" | "float8" | "double" | "double precision" => {
                DataType::Float
            }
            "char" | "character" | "varchar" | "character varying" | "text" | "tinytext"
            | "mediumtext" | "longtext" | "nchar" | "nvarchar" | "clob" | "citext" | "enum"
            | "set" | "name" | "bpchar" | "string" => DataType::Text,
            "date" => DataType::Date,
            "time" | "timetz" | "time without time zone" | "time with time zone" => DataType::Time,
            "timestamp"
            | "timestamptz"
            | "timestamp without time zone"
            | "timestamp with time zone"
            | "datetime"
            | "datetime2"
            | "smalldatetime"
            | "datetimeoffset" => DataType::Timestamp,
            "uuid" | "uniqueidentifier" => DataType::Uuid,
            "json" | "jsonb" => DataType::Json,
            "bytea" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary" | "varbinary"
            | "image" | "rowversion" => DataType::Binary,
            _ if base.starts_with("interval") => DataType::Interval,
            // SQLite affinity rules for free-form declarations.
            _ if base.contains("int") && !base.contains("point") => DataType::Integer,
            _ if base.contains("char") || base.contains("clob") || base.contains("text") => {
                DataType::Text
            }
            _ if base.contains("real") || base.contains("floa") || base.contains("doub") => {
                DataType::Float
            }
            _ if base.contains("blob") => DataType::Binary,
            _ => DataType::Other,
        }
    }

    /// Whether MIN/MAX are meaningful (and portable) for this type.
    pub fn is_orderable(&self) -> bool {
        matches!(
            self,
            DataType::Integer
                | DataType::Decimal
                | DataType::Float
                | DataType::Text
                | DataType::Date
                | DataType::Time
                | DataType::Timestamp
        )
    }

    /// Whether `COUNT(DISTINCT ...)` is supported on every dialect.
    ///
    /// Unrecognized types (geometric, xml, ...) may lack an equality operator.
    pub fn is_distinct_countable(&self) -> bool {
        !matches!(self, DataType::Json | DataType::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Integer => "integer",
            DataType::Decimal => "decimal",
            DataType::Float => "float",
            DataType::Boolean => "boolean",
            DataType::Text => "text",
            DataType::Date => "date",
            DataType::Time => "time",
            DataType::Timestamp => "timestamp",
            DataType::Interval => "interval",
            DataType::Uuid => "uuid",
            DataType::Json => "json",
            DataType::Binary => "binary",
            DataType::Array => "array",
            DataType::Other => "other",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_postgres_catalog_names() {
        assert_eq!(DataType::normalize("character varying"), DataType::Text);
        assert_eq!(
            DataType::normalize("timestamp with time zone"),
            DataType::Timestamp
        );
        assert_eq!(DataType::normalize("double precision"), DataType::Float);
        assert_eq!(DataType::normalize("ARRAY"), DataType::Array);
        assert_eq!(DataType::normalize("interval"), DataType::Interval);
        assert_eq!(DataType::normalize("jsonb"), DataType::Json);
    }

    #[test]
    fn normalizes_mysql_column_types() {
        assert_eq!(DataType::normalize("int(11) unsigned"), DataType::Integer);
        assert_eq!(DataType::normalize("tinyint(1)"), DataType::Boolean);
        assert_eq!(DataType::normalize("decimal(10,2)"), DataType::Decimal);
        assert_eq!(DataType::normalize("longtext"), DataType::Text);
    }

    #[test]
    fn normalizes_sql_server_types() {
        assert_eq!(DataType::normalize("datetime2"), DataType::Timestamp);
        assert_eq!(DataType::normalize("datetimeoffset"), DataType::Timestamp);
        assert_eq!(DataType::normalize("uniqueidentifier"), DataType::Uuid);
        assert_eq!(DataType::normalize("nvarchar"), DataType::Text);
        assert_eq!(DataType::normalize("ntext"), DataType::Text);
        assert_eq!(DataType::normalize("smallmoney"), DataType::Decimal);
        assert_eq!(DataType::normalize("bit"), DataType::Boolean);
        assert_eq!(DataType::normalize("image"), DataType::Binary);
    }

    #[test]
    fn falls_back_to_sqlite_affinity() {
        assert_eq!(DataType::normalize("UNSIGNED BIG INT"), DataType::Integer);
        assert_eq!(DataType::normalize("VARYING CHARACTER(20)"), DataType::Text);
        assert_eq!(DataType::normalize("point"), DataType::Other);
        assert_eq!(DataType::normalize("geometry"), DataType::Other);
    }

    #[test]
    fn dialect_parses_aliases() {
        assert_eq!("PostgreSQL".parse::<Dialect>(), Ok(Dialect::Postgres));
        assert_eq!("sqlite3".parse::<Dialect>(), Ok(Dialect::Sqlite));
        assert_eq!("mssql".parse::<Dialect>(), Ok(Dialect::SqlServer));
        assert_eq!(Dialect::SqlServer.to_string().parse::<Dialect>(), Ok(Dialect::SqlServer));
        assert_eq!(
            serde_json::to_string(&Dialect::SqlServer).unwrap(),
            "\"sqlserver\""
        );
        assert!("snowflake".parse::<Dialect>().is_err());
    }
}
