//! SQL dialect translation
//!
//! Translation is a table of case-insensitive regex rewrites per
//! (source, target) pair, applied in order. Pairs without a table pass the
//! statement through unchanged.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Mysql,
    #[serde(alias = "postgres")]
    Postgresql,
    Snowflake,
    Clickhouse,
    Oracle,
    #[serde(alias = "sqlserver")]
    Mssql,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Mysql => "mysql",
            Dialect::Postgresql => "postgresql",
            Dialect::Snowflake => "snowflake",
            Dialect::Clickhouse => "clickhouse",
            Dialect::Oracle => "oracle",
            Dialect::Mssql => "mssql",
        }
    }

    /// Infer the dialect from a connection URI such as `postgres://host/db`
    pub fn from_uri(uri: &str) -> Option<Self> {
        let scheme = uri.split_once("://")?.0;
        // "postgresql+psycopg2" style driver suffixes
        let scheme = scheme.split('+').next().unwrap_or(scheme);
        scheme.parse().ok()
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = TranslateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            "postgresql" | "postgres" | "pg" => Ok(Dialect::Postgresql),
            "snowflake" => Ok(Dialect::Snowflake),
            "clickhouse" => Ok(Dialect::Clickhouse),
            "oracle" => Ok(Dialect::Oracle),
            "mssql" | "sqlserver" => Ok(Dialect::Mssql),
            other => Err(TranslateError::UnknownDialect(other.to_string())),
        }
    }
}

/// Rewrites SQL written for one dialect into another
pub trait SqlTranslator: Send + Sync {
    fn translate(&self, sql: &str, source: Dialect, target: Dialect)
        -> Result<String, TranslateError>;
}

/// One compiled rewrite
#[derive(Debug, Clone)]
pub struct RewriteRule {
    pattern: Regex,
    replacement: String,
}

impl RewriteRule {
    /// `pattern` is matched case-insensitively; `replacement` may use `$1`
    pub fn new(pattern: &str, replacement: &str) -> Result<Self, TranslateError> {
        let pattern = Regex::new(&format!("(?i){}", pattern)).map_err(|e| {
            TranslateError::InvalidRule {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            pattern,
            replacement: replacement.to_string(),
        })
    }

    fn apply(&self, sql: &str) -> String {
        self.pattern
            .replace_all(sql, self.replacement.as_str())
            .into_owned()
    }
}

/// Regex rule tables keyed by dialect pair
pub struct RuleTableTranslator {
    tables: RwLock<HashMap<(Dialect, Dialect), Vec<RewriteRule>>>,
}

const MYSQL_TO_POSTGRES: &[(&str, &str)] = &[
    (r"`([^`]+)`", r#""$1""#),
    (r"\bLIMIT\s+(\d+)\s*,\s*(\d+)", "LIMIT $2 OFFSET $1"),
    (r"\bINT(?:EGER)?(\s+NOT\s+NULL)?\s+AUTO_INCREMENT\b", "SERIAL$1"),
    (r"\bBIGINT(\s+NOT\s+NULL)?\s+AUTO_INCREMENT\b", "BIGSERIAL$1"),
    (r"\s*\bAUTO_INCREMENT\b", ""),
    (r"\s*\bENGINE\s*=\s*\w+", ""),
    (r"\bTINYINT\b", "SMALLINT"),
    (r"\bMEDIUMINT\b", "INTEGER"),
    (r"\b(?:LONG|MEDIUM)TEXT\b", "TEXT"),
    (r"\bDATETIME\b", "TIMESTAMP"),
    (r"\bNOW\s*\(\s*\)", "CURRENT_TIMESTAMP"),
    (r"\bIFNULL\s*\(", "COALESCE("),
];

const POSTGRES_TO_MYSQL: &[(&str, &str)] = &[
    (r#""([^"]+)""#, "`$1`"),
    (r"\bLIMIT\s+(\d+)\s+OFFSET\s+(\d+)", "LIMIT $2, $1"),
    (r"\bBIGSERIAL\b", "BIGINT AUTO_INCREMENT"),
    (r"\bSERIAL\b", "INT AUTO_INCREMENT"),
    (r"::\w+", ""),
    (r"\bTEXT\b", "LONGTEXT"),
    (r"\bCURRENT_TIMESTAMP\b", "NOW()"),
    (r"\bCOALESCE\s*\(", "IFNULL("),
];

const MYSQL_TO_SNOWFLAKE: &[(&str, &str)] = &[
    (r"`([^`]+)`", r#""$1""#),
    (r"\bLIMIT\s+(\d+)\s*,\s*(\d+)", "LIMIT $2 OFFSET $1"),
    (r"\s*\bAUTO_INCREMENT\b", " AUTOINCREMENT"),
    (r"\s*\bENGINE\s*=\s*\w+", ""),
    (r"\bMEDIUMINT\b", "INTEGER"),
    (r"\b(?:LONG|MEDIUM)TEXT\b", "VARCHAR"),
    (r"\bIFNULL\s*\(", "COALESCE("),
];

const POSTGRES_TO_SNOWFLAKE: &[(&str, &str)] = &[
    (r"::\w+", ""),
    (r"\bBIGSERIAL\b", "BIGINT AUTOINCREMENT"),
    (r"\bSERIAL\b", "INTEGER AUTOINCREMENT"),
];

impl RuleTableTranslator {
    /// Translator with no rule tables; every pair passes through
    pub fn empty() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Translator seeded with the built-in mysql/postgresql/snowflake tables
    pub fn new() -> Self {
        let translator = Self::empty();
        let seeds = [
            (Dialect::Mysql, Dialect::Postgresql, MYSQL_TO_POSTGRES),
            (Dialect::Postgresql, Dialect::Mysql, POSTGRES_TO_MYSQL),
            (Dialect::Mysql, Dialect::Snowflake, MYSQL_TO_SNOWFLAKE),
            (Dialect::Postgresql, Dialect::Snowflake, POSTGRES_TO_SNOWFLAKE),
        ];
        for (source, target, rules) in seeds {
            let compiled = rules
                .iter()
                .filter_map(|(p, r)| RewriteRule::new(p, r).ok())
                .collect();
            translator.tables.write().insert((source, target), compiled);
        }
        translator
    }

    /// Append rules for a dialect pair
    pub fn register(
        &self,
        source: Dialect,
        target: Dialect,
        rules: &[(&str, &str)],
    ) -> Result<(), TranslateError> {
        let compiled = rules
            .iter()
            .map(|(p, r)| RewriteRule::new(p, r))
            .collect::<Result<Vec<_>, _>>()?;
        self.tables
            .write()
            .entry((source, target))
            .or_default()
            .extend(compiled);
        Ok(())
    }

    pub fn supports(&self, source: Dialect, target: Dialect) -> bool {
        source == target || self.tables.read().contains_key(&(source, target))
    }
}

impl Default for RuleTableTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlTranslator for RuleTableTranslator {
    fn translate(
        &self,
        sql: &str,
        source: Dialect,
        target: Dialect,
    ) -> Result<String, TranslateError> {
        if source == target {
            return Ok(sql.to_string());
        }

        let tables = self.tables.read();
        let Some(rules) = tables.get(&(source, target)) else {
            tracing::warn!(
                source = %source,
                target = %target,
                "No translation rules for dialect pair, passing SQL through"
            );
            return Ok(sql.to_string());
        };

        Ok(rules
            .iter()
            .fold(sql.to_string(), |acc, rule| rule.apply(&acc)))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TranslateError {
    #[error("Unknown SQL dialect: {0}")]
    UnknownDialect(String),

    #[error("Invalid rewrite pattern '{pattern}': {reason}")]
    InvalidRule { pattern: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_parsing_and_inference() {
        assert_eq!("Postgres".parse::<Dialect>().unwrap(), Dialect::Postgresql);
        assert_eq!(
            Dialect::from_uri("postgresql://u@h:5432/db"),
            Some(Dialect::Postgresql)
        );
        assert_eq!(Dialect::from_uri("mysql://root@localhost/app"), Some(Dialect::Mysql));
        assert_eq!(Dialect::from_uri("sqlserver://h/db"), Some(Dialect::Mssql));
        assert_eq!(Dialect::from_uri("postgresql+psycopg2://h/db"), Some(Dialect::Postgresql));
        assert_eq!(Dialect::from_uri("duckdb://file"), None);
        assert_eq!(Dialect::from_uri("no-scheme"), None);
        assert!("db2".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_mysql_to_postgres() {
        let t = RuleTableTranslator::new();
        let sql = "SELECT `id`, IFNULL(`name`, 'x') FROM `users` LIMIT 10, 20";
        let out = t.translate(sql, Dialect::Mysql, Dialect::Postgresql).unwrap();
        assert_eq!(
            out,
            r#"SELECT "id", COALESCE("name", 'x') FROM "users" LIMIT 20 OFFSET 10"#
        );

        let ddl = "CREATE TABLE t (id INT NOT NULL AUTO_INCREMENT, body longtext) ENGINE=InnoDB";
        let out = t.translate(ddl, Dialect::Mysql, Dialect::Postgresql).unwrap();
        assert_eq!(out, "CREATE TABLE t (id SERIAL NOT NULL, body TEXT)");
    }

    #[test]
    fn test_postgres_to_mysql() {
        let t = RuleTableTranslator::new();
        let sql = r#"SELECT "id"::text FROM "users" LIMIT 5 OFFSET 15"#;
        let out = t.translate(sql, Dialect::Postgresql, Dialect::Mysql).unwrap();
        assert_eq!(out, "SELECT `id` FROM `users` LIMIT 15, 5");

        let ddl = "CREATE TABLE t (id BIGSERIAL, note TEXT)";
        let out = t.translate(ddl, Dialect::Postgresql, Dialect::Mysql).unwrap();
        assert_eq!(out, "CREATE TABLE t (id BIGINT AUTO_INCREMENT, note LONGTEXT)");
    }

    #[test]
    fn test_identity_and_unknown_pairs() {
        let t = RuleTableTranslator::new();
        let sql = "SELECT `a` FROM t LIMIT 1, 2";
        assert_eq!(t.translate(sql, Dialect::Mysql, Dialect::Mysql).unwrap(), sql);
        assert_eq!(t.translate(sql, Dialect::Oracle, Dialect::Mssql).unwrap(), sql);
        assert!(!t.supports(Dialect::Oracle, Dialect::Mssql));
        assert!(t.supports(Dialect::Mysql, Dialect::Snowflake));
    }

    #[test]
    fn test_register_custom_rules() {
        let t = RuleTableTranslator::empty();
        t.register(Dialect::Mysql, Dialect::Clickhouse, &[(r"\bUNSIGNED\b", "")])
            .unwrap();
        let out = t
            .translate("a INT unsigned", Dialect::Mysql, Dialect::Clickhouse)
            .unwrap();
        assert_eq!(out, "a INT ");

        let err = t
            .register(Dialect::Mysql, Dialect::Oracle, &[("(unclosed", "")])
            .unwrap_err();
        assert!(matches!(err, TranslateError::InvalidRule { .. }));
        assert!(!t.supports(Dialect::Mysql, Dialect::Oracle));
    }
}
