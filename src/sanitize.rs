//! Identifier normalisation for destination columns and tables.
//!
//! Both pipelines transliterate to ASCII, trim, uppercase, swap reserved words
//! for a synonym, squash every run of non-alphanumerics into one `_` and prefix
//! a leading digit with `A`. Column names additionally spell `#` as `NO`.
//!
//! The output alphabet is `[A-Z0-9_]` and both functions are idempotent. No
//! reserved word contains `_` or `NO`, so the later steps can never produce a
//! reserved word, and every synonym is already in normal form.

use std::sync::LazyLock;

use regex::Regex;

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]+").expect("static pattern"));
static REPEATED_UNDERSCORE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_{2,}").expect("static pattern"));
static LEADING_DIGIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d)").expect("static pattern"));

/// Reserved words shared by the supported backends and the synonym used in
/// their place.
const RESERVED_WORDS: &[(&str, &str)] = &[
    ("ACCESS", "ACCESS_"),
    ("ADD", "ADD_"),
    ("ALL", "ALL_"),
    ("ALTER", "ALTER_"),
    ("AND", "AND_"),
    ("ANY", "ANY_"),
    ("AS", "AS_"),
    ("ASC", "ASC_"),
    ("AUDIT", "AUDIT_"),
    ("BETWEEN", "BETWEEN_"),
    ("BY", "BY_"),
    ("CASE", "CASE_"),
    ("CHAR", "CHAR_"),
    ("CHECK", "CHECK_"),
    ("CLUSTER", "CLUSTER_"),
    ("COLUMN", "COLUMN_"),
    ("COMMENT", "COMMENT_"),
    ("COMPRESS", "COMPRESS_"),
    ("CONNECT", "CONNECT_"),
    ("CONSTRAINT", "CONSTRAINT_"),
    ("CREATE", "CREATE_"),
    ("CROSS", "CROSS_"),
    ("CURRENT", "CURRENT_"),
    ("DATABASE", "DATABASE_"),
    ("DATE", "DATE_"),
    ("DECIMAL", "DECIMAL_"),
    ("DEFAULT", "DEFAULT_"),
    ("DELETE", "DELETE_"),
    ("DESC", "DESC_"),
    ("DISTINCT", "DISTINCT_"),
    ("DROP", "DROP_"),
    ("ELSE", "ELSE_"),
    ("END", "END_"),
    ("EXCLUSIVE", "EXCLUSIVE_"),
    ("EXISTS", "EXISTS_"),
    ("FILE", "FILE_"),
    ("FLOAT", "FLOAT_"),
    ("FOR", "FOR_"),
    ("FOREIGN", "FOREIGN_"),
    ("FROM", "FROM_"),
    ("FULL", "FULL_"),
    ("GRANT", "GRANT_"),
    ("GROUP", "GROUP_"),
    ("HAVING", "HAVING_"),
    ("IDENTIFIED", "IDENTIFIED_"),
    ("IMMEDIATE", "IMMEDIATE_"),
    ("IN", "IN_"),
    ("INCREMENT", "INCREMENT_"),
    ("INDEX", "INDEX_"),
    ("INITIAL", "INITIAL_"),
    ("INNER", "INNER_"),
    ("INSERT", "INSERT_"),
    ("INTEGER", "INTEGER_"),
    ("INTERSECT", "INTERSECT_"),
    ("INTO", "INTO_"),
    ("IS", "IS_"),
    ("JOIN", "JOIN_"),
    ("KEY", "KEY_"),
    ("LEFT", "LEFT_"),
    ("LEVEL", "LEVEL_"),
    ("LIKE", "LIKE_"),
    ("LIMIT", "LIMIT_"),
    ("LOCK", "LOCK_"),
    ("LONG", "LONG_"),
    ("MAXEXTENTS", "MAXEXTENTS_"),
    ("MINUS", "MINUS_"),
    ("MLSLABEL", "MLSLABEL_"),
    ("MODE", "MODE_"),
    ("MODIFY", "MODIFY_"),
    ("NULL", "NULL_"),
    ("NUMBER", "NUMBER_"),
    ("OF", "OF_"),
    ("OFFLINE", "OFFLINE_"),
    ("ON", "ON_"),
    ("ONLINE", "ONLINE_"),
    ("OPTION", "OPTION_"),
    ("OR", "OR_"),
    ("ORDER", "ORDER_"),
    ("OUTER", "OUTER_"),
    ("PCTFREE", "PCTFREE_"),
    ("PRIMARY", "PRIMARY_"),
    ("PRIOR", "PRIOR_"),
    ("PRIVILEGES", "PRIVILEGES_"),
    ("PUBLIC", "PUBLIC_"),
    ("RAW", "RAW_"),
    ("REFERENCES", "REFERENCES_"),
    ("RENAME", "RENAME_"),
    ("RESOURCE", "RESOURCE_"),
    ("REVOKE", "REVOKE_"),
    ("RIGHT", "RIGHT_"),
    ("ROW", "ROW_"),
    ("ROWID", "ROWID_"),
    ("ROWNUM", "ROWNUM_"),
    ("ROWS", "ROWS_"),
    ("SELECT", "SELECT_"),
    ("SESSION", "SESSION_"),
    ("SET", "SET_"),
    ("SHARE", "SHARE_"),
    ("SIZE", "SIZE_"),
    ("SMALLINT", "SMALLINT_"),
    ("START", "START_"),
    ("SUCCESSFUL", "SUCCESSFUL_"),
    ("SYSDATE", "SYSDATE_"),
    ("TABLE", "TABLE_"),
    ("THEN", "THEN_"),
    ("TO", "TO_"),
    ("TRIGGER", "TRIGGER_"),
    ("TRUNCATE", "TRUNCATE_"),
    ("UID", "UID_"),
    ("UNION", "UNION_"),
    ("UNIQUE", "UNIQUE_"),
    ("UPDATE", "UPDATE_"),
    ("USER", "USER_"),
    ("USING", "USING_"),
    ("VALIDATE", "VALIDATE_"),
    ("VALUES", "VALUES_"),
    ("VARCHAR", "VARCHAR_"),
    ("VARCHAR2", "VARCHAR2_"),
    ("VIEW", "VIEW_"),
    ("WHEN", "WHEN_"),
    ("WHENEVER", "WHENEVER_"),
    ("WHERE", "WHERE_"),
    ("WITH", "WITH_"),
];

pub fn sanitize_column_name(raw: &str) -> String {
    sanitize(raw, true)
}

pub fn sanitize_table_name(raw: &str) -> String {
    sanitize(raw, false)
}

fn sanitize(raw: &str, spell_hash: bool) -> String {
    let mut name = deunicode::deunicode(raw).trim().to_uppercase();
    if let Some(synonym) = reserved_synonym(&name) {
        name = synonym.to_string();
    }
    if spell_hash {
        name = name.replace('#', "NO");
    }
    let name = NON_ALPHANUMERIC.replace_all(&name, "_");
    let name = REPEATED_UNDERSCORE.replace_all(&name, "_");
    LEADING_DIGIT.replace(&name, "A$1").into_owned()
}

fn reserved_synonym(name: &str) -> Option<&'static str> {
    RESERVED_WORDS
        .binary_search_by(|(word, _)| (*word).cmp(name))
        .ok()
        .map(|index| RESERVED_WORDS[index].1)
}
