//! Deterministic names for generated trigger functions and triggers.

/// Maximum length of a PostgreSQL identifier.
pub const PG_IDENT_MAX: usize = 63;

/// Prefix used when none (or an unusable one) is configured.
pub const DEFAULT_NAME_PREFIX: &str = "tw";

const MAX_PREFIX_LEN: usize = 7;
const MAX_HASH_LEN: usize = 24;

/// Both generated identifiers share this budget, so the pair fits in one
/// identifier's worth of characters.
const PER_NAME_MAX: usize = PG_IDENT_MAX / 2;

/// The function/trigger pair generated for one constraint on one table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TriggerNames {
    pub function: String,
    pub trigger: String,
}

/// Derive the function and trigger names for `constraint_name` on `table`
/// using the default prefix.
///
/// # Example
/// ```
/// let names = tripwire_sql::derive_names("1", "test_app_author");
/// assert!(names.function.starts_with("tw_fn_"));
/// assert!(names.trigger.starts_with("tw_tg_"));
/// assert_eq!(names.function.len(), 30);
/// ```
pub fn derive_names(constraint_name: &str, table: &str) -> TriggerNames {
    trigger_names(DEFAULT_NAME_PREFIX, constraint_name, table)
}

/// Derive the function and trigger names with a custom prefix.
///
/// The prefix is reduced to lowercase ASCII alphanumerics and underscores and
/// cut to seven characters. The hash input separates name and table with a
/// NUL so that `("ab", "c")` and `("a", "bc")` differ.
pub fn trigger_names(prefix: &str, constraint_name: &str, table: &str) -> TriggerNames {
    let prefix = sanitize_prefix(prefix);

    let mut hasher = blake3::Hasher::new();
    hasher.update(constraint_name.as_bytes());
    hasher.update(&[0]);
    hasher.update(table.as_bytes());
    let hex = hasher.finalize().to_hex().to_string();

    let overhead = prefix.len() + "_fn_".len();
    let hash_len = MAX_HASH_LEN.min(PER_NAME_MAX.saturating_sub(overhead));
    let digest = &hex[..hash_len];

    TriggerNames {
        function: format!("{prefix}_fn_{digest}"),
        trigger: format!("{prefix}_tg_{digest}"),
    }
}

fn sanitize_prefix(prefix: &str) -> String {
    let cleaned: String = prefix
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .map(|c| c.to_ascii_lowercase())
        .take(MAX_PREFIX_LEN)
        .collect();
    if cleaned.is_empty() {
        DEFAULT_NAME_PREFIX.to_string()
    } else {
        cleaned
    }
}
