//! Field lookups (`age__gte`, `name__icontains`, ...).

/// A comparison applied to a field by a `__<lookup>` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Exact,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    IsNull,
    Contains,
    IContains,
    StartsWith,
    EndsWith,
    Range,
}

impl Lookup {
    pub fn parse(name: &str) -> Option<Lookup> {
        Some(match name {
            "exact" => Lookup::Exact,
            "gt" => Lookup::Gt,
            "gte" => Lookup::Gte,
            "lt" => Lookup::Lt,
            "lte" => Lookup::Lte,
            "in" => Lookup::In,
            "isnull" => Lookup::IsNull,
            "contains" => Lookup::Contains,
            "icontains" => Lookup::IContains,
            "startswith" => Lookup::StartsWith,
            "endswith" => Lookup::EndsWith,
            "range" => Lookup::Range,
            _ => return None,
        })
    }

    /// LIKE pattern for a pattern lookup, with `%`, `_` and `\` in the
    /// needle escaped.
    pub fn like_pattern(self, needle: &str) -> Option<String> {
        let escaped = escape_like(needle);
        match self {
            Lookup::Contains | Lookup::IContains => Some(format!("%{escaped}%")),
            Lookup::StartsWith => Some(format!("{escaped}%")),
            Lookup::EndsWith => Some(format!("%{escaped}")),
            _ => None,
        }
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
