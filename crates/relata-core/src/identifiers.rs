//! Naming helpers used to derive table names, relation keys and titles.

/// Converts a type or property name to `snake_case`.
///
/// `BlogPost` → `blog_post`, `HTTPRequest` → `http_request`, `team_id` → `team_id`.
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                None => false,
                Some(p) if p == '_' => false,
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(_) => next.is_some_and(char::is_lowercase),
            };
            if boundary {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Default table name for a model type: `{snake(name)}s`.
pub fn table_name(type_name: &str) -> String {
    format!("{}s", snake_case(type_name))
}

/// Default foreign key naming another type: `{snake(name)}_id`.
pub fn foreign_key(type_name: &str) -> String {
    format!("{}_id", snake_case(type_name))
}

/// Default pivot table for a many-to-many pair: both snake names, sorted,
/// joined by `_`. Symmetric in its arguments.
pub fn pivot_table(a: &str, b: &str) -> String {
    let (a, b) = (snake_case(a), snake_case(b));
    if a <= b {
        format!("{}_{}", a, b)
    } else {
        format!("{}_{}", b, a)
    }
}

/// Human title for a property: `first_name` → `First name`.
pub fn humanize(name: &str) -> String {
    let spaced = snake_case(name).replace('_', " ");
    let trimmed = spaced.trim_end_matches(" id").trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
