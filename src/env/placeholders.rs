use crate::env::EnvMap;

/// Replaces `{{name}}` placeholders with values from `vars`.
///
/// Unknown or malformed placeholders are copied through untouched so that a
/// request can still be sent and the server-side error explains itself.
/// `\{{` produces a literal `{{`.
pub fn expand_placeholders(input: &str, vars: &EnvMap) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("{{") {
        let escaped = rest[..start].ends_with('\\');
        if escaped {
            output.push_str(&rest[..start - 1]);
            output.push_str("{{");
            rest = &rest[start + 2..];
            continue;
        }

        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = after[..end].trim();
        match vars.get(key) {
            Some(value) if is_valid_key(key) => output.push_str(value),
            _ => output.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }

    output.push_str(rest);
    output
}

/// Merges globals and environment variables; environment values win.
pub fn build_variable_map(globals: &EnvMap, environment: &EnvMap) -> EnvMap {
    let mut vars = globals.clone();
    vars.extend(environment.iter().map(|(k, v)| (k.clone(), v.clone())));
    vars
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if is_start_char(c) => {}
        _ => return false,
    }

    for ch in chars {
        let valid = ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-' | '$');
        if !valid {
            return false;
        }
    }
    true
}

fn is_start_char(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '$'
}
