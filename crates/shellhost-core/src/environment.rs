//! Environment variable merging and substitution.
//!
//! Scope variables overlay system variables; each scope value has its
//! embedded references resolved against the table as it stands at that
//! point, so later entries see earlier overrides. Three reference
//! syntaxes are supported (for a variable FOO):
//!
//! 1. `$FOO`   - POSIX shells; the longest identifier run after `$`
//! 2. `${FOO}` - POSIX shells, for forms like `${FOO}bar`
//! 3. `%FOO%`  - Windows command interpreter, case-insensitive lookup

use shellhost_types::HostOs;
use std::collections::HashMap;

/// One `NAME=VALUE` assignment.
pub type EnvEntry = (String, String);

/// Merge scope variables over system variables, substituting embedded
/// references in scope values. Pure and deterministic; callers compare
/// the output as a set of assignments, not an ordered array.
pub fn merge(system: &[EnvEntry], scope: &[EnvEntry], host: HostOs) -> Vec<EnvEntry> {
    // An empty side short-circuits to the other, verbatim.
    if scope.is_empty() {
        return system.to_vec();
    }
    if system.is_empty() {
        return scope.to_vec();
    }

    let mut order: Vec<String> = Vec::new();
    let mut table: HashMap<String, String> = HashMap::new();
    for (name, value) in system {
        if !table.contains_key(name) {
            order.push(name.clone());
        }
        table.insert(name.clone(), value.clone());
    }

    for (name, value) in scope {
        let resolved = substitute(value, &table, host);
        if !table.contains_key(name) {
            order.push(name.clone());
        }
        table.insert(name.clone(), resolved);
    }

    order
        .into_iter()
        .map(|name| {
            let value = table.get(&name).cloned().unwrap_or_default();
            (name, value)
        })
        .collect()
}

/// Resolve embedded variable references in `value` against `table`.
/// Unresolved references substitute the empty string. Double-quoted
/// regions are copied verbatim.
pub fn substitute(value: &str, table: &HashMap<String, String>, host: HostOs) -> String {
    let chars: Vec<char> = value.chars().collect();
    let mut out = String::with_capacity(value.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '"' {
            // Copy the quoted region through, including both quotes.
            out.push(c);
            i += 1;
            while i < chars.len() {
                out.push(chars[i]);
                if chars[i] == '"' {
                    break;
                }
                i += 1;
            }
            i += 1;
        } else if c == '$' && !host.is_windows() {
            if i + 1 < chars.len() && chars[i + 1] == '{' {
                if let Some(close) = chars[i + 2..].iter().position(|&c| c == '}') {
                    let name: String = chars[i + 2..i + 2 + close].iter().collect();
                    out.push_str(&lookup(&name, table, true));
                    i += close + 3;
                } else {
                    // No closing brace; keep the text as-is.
                    out.push(c);
                    i += 1;
                }
            } else if i + 1 < chars.len() && is_ident_start(chars[i + 1]) {
                let mut end = i + 1;
                while end < chars.len() && is_ident_part(chars[end]) {
                    end += 1;
                }
                let name: String = chars[i + 1..end].iter().collect();
                out.push_str(&lookup(&name, table, true));
                i = end;
            } else {
                out.push(c);
                i += 1;
            }
        } else if c == '%' && host.is_windows() {
            if let Some(close) = chars[i + 1..].iter().position(|&c| c == '%') {
                let name: String = chars[i + 1..i + 1 + close].iter().collect();
                out.push_str(&lookup(&name, table, false));
                i += close + 2;
            } else {
                out.push(c);
                i += 1;
            }
        } else {
            out.push(c);
            i += 1;
        }
    }

    out
}

/// Force session-scoped variables after merging: TTY sessions get a
/// parseable prompt format and a fixed column width; constrained-charset
/// hosts get their stdio compatibility set last, unconditionally.
pub fn apply_session_vars(vars: &mut Vec<EnvEntry>, host: HostOs, is_tty: bool) {
    if is_tty {
        set_var(vars, "PS1", "$PWD/>");
        set_var(vars, "COLUMNS", "256");
    }
    if host.is_constrained_charset() {
        set_var(vars, "QIBM_JAVA_STDIO_CONVERT", "Y");
        set_var(vars, "QIBM_USE_DESCRIPTOR_STDIO", "I");
        set_var(vars, "PASE_STDIO_ISATTY", "N");
        set_var(vars, "TERMINAL_TYPE", "REMOTE");
        set_var(vars, "STDIO_ISATTY", "Y");
    }
}

/// Find the value of `name` in a variable list.
pub fn get_var<'a>(vars: &'a [EnvEntry], name: &str) -> Option<&'a str> {
    vars.iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

fn set_var(vars: &mut Vec<EnvEntry>, name: &str, value: &str) {
    if let Some(entry) = vars.iter_mut().find(|(n, _)| n == name) {
        entry.1 = value.to_string();
    } else {
        vars.push((name.to_string(), value.to_string()));
    }
}

fn lookup(name: &str, table: &HashMap<String, String>, case_sensitive: bool) -> String {
    if case_sensitive {
        table.get(name).cloned().unwrap_or_default()
    } else {
        let upper = name.to_uppercase();
        table
            .iter()
            .find(|(k, _)| k.to_uppercase() == upper)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
