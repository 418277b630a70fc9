//! Flat-JSON field extraction by linear scan.
//!
//! The documents on both wire directions come from cooperating services with
//! a fixed, one-level key/scalar schema, so this module trades robustness for
//! size: keys are located by substring search and values read up to the next
//! delimiter. Known limitation: a string value that itself contains quotes or
//! braces will misparse. No nesting, no escape handling.

/// Finds `"key"` and returns the next quoted run after the following `:`.
/// `None` when the key is absent or no quoted value follows.
pub fn string_field<'a>(doc: &'a str, key: &str) -> Option<&'a str> {
    let rest = after_colon(doc, key)?;
    let start = rest.find('"')? + 1;
    let len = rest[start..].find('"')?;
    Some(&rest[start..start + len])
}

/// Decimal integer value for `key`, tolerant of a stray leading quote.
/// Returns `default` when the key is absent or no digits follow.
pub fn int_field(doc: &str, key: &str, default: i64) -> i64 {
    let Some(rest) = after_colon(doc, key) else {
        return default;
    };
    let rest = rest.trim_start_matches([' ', '\t', '\r', '\n']);
    let rest = rest.strip_prefix('"').unwrap_or(rest);

    let (rest, negative) = match rest.strip_prefix('-') {
        Some(stripped) => (stripped, true),
        None => (rest, false),
    };
    let digits = rest
        .find(|c: char| !c.is_ascii_digit())
        .map_or(rest, |end| &rest[..end]);
    match digits.parse::<i64>() {
        Ok(value) if negative => -value,
        Ok(value) => value,
        Err(_) => default,
    }
}

/// Boolean value for `key`: accepts `true`/`false`/`1`/`0`.
pub fn bool_field(doc: &str, key: &str, default: bool) -> bool {
    let Some(rest) = after_colon(doc, key) else {
        return default;
    };
    let rest = rest.trim_start_matches([' ', '\t', '\r', '\n', '"']);
    if rest.starts_with("true") || rest.starts_with('1') {
        true
    } else if rest.starts_with("false") || rest.starts_with('0') {
        false
    } else {
        default
    }
}

/// Locates the array value of `key` and yields each `{...}` span inside it,
/// first `{` to the first following `}`. Spans past the closing `]` are not
/// produced. Used for the schedule list; objects must themselves be flat.
pub fn array_objects<'a>(doc: &'a str, key: &str) -> Vec<&'a str> {
    let mut objects = Vec::new();
    let Some(rest) = after_key(doc, key) else {
        return objects;
    };
    let Some(open) = rest.find('[') else {
        return objects;
    };
    let mut scan = &rest[open + 1..];

    loop {
        let Some(obj_start) = scan.find('{') else {
            break;
        };
        let Some(obj_len) = scan[obj_start..].find('}') else {
            break;
        };
        if let Some(array_end) = scan.find(']') {
            if array_end < obj_start {
                break;
            }
        }
        objects.push(&scan[obj_start..=obj_start + obj_len]);
        scan = &scan[obj_start + obj_len + 1..];
    }
    objects
}

fn after_key<'a>(doc: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("\"{key}\"");
    let pos = doc.find(&needle)?;
    Some(&doc[pos + needle.len()..])
}

fn after_colon<'a>(doc: &'a str, key: &str) -> Option<&'a str> {
    let rest = after_key(doc, key)?;
    let colon = rest.find(':')?;
    Some(&rest[colon + 1..])
}
