/// Leading decimal digits of a version component, e.g. `"3-beta"` is 3.
fn component(part: &str) -> Option<u64> {
    let digits: String = part.trim().chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Whether dotted version `new` is strictly newer than `old`.
///
/// Components are compared numerically, left to right; components that are
/// not numbers are skipped. When all shared components are equal, `new` is
/// newer only if one of its extra components is non-zero, so `"1.2.0"` is not
/// newer than `"1.2"`. Empty input is never newer.
pub fn is_newer(old: &str, new: &str) -> bool {
    let (old, new) = (old.trim(), new.trim());
    if old.is_empty() || new.is_empty() {
        return false;
    }

    let old: Vec<&str> = old.split('.').collect();
    let new: Vec<&str> = new.split('.').collect();

    for (o, n) in old.iter().zip(new.iter()) {
        match (component(o), component(n)) {
            (Some(o), Some(n)) if n > o => return true,
            (Some(o), Some(n)) if n < o => return false,
            _ => {}
        }
    }

    new.iter()
        .skip(old.len())
        .any(|part| component(part).is_some_and(|v| v > 0))
}

/// `daemon` is older than `required`.
pub fn is_older(daemon: &str, required: &str) -> bool {
    is_newer(daemon, required)
}
