//! Detection of an extra wrapping module around the old layout
//!
//! Old states are sometimes created from a root module that wraps the whole
//! deployment (`module.wrapper.module.networking...`). Rules are written for
//! the unwrapped layout, so the wrapper is stripped before rule matching.

/// Find the wrapping module, if any
///
/// Looks for `module.X.module.Y` where `Y` is a known top-level module. When
/// `X == Y` the module merely contains a submodule of the same name
/// (`module.eks.module.eks`) and the scan moves on.
pub fn detect<S: AsRef<str>>(addresses: &[S], top_level_modules: &[String]) -> Option<String> {
    for address in addresses {
        let Some(rest) = address.as_ref().strip_prefix("module.") else {
            continue;
        };
        let Some((wrapper, inner)) = rest.split_once('.') else {
            continue;
        };
        let Some(inner) = inner.strip_prefix("module.") else {
            continue;
        };

        let Some(module_name) = top_level_modules.iter().find(|name| {
            inner
                .strip_prefix(name.as_str())
                .is_some_and(|after| after.starts_with('.') || after.starts_with('['))
        }) else {
            continue;
        };

        if wrapper == module_name.as_str() {
            continue;
        }

        return Some(format!("module.{}", wrapper));
    }

    None
}

/// Remove `prefix.` from the front of an address
pub fn strip<'a>(prefix: Option<&str>, address: &'a str) -> &'a str {
    let Some(prefix) = prefix else {
        return address;
    };

    address
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(address)
}
