/// Ordered header list. Order and casing are preserved as inserted.
pub type Headers = Vec<(String, String)>;

pub fn header_set(headers: &mut Headers, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = value.into();
    if let Some((_, v)) = headers
        .iter_mut()
        .find(|(k, _)| k.eq_ignore_ascii_case(&name))
    {
        *v = value;
        return;
    }
    headers.push((name, value));
}

pub fn header_get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub fn header_remove(headers: &mut Headers, name: &str) -> Option<String> {
    let idx = headers
        .iter()
        .position(|(k, _)| k.eq_ignore_ascii_case(name))?;
    Some(headers.remove(idx).1)
}
