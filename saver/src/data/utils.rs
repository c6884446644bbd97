use super::Error;

/// Return `name` if it can be used as a single path component.
pub fn check_name(name: &str) -> Result<&str, Error> {
    match name {
        "" | "." | ".." => Err(Error::InvalidName(name.to_owned())),
        _ if name.contains(['/', '\\', '\0']) => Err(Error::InvalidName(name.to_owned())),
        _ => Ok(name),
    }
}

/// Quote a CSV field when required, doubling inner quotes.
pub fn escape_field(field: String) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field
    }
}
