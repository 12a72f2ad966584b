/// Normalizes user-supplied fields before validation.
pub trait Sanitize {
    fn sanitize(&mut self);
}

/// Trims surrounding whitespace in place without reallocating when clean.
pub fn trim_in_place(value: &mut String) {
    let trimmed = value.trim();
    if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
}

pub fn trim_opt_in_place(value: &mut Option<String>) {
    if let Some(v) = value.as_mut() {
        trim_in_place(v);
    }
}
