/// Replaces every `{name}` in `template` with its value. Unknown placeholders are left as-is.
pub fn render(template: &str, values: &[(&str, String)]) -> String {
    values
        .iter()
        .fold(template.to_string(), |text, (name, value)| {
            text.replace(&format!("{{{name}}}"), value)
        })
}

/// Quota amount as shown to users.
pub fn display_amount(value: f64) -> String {
    format!("{value:.2}")
}
