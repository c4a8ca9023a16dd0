/// String utility functions used by settings parsing and log formatting.
pub struct StringUtil;

impl StringUtil {
    /// Convert a string to a boolean.
    ///
    /// Valid true values: `"1"`, `"true"`, `"$true"` (case-insensitive).
    /// Valid false values: `"0"`, `"false"`, `"$false"` (case-insensitive).
    /// Returns `None` for unrecognized values.
    pub fn convert_to_bool(value: &str) -> Option<bool> {
        if value.is_empty() {
            return None;
        }
        match value.trim().to_lowercase().as_str() {
            "1" | "true" | "$true" => Some(true),
            "0" | "false" | "$false" => Some(false),
            _ => None,
        }
    }

    /// Split a comma-separated list, trimming entries and dropping empties.
    pub fn split_list(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Truncate `input` to at most `max_chars` characters, appending `...`
    /// when anything was cut.
    pub fn truncate(input: &str, max_chars: usize) -> String {
        match input.char_indices().nth(max_chars) {
            Some((idx, _)) => format!("{}...", &input[..idx]),
            None => input.to_string(),
        }
    }
}
