// Property File Parser
// Parses simple `KEY = value` configuration files

use crate::log_warning;
use crate::logging::LogModule;

/// Parse property-file text, invoking `handler` for each key-value pair
///
/// Key case is preserved. Text after `#` is a comment, both on its own line
/// and trailing a value. Lines without `=` are skipped with a warning.
/// `prefix`, when given, is prepended to every key.
pub fn parse_propfile(data: &str, handler: &mut dyn FnMut(&str, &str), prefix: Option<&str>) {
    for (lineno, raw) in data.lines().enumerate() {
        let line = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            log_warning!(LogModule::Config, "Key without value on line {}", lineno + 1);
            continue;
        };

        let key = key.trim();
        if key.is_empty() {
            log_warning!(LogModule::Config, "Value without key on line {}", lineno + 1);
            continue;
        }
        let value = value.trim();

        match prefix {
            Some(pfx) => handler(&format!("{}{}", pfx, key), value),
            None => handler(key, value),
        }
    }
}
