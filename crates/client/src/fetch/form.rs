//! Request field preparation.
//!
//! Node applications read form input under either a `field_` or a `var_`
//! prefix, so bare keys are sent under both.

use crate::transport::FormFields;

const FIELD_PREFIX: &str = "field_";
const VAR_PREFIX: &str = "var_";

/// Expand bare keys to `field_<k>` and `var_<k>`; prefixed keys pass through.
pub fn prefix_fields(fields: &FormFields) -> FormFields {
    let mut out = FormFields::new();
    for (key, value) in fields {
        if key.starts_with(FIELD_PREFIX) || key.starts_with(VAR_PREFIX) {
            out.insert(key.clone(), value.clone());
        } else {
            out.insert(format!("{FIELD_PREFIX}{key}"), value.clone());
            out.insert(format!("{VAR_PREFIX}{key}"), value.clone());
        }
    }
    out
}

/// Request data for a call: prefixed caller fields merged with unprefixed session fields.
///
/// Session fields win on key collisions. Returns `None` when there is nothing to send.
pub fn request_data(fields: Option<&FormFields>, session: &FormFields) -> Option<FormFields> {
    let mut data = fields.map(prefix_fields).unwrap_or_default();
    data.extend(session.iter().map(|(k, v)| (k.clone(), v.clone())));
    (!data.is_empty()).then_some(data)
}
