pub mod builder;
pub mod period;
pub mod templates;

pub use builder::{build_filters, sanitize_identifier, sanitize_string_value, validate_query, Query};
pub use period::{calculate_date_range, DateWindow, Periods};
pub use templates::QueryTemplate;

/// Column -> value filter mapping, kept in insertion order.
pub type Filters = serde_json::Map<String, serde_json::Value>;
