use crate::execution::Record;
use std::collections::HashMap;

/// Rename columns that have a unique business name; others keep their
/// technical name. Column order is preserved.
pub fn apply_business_names(rows: Vec<Record>, renames: &HashMap<String, String>) -> Vec<Record> {
    if renames.is_empty() {
        return rows;
    }
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .map(|(name, cell)| match renames.get(&name) {
                    Some(business) => (business.clone(), cell),
                    None => (name, cell),
                })
                .collect()
        })
        .collect()
}
