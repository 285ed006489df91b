//! Column-name based PII masking. Values are never inspected to decide
//! whether a column is sensitive.

use crate::execution::{Cell, Record};
use regex::Regex;

pub const MASK_TOKEN: &str = "***";

lazy_static::lazy_static! {
    static ref PII_COLUMN: Regex = Regex::new(r"(?i)email|phone|mobile|ssn|tax").unwrap();
}

pub fn is_pii_column(name: &str) -> bool {
    PII_COLUMN.is_match(name)
}

/// Keep the first and last two characters; four or fewer become all `*`.
pub fn mask_string(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}{}{}", head, MASK_TOKEN, tail)
}

fn mask_cell(cell: &Cell) -> Cell {
    match cell {
        Cell::Text(s) => Cell::Text(mask_string(s)),
        Cell::Null | Cell::Bool(false) => cell.clone(),
        _ => Cell::text(MASK_TOKEN),
    }
}

pub fn mask_pii(rows: &mut [Record]) {
    for row in rows.iter_mut() {
        for (name, cell) in row.iter_mut() {
            if is_pii_column(name) {
                *cell = mask_cell(cell);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_string_shapes() {
        assert_eq!(mask_string("ab@cd.comx"), "ab***mx");
        assert_eq!(mask_string("abcd"), "****");
        assert_eq!(mask_string(""), "");
        assert_eq!(mask_string("héllo"), "hé***lo");
    }

    #[test]
    fn test_masking_is_stable_for_fixed_shape() {
        let once = mask_string("jane@x.org");
        assert_eq!(once, "ja***rg");
        assert_eq!(mask_string(&once), once);
    }

    #[test]
    fn test_mask_by_column_name_only() {
        let mut row = Record::new();
        row.insert("Work_Email".into(), Cell::text("someone@example.com"));
        row.insert("phone_number".into(), Cell::from(5551234));
        row.insert("tax_exempt".into(), Cell::Bool(false));
        row.insert("ssn".into(), Cell::Null);
        row.insert("notes".into(), Cell::text("call 555-1234"));
        let mut rows = vec![row];
        mask_pii(&mut rows);

        let row = &rows[0];
        assert_eq!(row["Work_Email"], Cell::text("so***om"));
        assert_eq!(row["phone_number"], Cell::text("***"));
        assert_eq!(row["tax_exempt"], Cell::Bool(false));
        assert_eq!(row["ssn"], Cell::Null);
        assert_eq!(row["notes"], Cell::text("call 555-1234"));
    }
}
