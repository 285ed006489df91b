use nlq_engine::execution::Cell;
use nlq_engine::result::{columnar_to_rows, mask_string, rows_to_columnar, ColumnPrimitive};
use nlq_engine::{Dialect, GuardOptions, GuardViolation, MetadataSnapshot, Record, SqlGuard};
use proptest::prelude::*;

const FORBIDDEN: [&str; 10] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "REINDEX", "ANALYZE",
    "VACUUM",
];

fn opts() -> GuardOptions {
    GuardOptions::for_dialect(Dialect::Postgres).with_allowed_schemas(["public"])
}

/// Randomly upper/lower-cases each letter.
fn mixed_case(word: &'static str) -> impl Strategy<Value = String> {
    proptest::collection::vec(any::<bool>(), word.len()).prop_map(move |flags| {
        word.chars()
            .zip(flags)
            .map(|(c, upper)| {
                if upper {
                    c.to_ascii_uppercase()
                } else {
                    c.to_ascii_lowercase()
                }
            })
            .collect()
    })
}

fn cell() -> impl Strategy<Value = Cell> {
    prop_oneof![
        Just(Cell::Null),
        any::<bool>().prop_map(Cell::Bool),
        any::<i64>().prop_map(Cell::from),
        "[a-z0-9 ]{0,12}".prop_map(Cell::text),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn forbidden_keywords_always_rejected(
        word in (0..FORBIDDEN.len()).prop_flat_map(|i| mixed_case(FORBIDDEN[i])),
        comment in prop_oneof![Just(""), Just("/* note */ "), Just("-- trailing\n")],
    ) {
        let meta = MetadataSnapshot::default();
        let sql = format!("SELECT id FROM public.t WHERE {}{} = 1", comment, word);
        let err = SqlGuard::new(&meta).validate_and_rewrite(&sql, &opts()).unwrap_err();
        prop_assert_eq!(err, GuardViolation::ForbiddenKeyword(word.to_ascii_uppercase()));
    }

    #[test]
    fn non_select_always_rejected(lead in "(?i)(show|explain|set|values|table|begin|merge)") {
        let meta = MetadataSnapshot::default();
        let sql = format!("{} x", lead);
        let err = SqlGuard::new(&meta).validate_and_rewrite(&sql, &opts()).unwrap_err();
        prop_assert_eq!(err, GuardViolation::NotSelect);
    }

    #[test]
    fn foreign_schema_is_named(
        schema in "s_[a-z]{1,8}",
        shape in prop_oneof![
            Just("SELECT * FROM {}.t"),
            Just("SELECT * FROM public.a x, {}.t y"),
            Just("SELECT * FROM public.a, public.b, {}.t"),
            Just("SELECT * FROM ONLY {}.t"),
            Just("SELECT * FROM public.a x, LATERAL {}.f(x.id) y"),
            Just("SELECT id FROM public.a WHERE id IN (SELECT a_id FROM {}.t)"),
            Just("SELECT id FROM public.a WHERE EXISTS (SELECT 1 FROM public.b, ONLY {}.t)"),
        ],
    ) {
        let meta = MetadataSnapshot::default();
        let sql = shape.replace("{}", &schema);
        let err = SqlGuard::new(&meta).validate_and_rewrite(&sql, &opts()).unwrap_err();
        prop_assert_eq!(err, GuardViolation::SchemaNotAllowed(vec![schema]));
    }

    #[test]
    fn limit_appended_or_kept(col in "c_[a-z]{1,6}", limit in proptest::option::of(1u32..1000)) {
        let meta = MetadataSnapshot::default();
        let base = format!("SELECT {} FROM public.t", col);
        let out = match limit {
            Some(n) => {
                let sql = format!("{} LIMIT {}", base, n);
                let out = SqlGuard::new(&meta).validate_and_rewrite(&sql, &opts()).unwrap();
                prop_assert_eq!(&out, &sql);
                out
            }
            None => SqlGuard::new(&meta).validate_and_rewrite(&base, &opts()).unwrap(),
        };
        prop_assert!(out.contains(" LIMIT "));
        if limit.is_none() {
            prop_assert!(out.ends_with("LIMIT 101"));
        }
    }

    #[test]
    fn columnar_round_trip(rows in proptest::collection::vec(
        proptest::collection::vec(cell(), 3),
        0..20,
    )) {
        let records: Vec<Record> = rows
            .into_iter()
            .map(|cells| {
                cells
                    .into_iter()
                    .enumerate()
                    .map(|(i, c)| (format!("col{}", i), c))
                    .collect()
            })
            .collect();
        let table = rows_to_columnar(&records);
        let back = columnar_to_rows(&table);
        prop_assert_eq!(back.len(), records.len());
        for (original, reread) in records.iter().zip(&back) {
            for (name, cell) in original {
                let expected = match cell {
                    Cell::Null => ColumnPrimitive::Null,
                    Cell::Bool(b) => ColumnPrimitive::Bool(*b),
                    Cell::Number(n) => ColumnPrimitive::Number(n.clone()),
                    Cell::Text(s) => ColumnPrimitive::Text(s.clone()),
                    other => panic!("unexpected cell {:?}", other),
                };
                prop_assert_eq!(&reread[name], &expected);
            }
        }
    }

    #[test]
    fn masking_keeps_shape(value in "[a-z@.]{5,40}") {
        let masked = mask_string(&value);
        prop_assert_eq!(masked.len(), 7);
        prop_assert!(masked.starts_with(&value[..2]));
        prop_assert!(masked.ends_with(&value[value.len() - 2..]));
        prop_assert_eq!(mask_string(&value), masked);
    }
}
