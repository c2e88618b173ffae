use doclist_core::domain::*;
use proptest::prelude::*;

fn identifier() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_]{0,15}"
}

fn direction() -> impl Strategy<Value = Option<&'static str>> {
    prop_oneof![
        Just(None),
        Just(Some("asc")),
        Just(Some("desc")),
        Just(Some("ASC")),
        Just(Some("Desc")),
    ]
}

proptest! {
    #[test]
    fn order_by_preserves_declaration_order(
        decls in prop::collection::vec((identifier(), direction()), 1..6)
    ) {
        let raw = decls
            .iter()
            .map(|(field, dir)| match dir {
                Some(dir) => format!("{} {}", field, dir),
                None => field.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ");

        let clauses = parse_order_by(&raw);
        prop_assert_eq!(clauses.len(), decls.len());

        for (clause, (field, dir)) in clauses.iter().zip(decls.iter()) {
            prop_assert_eq!(&clause.field, field);
            let expected = match dir.map(|d| d.to_lowercase()) {
                Some(d) if d == "desc" => OrderDirection::Desc,
                _ => OrderDirection::Asc,
            };
            prop_assert_eq!(&clause.direction, &expected);
            prop_assert!(validate_order_clause(clause).is_ok());
        }
    }

    #[test]
    fn order_by_never_panics(raw in ".{0,64}") {
        let _ = parse_order_by(&raw);
    }
}

#[test]
fn test_order_clauses_apply_in_sequence() {
    let doctype = Doctype::new("Note").unwrap();
    let query = parse_order_by("field1 asc, field2")
        .into_iter()
        .fold(ListQuery::new(doctype), |query, clause| {
            query.order_by(clause.field, clause.direction)
        });

    assert_eq!(
        query.order(),
        &[OrderClause::asc("field1"), OrderClause::asc("field2")]
    );
}
