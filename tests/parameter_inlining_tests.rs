//! Parameter inlining: IN collections, score-ordered paging, idempotence

use qshape_core::prelude::*;
use qshape_planner::inline_parameters;

fn customer() -> EntityType {
    EntityType::new("Customer", "Customers")
        .with_property(Property::new("Id", DataType::Int32, false))
        .with_property(Property::new("Name", DataType::Utf8, true))
        .with_key(&["Id"])
}

fn id_column() -> SqlExpr {
    SqlExpr::column("c", "Id", DataType::Int32)
}

fn ids_ref(mapping: Option<TypeMapping>) -> ParameterRef {
    ParameterRef {
        name: "ids".into(),
        element_type: DataType::Int32,
        type_mapping: mapping,
    }
}

fn select_in(mapping: Option<TypeMapping>) -> SelectExpression {
    SelectExpression::for_entity(&customer())
        .with_predicate(SqlExpr::in_parameter(id_column(), ids_ref(mapping)))
}

fn inline(select: &SelectExpression, params: &ParameterValues) -> Result<SelectExpression> {
    inline_parameters(select, &DocumentSqlExpressionFactory, params)
}

fn is_false(expr: &SqlExpr) -> bool {
    matches!(
        expr,
        SqlExpr::Constant {
            value: Scalar::Bool(false),
            ..
        }
    )
}

#[test]
fn test_empty_runtime_list_compiles_to_false() {
    let params = ParameterValues::new().with("ids", Vec::<Scalar>::new());
    let out = inline(&select_in(None), &params).unwrap();
    assert!(is_false(out.predicate.as_ref().unwrap()));
}

#[test]
fn test_empty_list_is_false_whatever_the_item() {
    let params = ParameterValues::new().with("ids", Vec::<Scalar>::new());
    let items = [
        SqlExpr::column("c", "Name", DataType::Utf8),
        SqlExpr::constant(Scalar::Null, None),
        SqlExpr::Column {
            source: "c".into(),
            path: vec!["Id".into()],
            data_type: DataType::Int32,
            type_mapping: Some(TypeMapping::new(DataType::Int32, "number")),
        },
    ];
    for item in items {
        let select = SelectExpression::for_entity(&customer())
            .with_predicate(SqlExpr::in_parameter(item, ids_ref(None)));
        let out = inline(&select, &params).unwrap();
        assert!(is_false(out.predicate.as_ref().unwrap()));
    }
}

#[test]
fn test_runtime_list_becomes_ordered_literals() {
    let params = ParameterValues::new().with(
        "ids",
        vec![Scalar::I32(1), Scalar::I32(2), Scalar::I32(3)],
    );
    let out = inline(&select_in(None), &params).unwrap();
    let Some(SqlExpr::In {
        values: InValues::List(list),
        ..
    }) = &out.predicate
    else {
        panic!("expected an inlined IN list");
    };
    let literals: Vec<&Scalar> = list
        .iter()
        .map(|e| match e {
            SqlExpr::Constant {
                value, data_type, ..
            } => {
                assert_eq!(data_type, &DataType::Int32);
                value
            }
            other => panic!("expected a literal, got {:?}", other),
        })
        .collect();
    assert_eq!(literals, vec![&Scalar::I32(1), &Scalar::I32(2), &Scalar::I32(3)]);
}

#[test]
fn test_literals_carry_declared_type_mapping() {
    let mapping = TypeMapping::new(DataType::Int32, "number");
    let params = ParameterValues::new().with("ids", vec![Scalar::I32(4), Scalar::I32(5)]);
    let out = inline(&select_in(Some(mapping.clone())), &params).unwrap();
    let Some(SqlExpr::In {
        values: InValues::List(list),
        ..
    }) = &out.predicate
    else {
        panic!("expected an inlined IN list");
    };
    assert_eq!(list.len(), 2);
    assert!(list.iter().all(|e| e.type_mapping() == Some(&mapping)));
}

#[test]
fn test_null_elements_fall_back_to_declared_element_type() {
    let params = ParameterValues::new().with("ids", vec![Scalar::Null, Scalar::I64(7)]);
    let out = inline(&select_in(None), &params).unwrap();
    let Some(SqlExpr::In {
        values: InValues::List(list),
        ..
    }) = &out.predicate
    else {
        panic!("expected an inlined IN list");
    };
    assert!(matches!(
        &list[0],
        SqlExpr::Constant { value: Scalar::Null, data_type: DataType::Int32, .. }
    ));
    assert!(matches!(
        &list[1],
        SqlExpr::Constant { value: Scalar::I64(7), data_type: DataType::Int64, .. }
    ));
}

#[test]
fn test_inlining_is_idempotent() {
    let params = ParameterValues::new().with("ids", vec![Scalar::I32(1), Scalar::I32(2)]);
    let once = inline(&select_in(None), &params).unwrap();
    let twice = inline(&once, &ParameterValues::new()).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn test_inlining_nested_predicates() {
    let params = ParameterValues::new().with("ids", Vec::<Scalar>::new());
    let select = SelectExpression::for_entity(&customer()).with_predicate(SqlExpr::binary(
        BinaryOp::Or,
        SqlExpr::Unary {
            op: UnaryOp::IsNull,
            operand: Box::new(SqlExpr::column("c", "Name", DataType::Utf8)),
            type_mapping: None,
        },
        SqlExpr::in_parameter(id_column(), ids_ref(None)),
    ));
    let out = inline(&select, &params).unwrap();
    let Some(SqlExpr::Binary { right, .. }) = &out.predicate else {
        panic!("expected OR");
    };
    assert!(is_false(right));
}

fn score_ordering() -> SqlExpr {
    SqlExpr::Function {
        name: "FullTextScore".into(),
        args: vec![
            SqlExpr::column("c", "Name", DataType::Utf8),
            SqlExpr::constant(Scalar::Str("ann".into()), None),
        ],
        is_scoring: true,
        data_type: DataType::Float64,
        type_mapping: None,
    }
}

#[test]
fn test_score_ordered_limit_and_offset_are_burned_in() {
    let mapping = TypeMapping::new(DataType::Int32, "number");
    let select = SelectExpression::for_entity(&customer())
        .with_ordering(score_ordering(), false)
        .with_limit(SqlExpr::Parameter {
            name: "take".into(),
            data_type: DataType::Int32,
            type_mapping: Some(mapping.clone()),
        })
        .with_offset(SqlExpr::parameter("skip", DataType::Int32));
    let params = ParameterValues::new()
        .with("take", Scalar::I32(10))
        .with("skip", Scalar::I32(20));

    let out = inline(&select, &params).unwrap();
    assert_eq!(
        out.limit,
        Some(SqlExpr::Constant {
            value: Scalar::I32(10),
            data_type: DataType::Int32,
            type_mapping: Some(mapping),
        })
    );
    assert_eq!(
        out.offset,
        Some(SqlExpr::Constant {
            value: Scalar::I32(20),
            data_type: DataType::Int32,
            type_mapping: None,
        })
    );
}

#[test]
fn test_plain_limit_parameter_stays_bound() {
    let select = SelectExpression::for_entity(&customer())
        .with_ordering(id_column(), true)
        .with_limit(SqlExpr::parameter("take", DataType::Int32));
    let params = ParameterValues::new().with("take", Scalar::I32(3));
    let out = inline(&select, &params).unwrap();
    assert_eq!(out.limit, select.limit);
}

#[test]
fn test_concrete_limit_is_unchanged() {
    let select = SelectExpression::for_entity(&customer())
        .with_ordering(score_ordering(), false)
        .with_limit(SqlExpr::constant(Scalar::I32(10), None));
    let out = inline(&select, &ParameterValues::new()).unwrap();
    assert_eq!(out, select);
}

#[test]
fn test_missing_collection_parameter_is_unbound() {
    let err = inline(&select_in(None), &ParameterValues::new()).unwrap_err();
    assert!(matches!(err, Error::UnboundParameter(name) if name == "ids"));
}

#[test]
fn test_subquery_in_is_not_supported() {
    let sub = SelectExpression::for_entity(&customer());
    let select = SelectExpression::for_entity(&customer()).with_predicate(SqlExpr::In {
        item: Box::new(id_column()),
        values: InValues::Subquery(Box::new(sub)),
    });
    assert!(matches!(
        inline(&select, &ParameterValues::new()),
        Err(Error::NotSupported(_))
    ));
}
