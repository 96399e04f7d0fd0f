//! Plan reuse across sessions and executions

use std::sync::Arc;

use qshape_core::prelude::*;
use qshape_exec::{Database, Item, MemoryDocumentStore};
use qshape_planner::PlanCacheKey;

fn customer() -> EntityType {
    EntityType::new("Customer", "Customers")
        .with_property(Property::new("Id", DataType::Int32, false).with_json_name("id"))
        .with_property(Property::new("Name", DataType::Utf8, true))
        .with_key(&["Id"])
}

fn database(config: CompilerConfig) -> Database {
    let model = Model::new().with_entity_type(customer());
    let store = MemoryDocumentStore::new();
    let et = model.entity_type("Customer").unwrap();
    for (id, name) in [(1, "Ann"), (2, "Bob"), (3, "Cid")] {
        store
            .insert_entity(et, serde_json::json!({ "id": id, "Name": name }))
            .unwrap();
    }
    Database::new(ContextType::new("ShopContext"), model, config, Arc::new(store)).unwrap()
}

fn by_name() -> ShapedQuery {
    let select = SelectExpression::for_entity(&customer()).with_predicate(SqlExpr::binary(
        BinaryOp::Equal,
        SqlExpr::column("c", "Name", DataType::Utf8),
        SqlExpr::parameter("name", DataType::Utf8),
    ));
    ShapedQuery::new(QueryExpression::Select(select), ShaperExpr::entity("Customer", 0))
}

fn by_id() -> ShapedQuery {
    let select = SelectExpression::for_entity(&customer()).with_predicate(SqlExpr::binary(
        BinaryOp::Equal,
        SqlExpr::column("c", "id", DataType::Int32),
        SqlExpr::parameter("id", DataType::Int32),
    ));
    ShapedQuery::new(QueryExpression::Select(select), ShaperExpr::entity("Customer", 0))
}

#[test]
fn test_sessions_share_one_plan_per_shape() {
    let db = database(CompilerConfig::default());
    let cache = db.plan_cache();

    for name in ["Ann", "Bob", "Cid"] {
        let rows: Vec<Item> = db
            .session()
            .query(&by_name(), ParameterValues::new().with("name", Scalar::Str(name.into())))
            .unwrap()
            .to_vec()
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    assert_eq!(cache.len(), 1);
    assert_eq!(cache.misses(), 1);
    assert_eq!(cache.hits(), 2);
}

#[test]
fn test_compile_returns_the_same_plan_instance() {
    let db = database(CompilerConfig::default());
    let a = db.compile(&by_name()).unwrap();
    let b = db.compile(&by_name()).unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    let c = db.compile(&by_id()).unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(db.plan_cache().len(), 2);
}

#[test]
fn test_key_separates_configurations() {
    let ctx = ContextType::new("ShopContext");
    let shaped = by_name();
    let base = CompilerConfig::default();
    let base_key = PlanCacheKey::new(&shaped, &ctx, &base).unwrap();

    let no_tracking = CompilerConfig {
        tracking_behavior: QueryTrackingBehavior::NoTracking,
        ..base.clone()
    };
    assert_ne!(base_key, PlanCacheKey::new(&shaped, &ctx, &no_tracking).unwrap());

    let unchecked = CompilerConfig {
        thread_safety_checks_enabled: !base.thread_safety_checks_enabled,
        ..base.clone()
    };
    assert_ne!(base_key, PlanCacheKey::new(&shaped, &ctx, &unchecked).unwrap());

    let partitioned = CompilerConfig {
        partition_key: Some("eu".into()),
        ..base.clone()
    };
    assert_ne!(base_key, PlanCacheKey::new(&shaped, &ctx, &partitioned).unwrap());

    let other_ctx = ContextType::new("AuditContext");
    assert_ne!(base_key, PlanCacheKey::new(&shaped, &other_ctx, &base).unwrap());

    assert_eq!(base_key, PlanCacheKey::new(&by_name(), &ctx, &base).unwrap());
}

#[test]
fn test_oldest_plan_is_evicted_past_capacity() {
    let db = database(CompilerConfig {
        plan_cache_capacity: 1,
        ..CompilerConfig::default()
    });
    let first = db.compile(&by_name()).unwrap();
    db.compile(&by_id()).unwrap();
    assert_eq!(db.plan_cache().len(), 1);

    let again = db.compile(&by_name()).unwrap();
    assert!(!Arc::ptr_eq(&first, &again));
    assert_eq!(first, again);
    assert_eq!(db.plan_cache().misses(), 3);
}

#[test]
fn test_cached_plan_runs_with_each_execution_values() {
    let db = database(CompilerConfig::default());
    let plan = db.compile(&by_id()).unwrap();

    let session = db.session();
    for id in 1..=3 {
        let rows: Vec<serde_json::Value> = session
            .execute_plan(&plan, ParameterValues::new().with("id", Scalar::I32(id)))
            .unwrap()
            .to_vec()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Id"], serde_json::json!(id));
    }
}

fn id_below(bound: f64) -> ShapedQuery {
    let select = SelectExpression::for_entity(&customer()).with_predicate(SqlExpr::binary(
        BinaryOp::LessThan,
        SqlExpr::column("c", "id", DataType::Int32),
        SqlExpr::constant(Scalar::F64(bound), None),
    ));
    ShapedQuery::new(QueryExpression::Select(select), ShaperExpr::entity("Customer", 0))
}

#[test]
fn test_infinite_constants_get_their_own_plans() {
    let ctx = ContextType::new("ShopContext");
    let config = CompilerConfig::default();
    let above = PlanCacheKey::new(&id_below(f64::INFINITY), &ctx, &config).unwrap();
    let below = PlanCacheKey::new(&id_below(f64::NEG_INFINITY), &ctx, &config).unwrap();
    let nan = PlanCacheKey::new(&id_below(f64::NAN), &ctx, &config).unwrap();
    assert_ne!(above, below);
    assert_ne!(above, nan);
    assert_ne!(below, nan);

    let db = database(config);
    let all = db.compile(&id_below(f64::INFINITY)).unwrap();
    let none = db.compile(&id_below(f64::NEG_INFINITY)).unwrap();
    assert!(!Arc::ptr_eq(&all, &none));
    assert_eq!(db.plan_cache().len(), 2);
    assert_eq!(db.plan_cache().misses(), 2);
}
