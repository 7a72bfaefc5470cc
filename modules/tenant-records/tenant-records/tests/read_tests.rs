#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for fan-out reads

mod common;

use std::time::Duration;

use common::{PAGE, bound, customer_schema, customers, fields, seed, session, tenant, tenants};
use serde_json::json;
use tenant_records::{
    ConnectorError, DomainError, FieldOrigin, FilterCondition, FilterOp, GetOutcome, ModelSchema,
    Record, RemoteResponse, ServiceMethod, StaticConnector, TenantId, criteria,
};

// =============================================================================
// get
// =============================================================================

#[tokio::test]
async fn test_get_merges_equal_records_across_tenants() {
    let connector = StaticConnector::new(["A", "B", "C"]);
    seed(&connector, &["A", "C"], &json!({"Name": "Ada", "City": "Oslo"}));
    let model = customers(&connector).await;

    let record = model
        .objects()
        .get(&criteria([("Name", "Ada")]))
        .await
        .unwrap()
        .into_single()
        .unwrap();

    assert_eq!(bound(&record.tenants()), ["A", "C"]);
    assert_eq!(record.keys().len(), 2);
    assert_ne!(record.keys()[0], record.keys()[1]);
    assert!(record.is_fully_materialized());
    assert_eq!(record.value("City"), &json!("Oslo"));
    assert!(record.get("Key").is_none());
}

#[tokio::test]
async fn test_get_returns_many_for_distinct_records() {
    let connector = StaticConnector::new(["A", "B"]);
    connector.insert(&tenant("A"), PAGE, fields(json!({"Name": "Ada", "City": "Oslo"})));
    connector.insert(&tenant("B"), PAGE, fields(json!({"Name": "Ada", "City": "Rome"})));
    let model = customers(&connector).await;
    let mut objects = model.objects();

    let outcome = objects.get(&criteria([("Name", "Ada")])).await.unwrap();
    assert!(!outcome.is_single());
    assert_eq!(objects.results().len().unwrap(), 2);
    assert!(matches!(
        outcome.into_single(),
        Err(DomainError::MultipleFound { count: 2 })
    ));
}

#[tokio::test]
async fn test_get_rejects_several_rows_in_one_tenant() {
    let connector = StaticConnector::new(["A"]);
    connector.insert(&tenant("A"), PAGE, fields(json!({"Name": "Ada", "City": "Oslo"})));
    connector.insert(&tenant("A"), PAGE, fields(json!({"Name": "Ada", "City": "Rome"})));
    let model = customers(&connector).await;

    let result = model.objects().get(&criteria([("Name", "Ada")])).await;
    assert!(matches!(result, Err(DomainError::MultipleFound { count: 2 })));
}

#[tokio::test]
async fn test_get_not_found_when_no_tenant_matches() {
    let connector = StaticConnector::new(["A", "B"]);
    let model = customers(&connector).await;

    let result = model.objects().get(&criteria([("Name", "Nobody")])).await;
    assert!(matches!(result, Err(DomainError::NotFound(_))));
}

#[tokio::test]
async fn test_get_skips_failing_tenant() {
    let connector = StaticConnector::new(["A", "B"]);
    seed(&connector, &["A", "B"], &json!({"Name": "Ada", "City": "Oslo"}));
    connector.fail(&tenant("B"), "Read", ConnectorError::Transport("reset".to_owned()));
    let model = customers(&connector).await;

    let record = model
        .objects()
        .get(&criteria([("Name", "Ada")]))
        .await
        .unwrap()
        .into_single()
        .unwrap();
    assert_eq!(bound(&record.tenants()), ["A"]);
}

#[tokio::test]
async fn test_get_escalates_when_every_tenant_failed_in_transit() {
    let connector = StaticConnector::new(["A", "B"]);
    for name in ["A", "B"] {
        connector.fail(&tenant(name), "Read", ConnectorError::Transport("down".to_owned()));
    }
    let model = customers(&connector).await;

    let result = model.objects().get(&criteria([("Name", "Ada")])).await;
    match result {
        Err(DomainError::Transport { tenant: failed, .. }) => assert_eq!(failed.as_str(), "A"),
        other => panic!("expected a transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_get_validates_advertised_signature() {
    let connector = StaticConnector::new(["A"]);
    connector.set_signature(PAGE, ServiceMethod::new("Read", &["No"]));
    let model = customers(&connector).await;

    let result = model.objects().get(&criteria([("Name", "Ada")])).await;
    assert!(matches!(result, Err(DomainError::Validation { .. })));
    assert_eq!(connector.total_calls("Read"), 0);
}

#[tokio::test]
async fn test_connection_failure_is_fatal() {
    let connector = StaticConnector::new(["A", "B"]);
    seed(&connector, &["A"], &json!({"Name": "Ada", "City": "Oslo"}));
    connector.fail_connect(&tenant("B"));
    let model = customers(&connector).await;

    let result = model.objects().get(&criteria([("Name", "Ada")])).await;
    assert!(matches!(result, Err(DomainError::Connection { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_slow_tenant_times_out_and_is_skipped() {
    let connector = StaticConnector::new(["A", "B"]);
    seed(&connector, &["A", "B"], &json!({"Name": "Ada", "City": "Oslo"}));
    connector.delay(&tenant("B"), Duration::from_secs(60));
    let model = customers(&connector).await;

    let record = model
        .objects()
        .get(&criteria([("Name", "Ada")]))
        .await
        .unwrap()
        .into_single()
        .unwrap();
    assert_eq!(bound(&record.tenants()), ["A"]);
}

// =============================================================================
// filter / all
// =============================================================================

#[tokio::test]
async fn test_filter_merges_and_keeps_order() {
    let connector = StaticConnector::new(["A", "B"]);
    connector.insert(&tenant("A"), PAGE, fields(json!({"Name": "Ada", "City": "Oslo"})));
    connector.insert(&tenant("A"), PAGE, fields(json!({"Name": "Alan", "City": "Oslo"})));
    connector.insert(&tenant("B"), PAGE, fields(json!({"Name": "Alan", "City": "Oslo"})));
    connector.insert(&tenant("B"), PAGE, fields(json!({"Name": "Grace", "City": "Rome"})));
    let model = customers(&connector).await;

    let set = model
        .objects()
        .filter(&[FilterCondition::eq("City", "Oslo")])
        .await
        .unwrap();

    let names: Vec<_> = set.iter().unwrap().map(|r| r.value("Name").clone()).collect();
    assert_eq!(names, [json!("Ada"), json!("Alan")]);
    assert_eq!(bound(&set.get(1).unwrap().unwrap().tenants()), ["A", "B"]);
}

#[tokio::test]
async fn test_filter_with_operators() {
    let connector = StaticConnector::new(["A"]);
    for (name, city) in [("Ada", "Oslo"), ("Alan", "Rome"), ("Grace", "Bergen")] {
        connector.insert(&tenant("A"), PAGE, fields(json!({"Name": name, "City": city})));
    }
    let model = customers(&connector).await;

    let set = model
        .objects()
        .filter(&[FilterCondition::new("Name", FilterOp::StartsWith, "A")])
        .await
        .unwrap();
    assert_eq!(set.len().unwrap(), 2);

    let set = model
        .objects()
        .filter_by(&criteria([("City", "Bergen")]))
        .await
        .unwrap();
    assert_eq!(set.get(0).unwrap().unwrap().value("Name"), &json!("Grace"));
}

#[tokio::test]
async fn test_filter_empty_result_is_populated() {
    let connector = StaticConnector::new(["A"]);
    let model = customers(&connector).await;
    let mut objects = model.objects();

    assert!(matches!(objects.results().len(), Err(DomainError::EmptyResult)));
    let set = objects.filter(&[FilterCondition::eq("City", "Nowhere")]).await.unwrap();
    assert!(set.is_empty().unwrap());
    assert!(objects.results().is_populated());
}

#[tokio::test]
async fn test_filter_skips_failed_tenants() {
    let connector = StaticConnector::new(["A", "B"]);
    connector.insert(&tenant("A"), PAGE, fields(json!({"Name": "Ada", "City": "Oslo"})));
    connector.fail(&tenant("B"), "ReadMultiple", ConnectorError::Fault("locked".to_owned()));
    let model = customers(&connector).await;

    let set = model.objects().filter(&[]).await.unwrap();
    assert_eq!(set.len().unwrap(), 1);
}

#[tokio::test]
async fn test_filter_fails_when_every_tenant_failed() {
    let connector = StaticConnector::new(["A", "B"]);
    for name in ["A", "B"] {
        connector.fail(
            &tenant(name),
            "ReadMultiple",
            ConnectorError::Transport("down".to_owned()),
        );
    }
    let model = customers(&connector).await;

    let result = model.objects().filter(&[]).await;
    assert!(matches!(result, Err(DomainError::Transport { .. })));
}

#[tokio::test]
async fn test_all_requires_a_listing_operation() {
    let connector = StaticConnector::new(["A"]);
    connector.insert(&tenant("A"), PAGE, fields(json!({"Name": "Ada", "City": "Oslo"})));
    let session = session(&connector).await;

    let plain = session.register(customer_schema()).await;
    assert!(matches!(
        plain.objects().all().await,
        Err(DomainError::Unsupported { .. })
    ));

    let listing = ModelSchema::builder("Customer")
        .all_method("ReadAll")
        .all_fields()
        .build()
        .unwrap();
    let model = session.register(listing).await;
    let set = model.objects().all().await.unwrap();
    assert_eq!(set.len().unwrap(), 1);
}

// =============================================================================
// discovered fields and custom operations
// =============================================================================

#[tokio::test]
async fn test_undeclared_response_fields_are_discovered() {
    let connector = StaticConnector::new(["A"]);
    connector.insert(
        &tenant("A"),
        PAGE,
        fields(json!({"Name": "Ada", "City": "Oslo", "Balance": 12})),
    );
    let model = customers(&connector).await;

    let record = model
        .objects()
        .get(&criteria([("Name", "Ada")]))
        .await
        .unwrap()
        .into_single()
        .unwrap();
    assert_eq!(record.value("Balance"), &json!(12));
    assert_eq!(model.field_origin("Balance"), Some(FieldOrigin::Discovered));
    assert_eq!(model.field_origin("Name"), Some(FieldOrigin::Declared));
    assert_eq!(model.field_origin("Key"), None);
}

#[tokio::test]
async fn test_missing_declared_field_is_unresolved() {
    let connector = StaticConnector::new(["A"]);
    connector.insert(&tenant("A"), PAGE, fields(json!({"Name": "Ada"})));
    let model = customers(&connector).await;

    let record = model
        .objects()
        .get(&criteria([("Name", "Ada")]))
        .await
        .unwrap()
        .into_single()
        .unwrap();
    assert!(record.unresolved_fields().contains("City"));
    assert_eq!(record.value("City"), &json!(null));
}

#[tokio::test]
async fn test_call_invokes_codeunit_in_every_tenant() {
    let connector = StaticConnector::new(["A", "B"]);
    connector.register_operation(
        "Codeunit/Customer",
        ServiceMethod::new("Recalculate", &["No"]),
        |tenant, args| Ok(RemoteResponse::Value(json!(format!("{tenant}:{}", args["No"])))),
    );
    let model = customers(&connector).await;
    let objects = model.objects();

    let answers = objects.call("recalculate", &fields(json!({"No": 7}))).await.unwrap();
    assert_eq!(answers.len(), 2);
    assert_eq!(answers[0].0, tenant("A"));
    assert_eq!(answers[1].1, RemoteResponse::Value(json!("B:7")));

    let missing = objects.call("Recalculate", &fields(json!({}))).await;
    assert!(matches!(missing, Err(DomainError::Validation { .. })));
    let unknown = objects.call("Explode", &fields(json!({}))).await;
    assert!(matches!(unknown, Err(DomainError::Unsupported { .. })));
}

#[tokio::test]
async fn test_explicit_single_result_helpers() {
    let connector = StaticConnector::new(["A", "B"]);
    seed(&connector, &["B"], &json!({"Name": "Ada", "City": "Oslo"}));
    let model = customers(&connector).await;
    let mut objects = model.objects();

    objects.get(&criteria([("Name", "Ada")])).await.unwrap();
    let loaded = objects.results().records().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(bound(&loaded[0].tenants()), ["B"]);
    assert_eq!(tenants(&["B"]), loaded[0].tenants());
}

// =============================================================================
// Directory-wide scenarios
// =============================================================================

#[tokio::test]
async fn test_same_record_in_four_tenants_is_one_record() {
    let connector = StaticConnector::new(["T1", "T2", "T3", "T4"]);
    let keys: Vec<_> = ["T1", "T2", "T3", "T4"]
        .iter()
        .map(|name| {
            connector.insert(&tenant(name), PAGE, fields(json!({"Name": "Test", "City": "Oslo"})))
        })
        .collect();
    let model = customers(&connector).await;

    let record = model
        .objects()
        .get(&criteria([("Name", "Test")]))
        .await
        .unwrap()
        .into_single()
        .unwrap();

    assert_eq!(bound(&record.tenants()), ["T1", "T2", "T3", "T4"]);
    assert_eq!(record.keys(), keys);
}

#[tokio::test]
async fn test_diverging_tenant_yields_two_records() {
    let connector = StaticConnector::new(["T1", "T2", "T3", "T4"]);
    connector.insert(&tenant("T1"), PAGE, fields(json!({"Name": "Test", "City": "A"})));
    seed(&connector, &["T2", "T3", "T4"], &json!({"Name": "Test", "City": "B"}));
    let model = customers(&connector).await;

    let outcome = model
        .objects()
        .get(&criteria([("Name", "Test")]))
        .await
        .unwrap();
    let tenant_groups: Vec<Vec<TenantId>> = match outcome {
        GetOutcome::Many(set) => set.iter().unwrap().map(Record::tenants).collect(),
        GetOutcome::One(_) => panic!("expected two records"),
    };
    assert_eq!(tenant_groups, [tenants(&["T1"]), tenants(&["T2", "T3", "T4"])]);
}
