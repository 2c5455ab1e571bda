//! Property tests for tenant isolation and test-data uniqueness.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::{collections::HashSet, sync::Arc};

use crudprobe_core::{
    datagen::DataGenerator,
    driver::{twin::TwinDriver, Driver},
    isolation::check_isolation,
    registry::EntityType,
    EntityRegistry, ProbeConfig, TenantId, TestRun,
};
use proptest::{prelude::*, sample::select};
use serde_json::Map;
use strum::IntoEnumIterator;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn entity_type() -> impl Strategy<Value = EntityType> {
    select(EntityType::iter().collect::<Vec<_>>())
}

fn tenant_pair() -> impl Strategy<Value = (String, String)> {
    ("farm-[a-z0-9]{1,8}", "farm-[a-z0-9]{1,8}").prop_filter("tenants must differ", |(a, b)| a != b)
}

fn isolation_on(twin: TwinDriver, kind: EntityType, a: &str, b: &str) -> (bool, bool) {
    runtime().block_on(async {
        twin.authenticate().await.unwrap();
        let mut run = TestRun::new(
            Arc::new(twin),
            EntityRegistry::builtin().unwrap(),
            ProbeConfig::default(),
        );
        let result = check_isolation(
            &mut run,
            &kind.to_string(),
            &TenantId::new(a),
            &TenantId::new(b),
        )
        .await
        .unwrap();
        (result.created_in_a, result.isolation_holds)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A correctly scoped SUT never shows tenant A's record to tenant B.
    #[test]
    fn prop_isolation_holds_for_any_tenant_pair(kind in entity_type(), (a, b) in tenant_pair()) {
        let (created, holds) = isolation_on(TwinDriver::api(), kind, &a, &b);
        prop_assert!(created);
        prop_assert!(holds);
    }

    /// A leaking collection is always detected, whatever the tenants.
    #[test]
    fn prop_leak_always_detected(kind in entity_type(), (a, b) in tenant_pair()) {
        let registry = EntityRegistry::builtin().unwrap();
        let path = registry.describe(&kind.to_string()).unwrap().api_path();
        let (created, holds) = isolation_on(TwinDriver::api().with_leak(path), kind, &a, &b);
        prop_assert!(created);
        prop_assert!(!holds);
    }

    /// Display values never collide within a run, across entity types.
    #[test]
    fn prop_generated_display_values_unique(kinds in prop::collection::vec(entity_type(), 1..64)) {
        let registry = EntityRegistry::builtin().unwrap();
        let generator = DataGenerator::new();
        let mut seen = HashSet::new();
        for kind in kinds {
            let descriptor = registry.describe(&kind.to_string()).unwrap();
            let record = generator.generate(&descriptor, Map::new());
            prop_assert!(seen.insert(record.display_value()));
        }
    }
}
