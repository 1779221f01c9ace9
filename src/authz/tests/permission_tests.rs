//! Permission codec laws and evaluation over stored grants

mod common;

use common::Fixture;
use proptest::prelude::*;
use will_iam_authz::{IamError, OwnershipLevel, Permission, PermissionError, ResourceHierarchy};

// ============================================================================
// CODEC LAWS
// ============================================================================

fn segment() -> impl Strategy<Value = String> {
    prop_oneof![Just("*".to_string()), "[A-Za-z0-9._-]{1,12}"]
}

fn permission_string() -> impl Strategy<Value = String> {
    (
        segment(),
        prop_oneof![Just("RO"), Just("RL")],
        segment(),
        prop::collection::vec(segment(), 1..5),
    )
        .prop_map(|(service, level, action, resources)| {
            format!("{}::{}::{}::{}", service, level, action, resources.join("::"))
        })
}

proptest! {
    #[test]
    fn format_inverts_parse(s in permission_string()) {
        let parsed = Permission::parse(&s).unwrap();
        prop_assert_eq!(parsed.to_string(), s);
    }

    #[test]
    fn grant_satisfies_itself(s in permission_string()) {
        let p = Permission::parse(&s).unwrap();
        prop_assert!(p.is_present(std::slice::from_ref(&p)));
    }

    #[test]
    fn lender_grant_never_satisfies_owner(s in permission_string()) {
        let lender = Permission::parse(&s).unwrap().with_ownership_level(OwnershipLevel::Lender);
        let owner = lender.clone().with_ownership_level(OwnershipLevel::Owner);
        prop_assert!(!owner.is_present(&[lender.clone()]));
        prop_assert!(lender.is_present(&[owner]));
    }

    #[test]
    fn parse_never_panics(s in "\\PC{0,64}") {
        let _ = Permission::parse(&s);
    }
}

#[test]
fn test_rejects_unknown_ownership_level() {
    let err = Permission::parse("Will.IAM::RX::EditRole::*").unwrap_err();
    assert!(matches!(
        err,
        IamError::MalformedPermission(PermissionError::InvalidOwnershipLevel(_))
    ));
}

#[test]
fn test_contains_is_bounds_safe() {
    let rh = |s: &str| s.parse::<ResourceHierarchy>().unwrap();
    assert!(rh("A::*").contains(&rh("A::B::C")));
    assert!(!rh("A::B").contains(&rh("A::B::C")));
    assert!(!rh("A::B::C").contains(&rh("A::B")));
}

#[test]
fn test_owner_grant_satisfies_lender_candidate() {
    let grant = Permission::parse("S::RO::A::*").unwrap();
    let candidate = Permission::parse("S::RL::A::x").unwrap();
    assert!(candidate.is_present(&[grant.clone()]));

    let lender_grant = Permission::parse("S::RL::A::*").unwrap();
    let owner_candidate = Permission::parse("S::RO::A::x").unwrap();
    assert!(!owner_candidate.is_present(&[lender_grant]));
}

// ============================================================================
// EVALUATION OVER STORED GRANTS
// ============================================================================

#[tokio::test]
async fn test_grants_aggregate_across_roles() {
    let fx = Fixture::new();
    let sa = fx.account("worker").await;
    fx.grant(&sa.id, "Maestro::RL::ListSchedulers::*").await;

    assert!(fx
        .evaluator
        .has_permission(&sa.id, "Maestro::RL::ListSchedulers::sniper::na")
        .await
        .unwrap());
    assert!(!fx
        .evaluator
        .has_permission(&sa.id, "Maestro::RO::ListSchedulers::sniper")
        .await
        .unwrap());
    assert!(!fx
        .evaluator
        .has_permission(&sa.id, "Maestro::RL::EditScheduler::sniper")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_batch_results_align_with_input() {
    let fx = Fixture::new();
    let sa = fx.account("worker").await;
    fx.grant(&sa.id, "Maestro::RO::EditScheduler::sniper::*").await;

    let has = fx
        .evaluator
        .has_permissions_strings(
            &sa.id,
            &[
                "Maestro::RL::EditScheduler::other",
                "Maestro::RL::EditScheduler::sniper::na",
                "Maestro::RO::EditScheduler::sniper::eu",
                "Other::RL::EditScheduler::sniper::na",
            ],
        )
        .await
        .unwrap();
    assert_eq!(has, vec![false, true, true, false]);
}

#[tokio::test]
async fn test_owner_gate_requires_ownership_of_everything() {
    let fx = Fixture::new();
    let sa = fx.account("delegator").await;
    fx.grant(&sa.id, "Maestro::RO::EditScheduler::*").await;
    fx.grant(&sa.id, "Maestro::RL::ListSchedulers::*").await;

    let owned = vec![Permission::parse("Maestro::RL::EditScheduler::x").unwrap()];
    assert!(fx.evaluator.has_all_owner_permissions(&sa.id, &owned).await.unwrap());

    let mixed = vec![
        Permission::parse("Maestro::RL::EditScheduler::x").unwrap(),
        Permission::parse("Maestro::RL::ListSchedulers::x").unwrap(),
    ];
    assert!(!fx.evaluator.has_all_owner_permissions(&sa.id, &mixed).await.unwrap());

    let err = fx
        .evaluator
        .require_all_owner_permissions(&sa.id, &mixed)
        .await
        .unwrap_err();
    assert!(matches!(err, IamError::Forbidden(_)));
}

#[tokio::test]
async fn test_unknown_principal_has_nothing() {
    let fx = Fixture::new();
    assert!(!fx
        .evaluator
        .has_permission("nobody", "Maestro::RL::ListSchedulers::*")
        .await
        .unwrap());
}
