use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use quotagate_core::{
    clock::ManualClock,
    config::{Allowance, QuotaConfig, RateLimitConfig},
    entitlement::{
        ActionKind, ActivityLog, Actor, ConsumptionSource, EntitlementStore, Grant, GrantStatus,
        QuotaType, Subscription, SubscriptionStatus, UsageLedger, UsageRecord,
    },
    AccessGate, DenyReason, GatedAction, QuotaConsumer, RateLimiter,
};
use quotagate_duckdb::DuckDbBackend;

// ─────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_800_000_000, 0).expect("valid timestamp")
}

fn subscription(id: &str, actor_id: &str, ends_in_days: i64, created_days_ago: i64) -> Subscription {
    Subscription {
        id: id.to_string(),
        actor_id: actor_id.to_string(),
        status: SubscriptionStatus::Active,
        plan_code: "pro_monthly".to_string(),
        current_period_start: now() - Duration::days(10),
        current_period_end: now() + Duration::days(ends_in_days),
        created_at: now() - Duration::days(created_days_ago),
    }
}

fn grant(id: &str, actor_id: &str, remaining: u32, valid_for_days: i64) -> Grant {
    Grant {
        id: id.to_string(),
        actor_id: actor_id.to_string(),
        quota_type: QuotaType::PlanGeneration,
        remaining_count: remaining,
        valid_until: now() + Duration::days(valid_for_days),
        status: GrantStatus::Active,
        created_at: now() - Duration::days(1),
    }
}

fn consumer(db: &Arc<DuckDbBackend>) -> QuotaConsumer {
    QuotaConsumer::new(
        Arc::new(QuotaConfig::default()),
        db.clone(),
        db.clone(),
        Arc::new(ManualClock::new(now())),
    )
}

async fn usage_rows(db: &DuckDbBackend, actor_id: &str) -> i64 {
    let conn = db.conn_for_test().await;
    conn.prepare("SELECT COUNT(*) FROM usage_records WHERE actor_id = ?1")
        .expect("prepare")
        .query_row(quotagate_duckdb::duckdb::params![actor_id], |row| row.get(0))
        .expect("count")
}

// ─────────────────────────────────────────────────────────────
// EntitlementStore
// ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn active_subscription_prefers_most_recent() {
    let db = DuckDbBackend::open_in_memory().expect("db");
    db.upsert_subscription(&subscription("sub_old", "user_1", 5, 90))
        .await
        .expect("insert");
    db.upsert_subscription(&subscription("sub_new", "user_1", 20, 10))
        .await
        .expect("insert");
    let mut canceled = subscription("sub_canceled", "user_1", 40, 1);
    canceled.status = SubscriptionStatus::Canceled;
    db.upsert_subscription(&canceled).await.expect("insert");

    let active = db
        .active_subscription("user_1", now())
        .await
        .expect("query")
        .expect("subscription");
    assert_eq!(active.id, "sub_new");
    assert_eq!(active.current_period_start, now() - Duration::days(10));
    assert_eq!(active.current_period_end, now() + Duration::days(20));

    assert!(db
        .active_subscription("user_2", now())
        .await
        .expect("query")
        .is_none());
}

#[tokio::test]
async fn usable_grants_excludes_inert_grants() {
    let db = DuckDbBackend::open_in_memory().expect("db");
    db.insert_grant(&grant("live_late", "user_1", 2, 30)).await.expect("insert");
    db.insert_grant(&grant("live_soon", "user_1", 1, 3)).await.expect("insert");
    db.insert_grant(&grant("empty", "user_1", 0, 30)).await.expect("insert");
    db.insert_grant(&grant("expired", "user_1", 4, -1)).await.expect("insert");
    db.insert_grant(&grant("revoked", "user_1", 4, 30)).await.expect("insert");
    db.revoke_grant("revoked").await.expect("revoke");
    let mut travel = grant("travel", "user_1", 4, 30);
    travel.quota_type = QuotaType::TravelInfo;
    db.insert_grant(&travel).await.expect("insert");
    db.insert_grant(&grant("other_actor", "user_2", 4, 30)).await.expect("insert");

    let grants = db
        .usable_grants("user_1", QuotaType::PlanGeneration, now())
        .await
        .expect("query");
    let ids: Vec<&str> = grants.iter().map(|g| g.id.as_str()).collect();
    assert_eq!(ids, vec!["live_soon", "live_late"]);
}

#[tokio::test]
async fn decrement_is_guarded_at_zero() {
    let db = DuckDbBackend::open_in_memory().expect("db");
    db.insert_grant(&grant("g1", "user_1", 2, 30)).await.expect("insert");

    assert!(db.decrement_grant("g1", now()).await.expect("decrement"));
    assert!(db.decrement_grant("g1", now()).await.expect("decrement"));
    assert!(!db.decrement_grant("g1", now()).await.expect("decrement"));
    assert!(!db.decrement_grant("missing", now()).await.expect("decrement"));

    let stored = db.get_grant("g1").await.expect("get").expect("grant");
    assert_eq!(stored.remaining_count, 0);
}

#[tokio::test]
async fn decrement_refuses_expired_or_revoked_grants() {
    let db = DuckDbBackend::open_in_memory().expect("db");
    db.insert_grant(&grant("g1", "user_1", 3, 1)).await.expect("insert");
    db.insert_grant(&grant("g2", "user_1", 3, 30)).await.expect("insert");
    db.revoke_grant("g2").await.expect("revoke");

    assert!(!db
        .decrement_grant("g1", now() + Duration::days(2))
        .await
        .expect("decrement"));
    assert!(!db.decrement_grant("g2", now()).await.expect("decrement"));
    assert!(!db.revoke_grant("missing").await.expect("revoke"));
}

#[tokio::test]
async fn parallel_decrements_never_go_negative() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    db.insert_grant(&grant("last", "user_1", 1, 30)).await.expect("insert");

    let mut handles = Vec::new();
    for _ in 0..12 {
        let db = Arc::clone(&db);
        handles.push(tokio::spawn(async move {
            db.decrement_grant("last", now()).await
        }));
    }
    let mut wins = 0;
    for handle in handles {
        if handle.await.expect("join").expect("decrement") {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);
    let stored = db.get_grant("last").await.expect("get").expect("grant");
    assert_eq!(stored.remaining_count, 0);
}

// ─────────────────────────────────────────────────────────────
// UsageLedger + ActivityLog
// ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn count_since_filters_by_source_and_period() {
    let db = DuckDbBackend::open_in_memory().expect("db");
    let period_start = now() - Duration::days(3);
    for (source, at) in [
        (ConsumptionSource::Subscription, period_start),
        (ConsumptionSource::Subscription, now()),
        (ConsumptionSource::Subscription, period_start - Duration::seconds(1)),
        (ConsumptionSource::Ticket, now()),
        (ConsumptionSource::Admin, now()),
        (ConsumptionSource::Free, now()),
    ] {
        db.append(&UsageRecord::new("user_1", QuotaType::PlanGeneration, source, at))
            .await
            .expect("append");
    }
    db.append(&UsageRecord::new(
        "user_1",
        QuotaType::TravelInfo,
        ConsumptionSource::Subscription,
        now(),
    ))
    .await
    .expect("append");

    let count = db
        .count_since(
            "user_1",
            QuotaType::PlanGeneration,
            ConsumptionSource::Subscription,
            period_start,
        )
        .await
        .expect("count");
    assert_eq!(count, 2);

    let free = db
        .count_since("user_1", QuotaType::PlanGeneration, ConsumptionSource::Free, period_start)
        .await
        .expect("count");
    assert_eq!(free, 1);
}

#[tokio::test]
async fn activity_window_and_resource_timestamps() {
    let db = DuckDbBackend::open_in_memory().expect("db");
    let window_start = now() - Duration::seconds(60);
    for secs in [70, 50, 10] {
        let at = now() - Duration::seconds(secs);
        let since = at - Duration::seconds(60);
        assert!(db
            .record_if_under("user_1", ActionKind::CreatePlan, since, u64::MAX, at)
            .await
            .expect("record"));
    }

    // Two rows inside the window: a cap of 3 admits one more, then refuses.
    assert!(db
        .record_if_under("user_1", ActionKind::CreatePlan, window_start, 3, now())
        .await
        .expect("record"));
    assert!(!db
        .record_if_under("user_1", ActionKind::CreatePlan, window_start, 3, now())
        .await
        .expect("record"));
    // Other action kinds have their own window.
    assert!(db
        .record_if_under("user_1", ActionKind::TravelInfo, window_start, 3, now())
        .await
        .expect("record"));

    db.release_action("user_1", ActionKind::CreatePlan, now())
        .await
        .expect("release");
    assert!(db
        .record_if_under("user_1", ActionKind::CreatePlan, window_start, 3, now())
        .await
        .expect("record"));
    // Releasing an unknown admission is a no-op.
    db.release_action("user_9", ActionKind::CreatePlan, now())
        .await
        .expect("release");

    assert!(db.resource_last_modified("plan_1").await.expect("query").is_none());
    db.touch_resource("plan_1", now() - Duration::seconds(5)).await.expect("touch");
    db.touch_resource("plan_1", now()).await.expect("touch");
    assert_eq!(
        db.resource_last_modified("plan_1").await.expect("query"),
        Some(now())
    );
}

// ─────────────────────────────────────────────────────────────
// QuotaConsumer over DuckDB
// ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn subscription_consumption_writes_one_ledger_row() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    db.upsert_subscription(&subscription("sub_1", "user_1", 20, 30))
        .await
        .expect("insert");

    let decision = consumer(&db)
        .check_and_consume(&Actor::new("user_1"), QuotaType::PlanGeneration)
        .await
        .expect("decision");
    assert!(decision.allowed);
    assert_eq!(decision.source, Some(ConsumptionSource::Subscription));
    assert_eq!(usage_rows(&db, "user_1").await, 1);
}

#[tokio::test]
async fn five_tickets_then_denial() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    db.insert_grant(&grant("g1", "user_1", 5, 10)).await.expect("insert");
    let consumer = consumer(&db);
    let actor = Actor::new("user_1");

    for _ in 0..5 {
        let decision = consumer
            .check_and_consume(&actor, QuotaType::PlanGeneration)
            .await
            .expect("decision");
        assert_eq!(decision.source, Some(ConsumptionSource::Ticket));
    }
    let drained = db.get_grant("g1").await.expect("get").expect("grant");
    assert_eq!(drained.remaining_count, 0);

    let decision = consumer
        .check_and_consume(&actor, QuotaType::PlanGeneration)
        .await
        .expect("decision");
    assert!(!decision.allowed);
    assert_eq!(decision.reason, Some(DenyReason::QuotaExceeded));
    assert_eq!(usage_rows(&db, "user_1").await, 0);
}

#[tokio::test]
async fn source_follows_expiry_order() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    // user_1: subscription ends in 20 days, ticket in 5 → ticket first.
    db.upsert_subscription(&subscription("sub_1", "user_1", 20, 30))
        .await
        .expect("insert");
    db.insert_grant(&grant("g1", "user_1", 3, 5)).await.expect("insert");
    // user_2: subscription ends in 5 days, ticket in 20 → subscription first.
    db.upsert_subscription(&subscription("sub_2", "user_2", 5, 30))
        .await
        .expect("insert");
    db.insert_grant(&grant("g2", "user_2", 3, 20)).await.expect("insert");
    let consumer = consumer(&db);

    let first = consumer
        .check_and_consume(&Actor::new("user_1"), QuotaType::PlanGeneration)
        .await
        .expect("decision");
    let second = consumer
        .check_and_consume(&Actor::new("user_2"), QuotaType::PlanGeneration)
        .await
        .expect("decision");

    assert_eq!(first.source, Some(ConsumptionSource::Ticket));
    assert_eq!(second.source, Some(ConsumptionSource::Subscription));
}

#[tokio::test]
async fn capped_subscription_spills_over_to_ticket() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    db.upsert_subscription(&subscription("sub_1", "user_1", 5, 30))
        .await
        .expect("insert");
    db.insert_grant(&grant("g1", "user_1", 3, 20)).await.expect("insert");
    for i in 0..30 {
        db.append(&UsageRecord::new(
            "user_1",
            QuotaType::PlanGeneration,
            ConsumptionSource::Subscription,
            now() - Duration::minutes(i + 1),
        ))
        .await
        .expect("append");
    }

    let decision = consumer(&db)
        .check_and_consume(&Actor::new("user_1"), QuotaType::PlanGeneration)
        .await
        .expect("decision");
    assert_eq!(decision.source, Some(ConsumptionSource::Ticket));
    assert_eq!(usage_rows(&db, "user_1").await, 30);
}

#[tokio::test]
async fn parallel_consumers_race_for_last_ticket() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    db.insert_grant(&grant("last", "user_1", 1, 10)).await.expect("insert");
    let consumer = Arc::new(consumer(&db));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let consumer = Arc::clone(&consumer);
        handles.push(tokio::spawn(async move {
            consumer
                .check_and_consume(&Actor::new("user_1"), QuotaType::PlanGeneration)
                .await
        }));
    }
    let mut allowed = 0;
    for handle in handles {
        if handle.await.expect("join").expect("decision").allowed {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 1);
    let stored = db.get_grant("last").await.expect("get").expect("grant");
    assert_eq!(stored.remaining_count, 0);
}

#[tokio::test]
async fn free_tier_consumption_is_ledgered_as_free() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    let consumer = QuotaConsumer::new(
        Arc::new(
            QuotaConfig::default()
                .with_free_allowance(QuotaType::TravelInfo, Allowance::Limited(1)),
        ),
        db.clone(),
        db.clone(),
        Arc::new(ManualClock::new(now())),
    );
    let actor = Actor::new("user_1");

    let decision = consumer
        .check_and_consume(&actor, QuotaType::TravelInfo)
        .await
        .expect("decision");
    assert_eq!(decision.source, Some(ConsumptionSource::Free));
    let decision = consumer
        .check_and_consume(&actor, QuotaType::TravelInfo)
        .await
        .expect("decision");
    assert_eq!(decision.reason, Some(DenyReason::QuotaExceeded));
    assert_eq!(usage_rows(&db, "user_1").await, 1);
}

// ─────────────────────────────────────────────────────────────
// AccessGate over DuckDB
// ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn parallel_burst_through_gate_admits_only_the_rate_limit() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    db.insert_grant(&grant("g1", "user_1", 20, 10)).await.expect("insert");
    let clock = Arc::new(ManualClock::new(now()));
    let limiter = RateLimiter::new(RateLimitConfig::default(), db.clone(), clock.clone());
    let consumer = QuotaConsumer::new(
        Arc::new(QuotaConfig::default()),
        db.clone(),
        db.clone(),
        clock,
    );
    let gate = Arc::new(AccessGate::new(limiter, consumer));
    let barrier = Arc::new(tokio::sync::Barrier::new(12));

    let mut handles = Vec::new();
    for _ in 0..12 {
        let gate = Arc::clone(&gate);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            gate.check_access(Some(&Actor::new("user_1")), &GatedAction::CreatePlan)
                .await
        }));
    }
    let mut allowed = 0;
    for handle in handles {
        let decision = handle.await.expect("join").expect("decision");
        if decision.allowed {
            allowed += 1;
        } else {
            assert_eq!(decision.reason, Some(DenyReason::RateLimited));
        }
    }
    assert_eq!(allowed, 5);
    let stored = db.get_grant("g1").await.expect("get").expect("grant");
    assert_eq!(stored.remaining_count, 15);
}
