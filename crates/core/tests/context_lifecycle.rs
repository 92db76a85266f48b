mod common;

use std::time::Duration;

use edge_context::{BreakerState, ContextSource, CreateContextRequest, Error, derive_session_id};
use edge_context::testing::ReadyBehavior;

#[tokio::test(start_paused = true)]
async fn calls_within_ttl_share_one_upstream_creation() {
	let client = common::client();
	let manager = common::manager(&client);
	let request = CreateContextRequest::new("visitor-1").with_attribute("country", "NZ");

	let first = manager.acquire(&request).await.unwrap();
	tokio::time::advance(Duration::from_secs(299)).await;
	let second = manager.acquire(&request).await.unwrap();

	assert_eq!(first.source, ContextSource::Fresh);
	assert_eq!(second.source, ContextSource::Cached);
	assert_eq!(client.create_calls(), 1);
	assert_eq!(second.session.unit_ids().session_id, derive_session_id("visitor-1"));
	manager.destroy();
}

#[tokio::test(start_paused = true)]
async fn call_after_ttl_creates_exactly_once_more() {
	let client = common::client();
	let manager = common::manager(&client);
	let request = CreateContextRequest::new("visitor-1");

	manager.get_or_create_context(&request).await.unwrap();
	tokio::time::advance(Duration::from_secs(300)).await;
	manager.get_or_create_context(&request).await.unwrap();
	manager.get_or_create_context(&request).await.unwrap();

	assert_eq!(client.create_calls(), 2);
	manager.destroy();
}

#[tokio::test(start_paused = true)]
async fn distinct_users_do_not_share_snapshots() {
	let client = common::client();
	let manager = common::manager(&client);

	manager.get_or_create_context(&CreateContextRequest::new("a")).await.unwrap();
	let b = manager.acquire(&CreateContextRequest::new("b")).await.unwrap();

	assert_eq!(b.source, ContextSource::Fresh);
	assert_eq!(client.create_calls(), 2);
	manager.destroy();
}

#[tokio::test(start_paused = true)]
async fn open_breaker_serves_fallback_without_upstream_call() {
	let client = common::client();
	client.set_ready_behavior(ReadyBehavior::Fail);
	let manager = common::manager(&client);

	for user in ["u1", "u2"] {
		let err = manager.get_or_create_context(&CreateContextRequest::new(user)).await.err().unwrap();
		assert!(matches!(err, Error::Upstream(_)));
	}
	let tripping = manager.acquire(&CreateContextRequest::new("u3")).await.unwrap();
	assert_eq!(tripping.source, ContextSource::Fallback);
	assert_eq!(manager.breaker_state(), BreakerState::Open);
	assert_eq!(client.create_calls(), 3);

	tokio::time::advance(Duration::from_secs(30)).await;
	let handle = manager.acquire(&CreateContextRequest::new("u4")).await.unwrap();
	assert!(handle.is_fallback());
	assert_eq!(client.create_calls(), 3, "no upstream call while open");
	assert!(handle.session.experiment_data().unwrap().experiments.is_empty());
	assert!(manager.extract_experiment_data(handle.session.as_ref(), true).is_empty());
	assert_eq!(handle.session.unit_ids().user_id, "u4");
	manager.destroy();
}

#[tokio::test(start_paused = true)]
async fn half_open_trial_success_closes_breaker() {
	let client = common::client();
	client.set_create_fails(true);
	let manager = common::manager(&client);

	for _ in 0..3 {
		let _ = manager.acquire(&CreateContextRequest::new("u1")).await;
	}
	assert_eq!(manager.breaker_state(), BreakerState::Open);

	tokio::time::sleep(Duration::from_millis(60_001)).await;
	assert_eq!(manager.breaker_state(), BreakerState::HalfOpen);
	assert_eq!(manager.failure_count(), 3);

	client.set_create_fails(false);
	let handle = manager.acquire(&CreateContextRequest::new("u1")).await.unwrap();
	assert_eq!(handle.source, ContextSource::Fresh);
	assert_eq!(manager.breaker_state(), BreakerState::Closed);
	assert_eq!(manager.failure_count(), 0);
	manager.destroy();
}

#[tokio::test(start_paused = true)]
async fn slow_readiness_times_out_and_counts_towards_breaker() {
	let client = common::client();
	client.set_ready_behavior(ReadyBehavior::Delay(Duration::from_secs(10)));
	let manager = common::manager(&client);

	let err = manager.get_or_create_context(&CreateContextRequest::new("u1")).await.err().unwrap();
	assert!(matches!(err, Error::Timeout { ms: 2000 }));
	assert_eq!(manager.failure_count(), 1);
	manager.destroy();
}

#[tokio::test(start_paused = true)]
async fn destroy_twice_halts_background_timers() {
	let client = common::client();
	client.set_create_fails(true);
	let manager = common::manager(&client);
	for _ in 0..3 {
		let _ = manager.acquire(&CreateContextRequest::new("u1")).await;
	}
	assert_eq!(manager.breaker_state(), BreakerState::Open);

	manager.destroy();
	manager.destroy();

	tokio::time::sleep(Duration::from_secs(600)).await;
	assert_eq!(manager.breaker_state(), BreakerState::Open, "reset timer cancelled");
	let status = manager.status();
	assert_eq!(status["cleanup"]["running"], false);
	assert_eq!(status["cache"]["entries"], 0);
}
