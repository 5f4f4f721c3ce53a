mod common;

use chrono::Utc;
use common::{url, HarnessBuilder, RecordingPublisher, USER};
use reply_agent::db;
use reply_agent::error::{ActionError, UpstreamError};
use reply_agent::model::HistoryStatus;
use reply_agent::reconcile::{ActionResult, QueueView};
use std::time::Duration;

async fn publishes_today(pool: &db::Pool) -> i64 {
    db::publishes_on(pool, USER, Utc::now().date_naive()).await.unwrap()
}

#[tokio::test]
async fn approve_publishes_and_settles_entry() {
    let h = HarnessBuilder::default().build().await;
    let entry = h.actions.add(USER, &url(10), "nice thread", Some("original post")).await.unwrap();

    let record = h.actions.approve(USER, entry.id, None).await.unwrap();
    assert_eq!(record.status, HistoryStatus::Published);
    assert_eq!(record.published_id.as_deref(), Some("published-1"));
    assert_eq!(record.reply_text, "nice thread");
    assert_eq!(
        h.publisher.calls().await,
        vec![("nice thread".to_string(), "10".to_string())]
    );
    assert!(h.actions.list(USER).await.unwrap().is_empty());
    assert_eq!(publishes_today(&h.pool).await, 1);
}

#[tokio::test]
async fn approve_uses_edited_text() {
    let h = HarnessBuilder::default().build().await;
    let entry = h.actions.add(USER, &url(10), "draft", None).await.unwrap();
    h.actions.edit(USER, entry.id, "edited reply").await.unwrap();
    let record = h
        .actions
        .approve(USER, entry.id, Some("  final words "))
        .await
        .unwrap();
    assert_eq!(record.reply_text, "final words");
}

#[tokio::test]
async fn concurrent_discard_and_approve_with_poll_in_flight() {
    let mut publisher = RecordingPublisher::default();
    publisher.delay = Duration::from_millis(30);
    let h = HarnessBuilder::default().publisher(publisher).build().await;
    let a = h.actions.add(USER, &url(1), "reply a", None).await.unwrap();
    let b = h.actions.add(USER, &url(2), "reply b", None).await.unwrap();

    let mut view = QueueView::new();
    let t = view.begin_poll();
    view.apply_poll(t, &h.actions.list(USER).await.unwrap());
    assert_eq!(view.ids(), vec![a.id, b.id]);

    assert!(view.begin_action(a.id));
    assert!(view.begin_action(b.id));
    let in_flight_poll = view.begin_poll();

    let (discarded, approved, listing) = tokio::join!(
        h.actions.discard(USER, a.id),
        h.actions.approve(USER, b.id, None),
        h.actions.list(USER),
    );
    assert!(discarded.unwrap());
    approved.unwrap();
    view.action_settled(a.id, ActionResult::Succeeded);
    view.action_settled(b.id, ActionResult::Succeeded);
    view.apply_poll(in_flight_poll, &listing.unwrap());
    assert!(view.ids().is_empty());

    let t = view.begin_poll();
    view.apply_poll(t, &h.actions.list(USER).await.unwrap());
    assert!(view.ids().is_empty());
    assert_eq!(view.tombstone_count(), 0);

    assert!(h.actions.list(USER).await.unwrap().is_empty());
    let history = h.actions.history(USER, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].item_ref, "2");
    assert_eq!(h.publisher.calls().await.len(), 1);
    assert_eq!(publishes_today(&h.pool).await, 1);
}

#[tokio::test]
async fn double_approve_publishes_once() {
    let mut publisher = RecordingPublisher::default();
    publisher.delay = Duration::from_millis(20);
    let h = HarnessBuilder::default().publisher(publisher).build().await;
    let entry = h.actions.add(USER, &url(3), "once", None).await.unwrap();

    let (first, second) = tokio::join!(
        h.actions.approve(USER, entry.id, None),
        h.actions.approve(USER, entry.id, None),
    );
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(ActionError::NotFound(id)) if *id == entry.id)));
    assert_eq!(h.publisher.calls().await.len(), 1);
    assert_eq!(publishes_today(&h.pool).await, 1);
}

#[tokio::test]
async fn rejected_publish_keeps_entry_and_quota() {
    let h = HarnessBuilder::default()
        .publisher(RecordingPublisher::with_responses(vec![Err(
            UpstreamError::Rejected("duplicate content".into()),
        )]))
        .build()
        .await;
    let entry = h.actions.add(USER, &url(4), "dup", None).await.unwrap();

    let err = h.actions.approve(USER, entry.id, None).await.unwrap_err();
    assert!(matches!(err, ActionError::Rejected(ref m) if m == "duplicate content"));
    assert_eq!(h.actions.list(USER).await.unwrap().len(), 1);
    assert_eq!(publishes_today(&h.pool).await, 0);

    // The claim was released: the user can edit and retry.
    h.actions.edit(USER, entry.id, "different words").await.unwrap();
    h.actions.approve(USER, entry.id, None).await.unwrap();
    assert_eq!(publishes_today(&h.pool).await, 1);
}

#[tokio::test]
async fn transient_publish_failure_is_retried() {
    let h = HarnessBuilder::default()
        .publisher(RecordingPublisher::with_responses(vec![
            Err(UpstreamError::Transient("502".into())),
            Ok("p-9".into()),
        ]))
        .build()
        .await;
    let entry = h.actions.add(USER, &url(5), "retry me", None).await.unwrap();
    let record = h.actions.approve(USER, entry.id, None).await.unwrap();
    assert_eq!(record.published_id.as_deref(), Some("p-9"));
    assert_eq!(h.publisher.calls().await.len(), 2);
}

#[tokio::test]
async fn publish_beyond_cap_is_refused() {
    let h = HarnessBuilder::default().cap(2).build().await;
    let mut ids = Vec::new();
    for i in 0..3 {
        ids.push(h.actions.add(USER, &url(20 + i), "r", None).await.unwrap().id);
    }
    h.actions.approve(USER, ids[0], None).await.unwrap();
    h.actions.approve(USER, ids[1], None).await.unwrap();
    let err = h.actions.approve(USER, ids[2], None).await.unwrap_err();
    assert!(matches!(err, ActionError::QuotaExceeded { used: 2, cap: 2 }));
    assert_eq!(h.publisher.calls().await.len(), 2);
    assert_eq!(h.actions.list(USER).await.unwrap().len(), 1);

    // Confirming by hand is still possible and does not count.
    h.actions.confirm(USER, ids[2], None).await.unwrap();
    assert_eq!(publishes_today(&h.pool).await, 2);
}

#[tokio::test]
async fn confirm_records_manual_history_without_publishing() {
    let h = HarnessBuilder::default().build().await;
    let entry = h.actions.add(USER, &url(6), "by hand", None).await.unwrap();
    let record = h.actions.confirm(USER, entry.id, None).await.unwrap();
    assert_eq!(record.status, HistoryStatus::Manual);
    assert!(record.published_id.is_none());
    assert!(h.publisher.calls().await.is_empty());
    assert!(matches!(
        h.actions.confirm(USER, entry.id, None).await,
        Err(ActionError::NotFound(_))
    ));
}

#[tokio::test]
async fn confirm_during_publish_is_refused() {
    let mut publisher = RecordingPublisher::default();
    publisher.delay = Duration::from_millis(50);
    let h = HarnessBuilder::default().publisher(publisher).build().await;
    let entry = h.actions.add(USER, &url(12), "only once", None).await.unwrap();

    let (approved, confirmed) = tokio::join!(h.actions.approve(USER, entry.id, None), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.actions.confirm(USER, entry.id, None).await
    });
    approved.unwrap();
    assert!(matches!(confirmed, Err(ActionError::NotFound(id)) if id == entry.id));

    let history = h.actions.history(USER, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, HistoryStatus::Published);
    assert_eq!(publishes_today(&h.pool).await, 1);
}

#[tokio::test]
async fn claim_left_by_interrupted_publish_is_cleared() {
    let h = HarnessBuilder::default().build().await;
    let entry = h.actions.add(USER, &url(13), "stuck", None).await.unwrap();
    db::claim_queue_entry(&h.pool, USER, entry.id).await.unwrap().unwrap();
    assert!(matches!(
        h.actions.edit(USER, entry.id, "new words").await,
        Err(ActionError::NotFound(_))
    ));

    assert_eq!(db::clear_claims(&h.pool).await.unwrap(), 1);
    h.actions.edit(USER, entry.id, "new words").await.unwrap();
    let record = h.actions.approve(USER, entry.id, None).await.unwrap();
    assert_eq!(record.reply_text, "new words");
}

#[tokio::test]
async fn discard_is_idempotent_and_owner_scoped() {
    let h = HarnessBuilder::default().build().await;
    let entry = h.actions.add(USER, &url(8), "mine", None).await.unwrap();

    assert!(!h.actions.discard(USER + 1, entry.id).await.unwrap());
    assert_eq!(h.actions.list(USER).await.unwrap().len(), 1);
    assert!(h.actions.list(USER + 1).await.unwrap().is_empty());

    assert!(h.actions.discard(USER, entry.id).await.unwrap());
    assert!(!h.actions.discard(USER, entry.id).await.unwrap());
    assert!(!h.actions.discard(USER, 12345).await.unwrap());

    assert!(matches!(
        h.actions.approve(USER + 1, entry.id, None).await,
        Err(ActionError::NotFound(_))
    ));
}

#[tokio::test]
async fn reply_text_is_validated() {
    let h = HarnessBuilder::default().build().await;
    let too_long = "x".repeat(281);
    assert!(matches!(
        h.actions.add(USER, &url(9), &too_long, None).await,
        Err(ActionError::Invalid(_))
    ));
    assert!(matches!(
        h.actions.add(USER, "no id here", "ok", None).await,
        Err(ActionError::Invalid(_))
    ));
    let entry = h.actions.add(USER, &url(9), "ok", None).await.unwrap();
    assert!(matches!(
        h.actions.edit(USER, entry.id, "   ").await,
        Err(ActionError::Invalid(_))
    ));
    assert!(matches!(
        h.actions.approve(USER, entry.id, Some(&too_long)).await,
        Err(ActionError::Invalid(_))
    ));
    // The failed approval did not leave the entry claimed.
    h.actions.edit(USER, entry.id, "fine").await.unwrap();
}

#[tokio::test]
async fn stats_cover_requested_window() {
    let h = HarnessBuilder::default().build().await;
    let entry = h.actions.add(USER, &url(11), "r", None).await.unwrap();
    h.actions.approve(USER, entry.id, None).await.unwrap();
    let stats = h.actions.stats(USER, 7).await.unwrap();
    assert_eq!(stats.len(), 7);
    assert_eq!(stats.last().unwrap().day, Utc::now().date_naive());
    assert_eq!(stats.last().unwrap().publish_count, 1);
}
