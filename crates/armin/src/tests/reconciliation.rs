//! Head refreshes against loaded messages, and the first-page cache.

use super::*;
use crate::timeline::TimelineStatus;

async fn open_trainer_on_athlete(harness: &Harness) -> ChatEngine {
    let trainer = harness.trainer().await;
    trainer.set_current_conversation(&peer(ATHLETE)).await.unwrap();
    trainer
}

#[tokio::test]
async fn remote_delete_disappears_on_refresh() {
    let harness = Harness::new();
    harness.seed_conversation(5);
    let trainer = open_trainer_on_athlete(&harness).await;

    assert!(harness.store.remove_raw("m4"));
    trainer.refresh_current_conversation().await.unwrap();

    // The new head page reaches back to m2; m4 falls inside it.
    assert_eq!(open_ids(&trainer), vec!["m2", "m3", "m5"]);
}

#[tokio::test]
async fn short_head_page_drops_everything_older_that_is_gone() {
    let harness = Harness::new();
    harness.seed_conversation(2);
    let trainer = open_trainer_on_athlete(&harness).await;

    assert!(harness.store.remove_raw("m1"));
    trainer.refresh_current_conversation().await.unwrap();

    assert_eq!(open_ids(&trainer), vec!["m2"]);
}

#[tokio::test]
async fn empty_head_page_keeps_loaded_messages() {
    let harness = Harness::new();
    harness.seed_conversation(3);
    let trainer = open_trainer_on_athlete(&harness).await;

    for id in ["m1", "m2", "m3"] {
        harness.store.remove_raw(id);
    }
    trainer.refresh_current_conversation().await.unwrap();

    assert_eq!(open_ids(&trainer), vec!["m1", "m2", "m3"]);
}

#[tokio::test]
async fn older_pages_survive_head_refresh() {
    let harness = Harness::new();
    harness.seed_conversation(5);
    let trainer = open_trainer_on_athlete(&harness).await;
    trainer.load_more_messages().await.unwrap();

    harness.seed("m6", TRAINER, ATHLETE, 6);
    trainer.refresh_current_conversation().await.unwrap();

    let current = trainer.state().current_conversation.unwrap();
    assert_eq!(
        open_ids(&trainer),
        vec!["m1", "m2", "m3", "m4", "m5", "m6"]
    );
    assert!(!current.has_more);
}

#[tokio::test]
async fn fetched_rows_replace_loaded_copies() {
    let harness = Harness::new();
    harness.seed_conversation(1);
    let athlete = harness.athlete().await;
    athlete.set_current_conversation(&peer(TRAINER)).await.unwrap();
    let before = athlete.state().current_conversation.unwrap().messages[0].clone();
    assert!(before.read_at.is_none());

    // The trainer reads the athlete's message elsewhere.
    let trainer = harness.trainer().await;
    trainer.mark_read(&peer(ATHLETE)).await.unwrap();
    athlete.refresh_current_conversation().await.unwrap();

    let after = athlete.state().current_conversation.unwrap().messages[0].clone();
    assert_eq!(after.id, before.id);
    assert!(after.read_at.is_some());
}

#[tokio::test]
async fn scan_failure_keeps_messages_and_reports() {
    let harness = Harness::new();
    harness.seed_conversation(3);
    let trainer = open_trainer_on_athlete(&harness).await;
    harness.store.fail_scans(true);

    assert!(trainer.refresh_current_conversation().await.is_err());

    let state = trainer.state();
    assert_eq!(open_ids(&trainer), vec!["m1", "m2", "m3"]);
    assert_eq!(state.timeline_status(), TimelineStatus::Error);
}

#[tokio::test]
async fn first_open_failure_leaves_empty_timeline_in_error() {
    let harness = Harness::new();
    harness.seed_conversation(3);
    harness.store.fail_scans(true);
    let trainer = harness.trainer().await;

    assert!(trainer
        .set_current_conversation(&peer(ATHLETE))
        .await
        .is_err());

    let state = trainer.state();
    let current = state.current_conversation.as_ref().unwrap();
    assert!(current.messages.is_empty());
    assert!(!current.is_loading);
    assert_eq!(state.timeline_status(), TimelineStatus::Error);
    assert_eq!(harness.store.mark_reads(), 0);
}

#[tokio::test]
async fn cached_first_page_is_shown_on_reopen() {
    let harness = Harness::new();
    harness.seed_conversation(5);
    harness.seed("x1", OTHER_ATHLETE, TRAINER, 20);
    let trainer = open_trainer_on_athlete(&harness).await;
    trainer
        .set_current_conversation(&peer(OTHER_ATHLETE))
        .await
        .unwrap();

    harness.store.fail_scans(true);
    assert!(trainer
        .set_current_conversation(&peer(ATHLETE))
        .await
        .is_err());

    assert_eq!(open_ids(&trainer), vec!["m3", "m4", "m5"]);
    assert!(trainer.state().error.is_some());
}

#[tokio::test]
async fn send_invalidates_cached_first_page() {
    let harness = Harness::new();
    harness.seed_conversation(2);
    harness.seed("x1", OTHER_ATHLETE, TRAINER, 20);
    let trainer = open_trainer_on_athlete(&harness).await;
    trainer
        .send_message(&peer(ATHLETE), "nuovo", Default::default(), None)
        .await
        .unwrap();
    trainer
        .set_current_conversation(&peer(OTHER_ATHLETE))
        .await
        .unwrap();

    harness.store.fail_scans(true);
    let _ = trainer.set_current_conversation(&peer(ATHLETE)).await;

    // Nothing cached for the athlete any more, so nothing to show.
    assert!(open_ids(&trainer).is_empty());
}
