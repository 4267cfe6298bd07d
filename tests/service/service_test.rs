//! Intake loop: concurrency of units, error isolation, graceful shutdown.

use std::time::Duration;

use channel_relay::service::{Service, ServiceStats};
use tokio::sync::mpsc;

use crate::support::{in_group, photo_post, pipeline, text_post, RecordingSink, StubFeed};

#[tokio::test]
async fn processes_posts_until_the_feed_closes() {
    let (feed, sink) = (StubFeed::new(), RecordingSink::new());
    let (pipeline, albums) = pipeline(&feed, &sink);
    let (tx, rx) = mpsc::channel(8);
    tx.send(text_post(1, "first")).await.expect("send");
    tx.send(text_post(2, "second")).await.expect("send");
    drop(tx);

    let stats = Service::new(pipeline, albums)
        .run(rx, std::future::pending())
        .await;

    assert_eq!(
        stats,
        ServiceStats {
            completed: 2,
            failed: 0,
            abandoned: 0
        }
    );
    let mut texts = sink.texts();
    texts.sort();
    assert_eq!(texts.len(), 2);
    assert!(texts[0].contains("first"));
    assert!(texts[1].contains("second"));
}

#[tokio::test]
async fn failing_units_are_counted_and_do_not_stop_the_loop() {
    let (feed, sink) = (StubFeed::new(), RecordingSink::new());
    sink.fail_text();
    let (pipeline, albums) = pipeline(&feed, &sink);
    let (tx, rx) = mpsc::channel(8);
    for id in 1..=3 {
        tx.send(text_post(id, "doomed")).await.expect("send");
    }
    drop(tx);

    let stats = Service::new(pipeline, albums)
        .run(rx, std::future::pending())
        .await;

    assert_eq!(stats.failed, 3);
    assert_eq!(stats.completed, 0);
}

#[tokio::test(start_paused = true)]
async fn albums_complete_while_running() {
    let (feed, sink) = (StubFeed::new(), RecordingSink::new());
    feed.serve(1, vec![0; 4]);
    feed.serve(2, vec![0; 4]);
    let (pipeline, albums) = pipeline(&feed, &sink);
    let (tx, rx) = mpsc::channel(8);
    tx.send(in_group(photo_post(1, Some("Album")), "g1"))
        .await
        .expect("send");
    tx.send(in_group(photo_post(2, None), "g1"))
        .await
        .expect("send");

    let stats = Service::new(pipeline, albums)
        .run(rx, tokio::time::sleep(Duration::from_secs(2)))
        .await;
    drop(tx);

    assert_eq!(stats.completed, 1);
    let sends = sink.media_sends();
    assert_eq!(sends.len(), 2);
    assert!(sends[0].1.is_some());
    assert!(sends[1].1.is_none());
}

#[tokio::test(start_paused = true)]
async fn shutdown_flushes_albums_still_buffering() {
    let (feed, sink) = (StubFeed::new(), RecordingSink::new());
    feed.serve(1, vec![0; 4]);
    feed.serve(2, vec![0; 4]);
    let (pipeline, albums) = pipeline(&feed, &sink);
    let (tx, rx) = mpsc::channel(8);
    tx.send(in_group(photo_post(1, None), "g1"))
        .await
        .expect("send");
    tx.send(in_group(photo_post(2, None), "g1"))
        .await
        .expect("send");

    // Shutdown arrives well inside the 500 ms album window.
    let stats = Service::new(pipeline, albums)
        .run(rx, tokio::time::sleep(Duration::from_millis(100)))
        .await;
    drop(tx);

    assert_eq!(stats.completed, 1);
    assert_eq!(sink.upload_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_units_are_abandoned_after_the_shutdown_timeout() {
    let (feed, sink) = (StubFeed::new(), RecordingSink::new());
    sink.delay_text(Duration::from_secs(600));
    let (pipeline, albums) = pipeline(&feed, &sink);
    let (tx, rx) = mpsc::channel(8);
    tx.send(text_post(1, "slow")).await.expect("send");
    drop(tx);

    let stats = Service::new(pipeline, albums)
        .with_shutdown_timeout(Duration::from_secs(1))
        .run(rx, std::future::pending())
        .await;

    assert_eq!(stats.abandoned, 1);
    assert_eq!(stats.completed, 0);
    assert!(sink.texts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn slow_delivery_does_not_block_intake() {
    let (feed, sink) = (StubFeed::new(), RecordingSink::new());
    sink.delay_text(Duration::from_secs(5));
    let (pipeline, albums) = pipeline(&feed, &sink);
    let (tx, rx) = mpsc::channel(8);
    for id in 1..=4 {
        tx.send(text_post(id, "queued")).await.expect("send");
    }
    drop(tx);

    let started = tokio::time::Instant::now();
    let stats = Service::new(pipeline, albums)
        .run(rx, std::future::pending())
        .await;

    assert_eq!(stats.completed, 4);
    // Four 5 s deliveries overlap instead of running back to back.
    assert!(started.elapsed() < Duration::from_secs(10));
}
